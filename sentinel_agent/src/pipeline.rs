//! Ingestion: validate, store, publish, classify, store and publish alerts.
//!
//! Everything here is blocking; async callers go through `spawn_blocking`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::broadcast::Broadcaster;
use crate::classifier::{Classifier, Context};
use crate::error::{ClassificationFailure, Error};
use crate::store::{self, Store};
use crate::types::{Event, Record, Sample, SystemStatSample};

#[derive(Debug)]
pub struct IngestReport {
    pub record: Record,
    /// Alerts that were raised and stored.
    pub alerts: Vec<Record>,
    pub rule_failures: Vec<ClassificationFailure>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub stored: usize,
    pub rejected: usize,
    pub failed: usize,
    pub alerts: usize,
    pub rule_failures: usize,
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    classifier: Classifier,
    broadcaster: Arc<Broadcaster>,
    // Held across read-previous/append so each stat is compared with its true predecessor.
    stat_gate: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        classifier: Classifier,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            classifier,
            broadcaster,
            stat_gate: Mutex::new(()),
        }
    }

    /// Ingests one sample. Only `InvalidInput` and `StorageUnavailable` on the sample itself
    /// are returned; rule failures and alert write failures are reported and logged.
    pub fn ingest(&self, sample: Sample, at: Option<DateTime<Utc>>) -> Result<IngestReport, Error> {
        sample.validate()?;

        let (record, ctx) = if let Sample::SystemStat(_) = &sample {
            let _gate = self.stat_gate.lock().unwrap_or_else(|p| p.into_inner());
            let previous_stat = store::recent::<SystemStatSample>(self.store.as_ref(), 1)
                .map(|rows| rows.into_iter().next().map(|r| r.data))
                .map_err(|e| e.to_string());
            let record = self.store.append(sample.clone().into_body(), at)?;
            (record, Context { previous_stat })
        } else {
            (
                self.store.append(sample.clone().into_body(), at)?,
                Context::default(),
            )
        };
        self.publish(&record);

        let classification = self.classifier.classify(&sample, &ctx);
        let mut alerts = Vec::with_capacity(classification.alerts.len());
        for alert in classification.alerts {
            let kind = alert.kind;
            match store::append(self.store.as_ref(), alert, None) {
                Ok(row) => {
                    let row = row.erase();
                    self.publish(&row);
                    alerts.push(row);
                }
                Err(e) => warn!(alert = %kind, error = %e, "failed to store alert"),
            }
        }

        Ok(IngestReport {
            record,
            alerts,
            rule_failures: classification.failures,
        })
    }

    /// Ingests every sample under one observation time. One bad sample never aborts the rest.
    pub fn ingest_batch(
        &self,
        samples: impl IntoIterator<Item = Sample>,
        at: Option<DateTime<Utc>>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for sample in samples {
            let kind = sample.kind();
            match self.ingest(sample, at) {
                Ok(r) => {
                    report.stored += 1;
                    report.alerts += r.alerts.len();
                    report.rule_failures += r.rule_failures.len();
                }
                Err(Error::InvalidInput(msg)) => {
                    report.rejected += 1;
                    warn!(?kind, %msg, "rejected sample");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(?kind, error = %e, "failed to ingest sample");
                }
            }
        }
        debug!(
            stored = report.stored,
            rejected = report.rejected,
            failed = report.failed,
            alerts = report.alerts,
            "batch ingested"
        );
        report
    }

    fn publish(&self, record: &Record) {
        match Event::from_record(record) {
            Ok(event) => {
                self.broadcaster.publish(&event);
            }
            Err(e) => warn!(id = record.id, error = %e, "failed to encode event"),
        }
    }
}
