//! Dashboard summary: four independent store reads joined into one snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, SummaryStep};
use crate::store::{self, Store};
use crate::types::{
    Alert, ConnectionSample, DashboardSummary, ProcessSample, RecordKind, SystemStatSample,
};

#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn Store>,
    active_window: Duration,
    alert_window: Duration,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, active_window_secs: u64, alert_window_secs: u64) -> Self {
        Self {
            store,
            active_window: secs(active_window_secs),
            alert_window: secs(alert_window_secs),
        }
    }

    /// Fails as a whole if any step fails; no partial summary is returned.
    pub async fn summary(&self, now: DateTime<Utc>) -> Result<DashboardSummary, Error> {
        let active_since = since(now, self.active_window);
        let alert_since = since(now, self.alert_window);

        let (latest_stats, active_process_count, active_connection_count, recent_alert_count) =
            tokio::try_join!(
                self.step(SummaryStep::LatestStats, |s| {
                    Ok(store::recent::<SystemStatSample>(s, 1)?.into_iter().next())
                }),
                self.step(SummaryStep::ActiveProcesses, move |s| {
                    let rows = store::window::<ProcessSample>(s, active_since)?;
                    Ok(rows.iter().map(|r| r.data.pid).collect::<HashSet<_>>().len())
                }),
                self.step(SummaryStep::ActiveConnections, move |s| {
                    Ok(store::window::<ConnectionSample>(s, active_since)?.len())
                }),
                self.step(SummaryStep::RecentAlerts, move |s| {
                    Ok(store::window::<Alert>(s, alert_since)?.len())
                }),
            )?;

        Ok(DashboardSummary {
            latest_stats,
            active_process_count,
            active_connection_count,
            recent_alert_count,
            computed_at: now,
        })
    }

    async fn step<T, F>(&self, step: SummaryStep, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, Error> + Send + 'static,
    {
        let store = self.store.clone();
        let joined = tokio::task::spawn_blocking(move || f(store.as_ref())).await;
        let result = joined.unwrap_or_else(|e| {
            Err(Error::StorageUnavailable(format!(
                "{} read aborted: {e}",
                RecordKind::from(step).table()
            )))
        });
        result.map_err(|source| Error::Aggregation {
            step,
            source: Box::new(source),
        })
    }
}

impl From<SummaryStep> for RecordKind {
    fn from(step: SummaryStep) -> Self {
        match step {
            SummaryStep::LatestStats => RecordKind::SystemStat,
            SummaryStep::ActiveProcesses => RecordKind::Process,
            SummaryStep::ActiveConnections => RecordKind::Connection,
            SummaryStep::RecentAlerts => RecordKind::Alert,
        }
    }
}

fn secs(s: u64) -> Duration {
    i64::try_from(s)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn since(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
