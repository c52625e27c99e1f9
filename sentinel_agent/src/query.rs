//! Read-only access for viewers: bounded, ordered reads with a timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::aggregator::Aggregator;
use crate::config::QueryConfig;
use crate::dedup::dedup_latest;
use crate::error::Error;
use crate::store::{self, Store};
use crate::types::{
    Alert, ConnectionSample, DashboardSummary, ProcessSample, RecordKind, Row, SystemStatSample,
};

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn Store>,
    aggregator: Aggregator,
    timeout: Duration,
    max_limit: usize,
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>, cfg: &QueryConfig) -> Self {
        Self {
            aggregator: Aggregator::new(
                store.clone(),
                cfg.active_window_secs,
                cfg.alert_window_secs,
            ),
            store,
            timeout: cfg.timeout(),
            max_limit: cfg.max_limit,
        }
    }

    /// A copy that uses `timeout` for every call.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Resolves an optional caller-supplied limit against the per-kind default and the cap.
    pub fn resolve_limit(&self, kind: RecordKind, limit: Option<i64>) -> Result<usize, Error> {
        match limit {
            None => Ok(kind.default_limit()),
            Some(n) if n <= 0 => Err(Error::InvalidInput(format!(
                "limit must be a positive integer, got {n}"
            ))),
            Some(n) => match usize::try_from(n) {
                Ok(n) if n <= self.max_limit => Ok(n),
                _ => Err(Error::InvalidInput(format!(
                    "limit {n} exceeds maximum of {}",
                    self.max_limit
                ))),
            },
        }
    }

    /// Newest first. With `dedup`, one row per pid out of the `limit` most recent.
    pub async fn processes(
        &self,
        limit: Option<i64>,
        dedup: bool,
    ) -> Result<Vec<Row<ProcessSample>>, Error> {
        let limit = self.resolve_limit(RecordKind::Process, limit)?;
        let rows: Vec<Row<ProcessSample>> = self.read(move |s| store::recent(s, limit)).await?;
        Ok(if dedup { dedup_latest(&rows) } else { rows })
    }

    pub async fn connections(
        &self,
        limit: Option<i64>,
        dedup: bool,
    ) -> Result<Vec<Row<ConnectionSample>>, Error> {
        let limit = self.resolve_limit(RecordKind::Connection, limit)?;
        let rows: Vec<Row<ConnectionSample>> = self.read(move |s| store::recent(s, limit)).await?;
        Ok(if dedup { dedup_latest(&rows) } else { rows })
    }

    pub async fn alerts(&self, limit: Option<i64>) -> Result<Vec<Row<Alert>>, Error> {
        let limit = self.resolve_limit(RecordKind::Alert, limit)?;
        self.read(move |s| store::recent(s, limit)).await
    }

    /// The most recent `limit` stats in chronological order, for charting.
    pub async fn system_stats_history(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<Row<SystemStatSample>>, Error> {
        let limit = self.resolve_limit(RecordKind::SystemStat, limit)?;
        let mut rows: Vec<Row<SystemStatSample>> =
            self.read(move |s| store::recent(s, limit)).await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn dashboard(&self) -> Result<DashboardSummary, Error> {
        let aggregator = self.aggregator.clone();
        self.bounded(async move { aggregator.summary(Utc::now()).await })
            .await
    }

    async fn read<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, Error> + Send + 'static,
    {
        let store = self.store.clone();
        self.bounded(async move {
            tokio::task::spawn_blocking(move || f(store.as_ref()))
                .await
                .unwrap_or_else(|e| Err(Error::StorageUnavailable(format!("read aborted: {e}"))))
        })
        .await
    }

    // The blocking read keeps running after a timeout; only the caller stops waiting.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(Error::Timeout(self.timeout)))
    }
}
