//! Error taxonomy shared by the store, pipeline and query surface.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::AlertKind;

#[derive(Debug, Error)]
pub enum Error {
    /// The store cannot accept writes or serve reads right now.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Malformed sample or out-of-range query parameter; nothing was applied.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// One step of the dashboard summary failed, so the whole summary did.
    #[error("dashboard summary failed at {step}: {source}")]
    Aggregation {
        step: SummaryStep,
        #[source]
        source: Box<Error>,
    },

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn storage(e: impl fmt::Display) -> Self {
        Error::StorageUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStep {
    LatestStats,
    ActiveProcesses,
    ActiveConnections,
    RecentAlerts,
}

impl fmt::Display for SummaryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SummaryStep::LatestStats => "latest_stats",
            SummaryStep::ActiveProcesses => "active_process_count",
            SummaryStep::ActiveConnections => "active_connection_count",
            SummaryStep::RecentAlerts => "recent_alert_count",
        })
    }
}

/// A classifier rule failed on one sample. Reported and logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule {kind} failed: {reason}")]
pub struct ClassificationFailure {
    pub kind: AlertKind,
    pub reason: String,
}

/// A subscriber could not take an event and was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subscriber {subscriber} dropped: {reason}")]
pub struct BroadcastDeliveryFailure {
    pub subscriber: u64,
    pub reason: DeliveryFailureReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailureReason {
    BufferFull,
    Disconnected,
}

impl fmt::Display for DeliveryFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryFailureReason::BufferFull => "outbound buffer full",
            DeliveryFailureReason::Disconnected => "disconnected",
        })
    }
}
