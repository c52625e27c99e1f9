//! Records stored by the agent and sent to viewers.
//! Keep this module minimal and stable; it defines the wire format.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A persisted record: store-assigned id and timestamp plus the payload fields.
///
/// `timestamp` is the observation time for samples and the raise time for alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row<T> {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Row<T> {
    /// Sort key used by every newest-first read.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_pct: f64,
    pub mem_kb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnState {
    Established,
    Listen,
    TimeWait,
    CloseWait,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSample {
    pub protocol: Protocol,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: ConnState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatSample {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub load_avg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    HighCpu,
    HighMemory,
    CpuSpike,
    MemorySpike,
    SystemOverload,
    SuspiciousPort,
    ExternalConnection,
    UnknownProcess,
}

impl AlertKind {
    pub fn severity(self) -> Severity {
        match self {
            AlertKind::HighCpu
            | AlertKind::HighMemory
            | AlertKind::SuspiciousPort
            | AlertKind::UnknownProcess => Severity::Warning,
            AlertKind::CpuSpike | AlertKind::MemorySpike => Severity::Error,
            AlertKind::SystemOverload => Severity::Critical,
            AlertKind::ExternalConnection => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub details: String,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            message: message.into(),
            details: details.into(),
        }
    }
}

/// The four append-only tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Process,
    Connection,
    SystemStat,
    Alert,
}

impl RecordKind {
    /// Limit applied when a reader does not ask for one.
    pub fn default_limit(self) -> usize {
        match self {
            RecordKind::Process | RecordKind::Connection => 100,
            RecordKind::Alert => 50,
            RecordKind::SystemStat => 24,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Process => "processes",
            RecordKind::Connection => "network_connections",
            RecordKind::SystemStat => "system_stats",
            RecordKind::Alert => "alerts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordBody {
    Process(ProcessSample),
    Connection(ConnectionSample),
    SystemStat(SystemStatSample),
    Alert(Alert),
}

impl RecordBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBody::Process(_) => RecordKind::Process,
            RecordBody::Connection(_) => RecordKind::Connection,
            RecordBody::SystemStat(_) => RecordKind::SystemStat,
            RecordBody::Alert(_) => RecordKind::Alert,
        }
    }
}

pub type Record = Row<RecordBody>;

/// Concrete payloads that can be pulled back out of a [`Record`].
pub trait Payload: Sized {
    const KIND: RecordKind;
    fn into_body(self) -> RecordBody;
    fn from_body(body: RecordBody) -> Option<Self>;
}

macro_rules! payload {
    ($ty:ty, $variant:ident) => {
        impl Payload for $ty {
            const KIND: RecordKind = RecordKind::$variant;
            fn into_body(self) -> RecordBody {
                RecordBody::$variant(self)
            }
            fn from_body(body: RecordBody) -> Option<Self> {
                match body {
                    RecordBody::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

payload!(ProcessSample, Process);
payload!(ConnectionSample, Connection);
payload!(SystemStatSample, SystemStat);
payload!(Alert, Alert);

impl Record {
    pub fn cast<T: Payload>(self) -> Option<Row<T>> {
        let Row {
            id,
            timestamp,
            data,
        } = self;
        T::from_body(data).map(|data| Row {
            id,
            timestamp,
            data,
        })
    }
}

impl<T: Payload> Row<T> {
    pub fn erase(self) -> Record {
        Row {
            id: self.id,
            timestamp: self.timestamp,
            data: self.data.into_body(),
        }
    }
}

/// A sample as handed to the pipeline by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    Process(ProcessSample),
    Connection(ConnectionSample),
    SystemStat(SystemStatSample),
}

impl Sample {
    pub fn kind(&self) -> RecordKind {
        match self {
            Sample::Process(_) => RecordKind::Process,
            Sample::Connection(_) => RecordKind::Connection,
            Sample::SystemStat(_) => RecordKind::SystemStat,
        }
    }

    /// Rejects samples that violate the data model before anything is written.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Sample::Process(p) => {
                if p.name.trim().is_empty() {
                    return Err(Error::InvalidInput(format!("process {} has no name", p.pid)));
                }
                if !p.cpu_pct.is_finite() || p.cpu_pct < 0.0 {
                    return Err(Error::InvalidInput(format!(
                        "process {} cpu_pct out of range: {}",
                        p.pid, p.cpu_pct
                    )));
                }
                Ok(())
            }
            Sample::Connection(_) => Ok(()),
            Sample::SystemStat(s) => {
                for (field, v) in [
                    ("cpu_pct", s.cpu_pct),
                    ("mem_pct", s.mem_pct),
                    ("disk_pct", s.disk_pct),
                ] {
                    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                        return Err(Error::InvalidInput(format!("{field} out of range: {v}")));
                    }
                }
                if !s.load_avg.is_finite() || s.load_avg < 0.0 {
                    return Err(Error::InvalidInput(format!(
                        "load_avg out of range: {}",
                        s.load_avg
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn into_body(self) -> RecordBody {
        match self {
            Sample::Process(p) => RecordBody::Process(p),
            Sample::Connection(c) => RecordBody::Connection(c),
            Sample::SystemStat(s) => RecordBody::SystemStat(s),
        }
    }
}

/// Body of `POST /api/samples`: a sample plus an optional observation time.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub sample: Sample,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub latest_stats: Option<Row<SystemStatSample>>,
    pub active_process_count: usize,
    pub active_connection_count: usize,
    pub recent_alert_count: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Process,
    Network,
    SystemStats,
    Alert,
}

impl From<RecordKind> for EventType {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Process => EventType::Process,
            RecordKind::Connection => EventType::Network,
            RecordKind::SystemStat => EventType::SystemStats,
            RecordKind::Alert => EventType::Alert,
        }
    }
}

/// One live-feed message: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
}

impl Event {
    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: record.data.kind().into(),
            data: serde_json::to_value(record)?,
        })
    }
}

// Text forms used by the SQLite backend.

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "unknown {} value: {other}",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

text_enum!(Protocol { Tcp => "TCP", Udp => "UDP" });
text_enum!(ConnState {
    Established => "ESTABLISHED",
    Listen => "LISTEN",
    TimeWait => "TIME_WAIT",
    CloseWait => "CLOSE_WAIT",
    Other => "OTHER",
});
text_enum!(Severity {
    Info => "INFO",
    Warning => "WARNING",
    Error => "ERROR",
    Critical => "CRITICAL",
});
text_enum!(AlertKind {
    HighCpu => "HIGH_CPU",
    HighMemory => "HIGH_MEMORY",
    CpuSpike => "CPU_SPIKE",
    MemorySpike => "MEMORY_SPIKE",
    SystemOverload => "SYSTEM_OVERLOAD",
    SuspiciousPort => "SUSPICIOUS_PORT",
    ExternalConnection => "EXTERNAL_CONNECTION",
    UnknownProcess => "UNKNOWN_PROCESS",
});
