//! SQLite-backed tables. Timestamps are stored as integer microseconds since the epoch.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{check_limit, Store};
use crate::error::Error;
use crate::types::{
    Alert, ConnectionSample, ProcessSample, Record, RecordBody, RecordKind, Row,
    SystemStatSample,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pid INTEGER NOT NULL,
    name TEXT NOT NULL,
    cpu_usage REAL NOT NULL,
    memory_usage INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS processes_ts ON processes (timestamp);

CREATE TABLE IF NOT EXISTS network_connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    local_ip TEXT NOT NULL,
    local_port INTEGER NOT NULL,
    remote_ip TEXT NOT NULL,
    remote_port INTEGER NOT NULL,
    protocol TEXT NOT NULL,
    state TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS network_connections_ts ON network_connections (timestamp);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    details TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS alerts_ts ON alerts (timestamp);

CREATE TABLE IF NOT EXISTS system_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cpu_usage REAL NOT NULL,
    memory_usage REAL NOT NULL,
    disk_usage REAL NOT NULL,
    load_average REAL NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS system_stats_ts ON system_stats (timestamp);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(Error::storage)?;
        // WAL keeps readers off the writer's back; in-memory databases answer "memory".
        let mode: Option<String> = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .optional()
            .map_err(Error::storage)?;
        info!(
            path = %path.display(),
            journal = mode.as_deref().unwrap_or("?"),
            "opened sqlite store"
        );
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Self::init(Connection::open_in_memory().map_err(Error::storage)?)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA).map_err(Error::storage)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| Error::StorageUnavailable("sqlite connection lock poisoned".into()))
    }

    fn select(
        &self,
        kind: RecordKind,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Record>, Error> {
        let columns = match kind {
            RecordKind::Process => "pid, name, cpu_usage, memory_usage",
            RecordKind::Connection => {
                "local_ip, local_port, remote_ip, remote_port, protocol, state"
            }
            RecordKind::SystemStat => "cpu_usage, memory_usage, disk_usage, load_average",
            RecordKind::Alert => "type, severity, message, details",
        };
        let sql = format!(
            "SELECT id, timestamp, {columns} FROM {} {filter}",
            kind.table()
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql).map_err(Error::storage)?;
        let rows = stmt
            .query_map(params, |row| read_row(kind, row))
            .map_err(Error::storage)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::storage)
    }
}

impl Store for SqliteStore {
    fn append(&self, body: RecordBody, at: Option<DateTime<Utc>>) -> Result<Record, Error> {
        let timestamp = at.unwrap_or_else(Utc::now);
        let ts = timestamp.timestamp_micros();
        let conn = self.conn()?;
        match &body {
            RecordBody::Process(p) => conn.execute(
                "INSERT INTO processes (pid, name, cpu_usage, memory_usage, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![i64::from(p.pid), p.name, p.cpu_pct, p.mem_kb as i64, ts],
            ),
            RecordBody::Connection(c) => conn.execute(
                "INSERT INTO network_connections
                   (local_ip, local_port, remote_ip, remote_port, protocol, state, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    c.local.ip().to_string(),
                    c.local.port(),
                    c.remote.ip().to_string(),
                    c.remote.port(),
                    c.protocol.as_str(),
                    c.state.as_str(),
                    ts
                ],
            ),
            RecordBody::SystemStat(s) => conn.execute(
                "INSERT INTO system_stats (cpu_usage, memory_usage, disk_usage, load_average, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![s.cpu_pct, s.mem_pct, s.disk_pct, s.load_avg, ts],
            ),
            RecordBody::Alert(a) => conn.execute(
                "INSERT INTO alerts (type, severity, message, details, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![a.kind.as_str(), a.severity.as_str(), a.message, a.details, ts],
            ),
        }
        .map_err(Error::storage)?;
        let id = conn.last_insert_rowid() as u64;
        Ok(Row {
            id,
            // Round-trip through the stored precision so reads compare equal.
            timestamp: from_micros(ts).unwrap_or(timestamp),
            data: body,
        })
    }

    fn query_recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Record>, Error> {
        check_limit(limit)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.select(kind, "ORDER BY timestamp DESC, id DESC LIMIT ?1", &[&limit])
    }

    fn query_window(&self, kind: RecordKind, since: DateTime<Utc>) -> Result<Vec<Record>, Error> {
        let since = since.timestamp_micros();
        self.select(
            kind,
            "WHERE timestamp > ?1 ORDER BY timestamp DESC, id DESC",
            &[&since],
        )
    }
}

fn from_micros(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

fn read_row(kind: RecordKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id: i64 = row.get(0)?;
    let ts: i64 = row.get(1)?;
    let timestamp = from_micros(ts).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Integer,
            format!("timestamp out of range: {ts}").into(),
        )
    })?;
    let data = match kind {
        RecordKind::Process => RecordBody::Process(ProcessSample {
            pid: row.get::<_, i64>(2)? as u32,
            name: row.get(3)?,
            cpu_pct: row.get(4)?,
            mem_kb: row.get::<_, i64>(5)? as u64,
        }),
        RecordKind::Connection => RecordBody::Connection(ConnectionSample {
            local: socket_addr(row, 2, 3)?,
            remote: socket_addr(row, 4, 5)?,
            protocol: parse_text(row, 6)?,
            state: parse_text(row, 7)?,
        }),
        RecordKind::SystemStat => RecordBody::SystemStat(SystemStatSample {
            cpu_pct: row.get(2)?,
            mem_pct: row.get(3)?,
            disk_pct: row.get(4)?,
            load_avg: row.get(5)?,
        }),
        RecordKind::Alert => RecordBody::Alert(Alert {
            kind: parse_text(row, 2)?,
            severity: parse_text(row, 3)?,
            message: row.get(4)?,
            details: row.get(5)?,
        }),
    };
    Ok(Row {
        id: id as u64,
        timestamp,
        data,
    })
}

fn parse_text<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn socket_addr(
    row: &rusqlite::Row<'_>,
    ip_idx: usize,
    port_idx: usize,
) -> rusqlite::Result<SocketAddr> {
    let ip: String = row.get(ip_idx)?;
    let ip = IpAddr::from_str(&ip)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(ip_idx, Type::Text, Box::new(e)))?;
    let port: u16 = row.get(port_idx)?;
    Ok(SocketAddr::new(ip, port))
}
