use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{check_limit, Store};
use crate::error::Error;
use crate::types::{Record, RecordBody, RecordKind, Row};

type Key = (DateTime<Utc>, u64);

#[derive(Default)]
struct Table {
    next_id: u64,
    rows: BTreeMap<Key, Record>,
}

/// In-process store: one lock per table, rows kept in timestamp order.
#[derive(Default)]
pub struct MemoryStore {
    processes: RwLock<Table>,
    connections: RwLock<Table>,
    stats: RwLock<Table>,
    alerts: RwLock<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: RecordKind) -> &RwLock<Table> {
        match kind {
            RecordKind::Process => &self.processes,
            RecordKind::Connection => &self.connections,
            RecordKind::SystemStat => &self.stats,
            RecordKind::Alert => &self.alerts,
        }
    }

    fn read(&self, kind: RecordKind) -> Result<RwLockReadGuard<'_, Table>, Error> {
        self.table(kind)
            .read()
            .map_err(|_| Error::StorageUnavailable(format!("{} lock poisoned", kind.table())))
    }

    fn write(&self, kind: RecordKind) -> Result<RwLockWriteGuard<'_, Table>, Error> {
        self.table(kind)
            .write()
            .map_err(|_| Error::StorageUnavailable(format!("{} lock poisoned", kind.table())))
    }
}

impl Store for MemoryStore {
    fn append(&self, body: RecordBody, at: Option<DateTime<Utc>>) -> Result<Record, Error> {
        let kind = body.kind();
        let mut table = self.write(kind)?;
        table.next_id += 1;
        let row = Row {
            id: table.next_id,
            timestamp: at.unwrap_or_else(Utc::now),
            data: body,
        };
        table.rows.insert(row.order_key(), row.clone());
        Ok(row)
    }

    fn query_recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Record>, Error> {
        check_limit(limit)?;
        let table = self.read(kind)?;
        Ok(table.rows.values().rev().take(limit).cloned().collect())
    }

    fn query_window(&self, kind: RecordKind, since: DateTime<Utc>) -> Result<Vec<Record>, Error> {
        let table = self.read(kind)?;
        let lower = Bound::Excluded((since, u64::MAX));
        Ok(table
            .rows
            .range((lower, Bound::Unbounded))
            .rev()
            .map(|(_, row)| row.clone())
            .collect())
    }
}
