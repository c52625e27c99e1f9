//! Append-only tables for samples and alerts.
//!
//! Rows are never updated or deleted. Reads are newest-first by `(timestamp, id)`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::types::{Payload, Record, RecordBody, RecordKind, Row};

pub trait Store: Send + Sync {
    /// Appends one row, stamping it with `at` or the current time.
    fn append(&self, body: RecordBody, at: Option<DateTime<Utc>>) -> Result<Record, Error>;

    /// Up to `limit` rows of `kind`, newest first. A zero limit is an input error.
    fn query_recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Record>, Error>;

    /// Every row of `kind` with a timestamp strictly after `since`, newest first.
    fn query_window(&self, kind: RecordKind, since: DateTime<Utc>) -> Result<Vec<Record>, Error>;
}

pub(crate) fn check_limit(limit: usize) -> Result<(), Error> {
    if limit == 0 {
        return Err(Error::InvalidInput("limit must be positive".into()));
    }
    Ok(())
}

pub fn append<T: Payload>(
    store: &dyn Store,
    data: T,
    at: Option<DateTime<Utc>>,
) -> Result<Row<T>, Error> {
    let record = store.append(data.into_body(), at)?;
    downcast(record)
}

pub fn recent<T: Payload>(store: &dyn Store, limit: usize) -> Result<Vec<Row<T>>, Error> {
    store
        .query_recent(T::KIND, limit)?
        .into_iter()
        .map(downcast)
        .collect()
}

pub fn window<T: Payload>(store: &dyn Store, since: DateTime<Utc>) -> Result<Vec<Row<T>>, Error> {
    store
        .query_window(T::KIND, since)?
        .into_iter()
        .map(downcast)
        .collect()
}

fn downcast<T: Payload>(record: Record) -> Result<Row<T>, Error> {
    let found = record.data.kind();
    record.cast::<T>().ok_or_else(|| {
        Error::StorageUnavailable(format!(
            "{} table returned a {found:?} row",
            T::KIND.table()
        ))
    })
}
