//! Collapse a window of samples into the latest known state per logical entity.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::SocketAddr;

use crate::types::{ConnectionSample, ProcessSample, Protocol, Row};

/// Identifies the ongoing entity a sample describes.
pub trait LogicalKey {
    type Key: Eq + Hash;
    fn logical_key(&self) -> Self::Key;
}

impl LogicalKey for ProcessSample {
    type Key = u32;
    fn logical_key(&self) -> u32 {
        self.pid
    }
}

impl LogicalKey for ConnectionSample {
    type Key = (Protocol, SocketAddr, SocketAddr);
    fn logical_key(&self) -> Self::Key {
        (self.protocol, self.local, self.remote)
    }
}

/// One row per logical key, the one with the greatest `(timestamp, id)`,
/// ordered newest first.
///
/// Input order does not matter, so `dedup_latest(&dedup_latest(xs)) == dedup_latest(xs)`.
pub fn dedup_latest<T>(rows: &[Row<T>]) -> Vec<Row<T>>
where
    T: LogicalKey + Clone,
{
    let mut latest: HashMap<T::Key, &Row<T>> = HashMap::with_capacity(rows.len());
    for row in rows {
        latest
            .entry(row.data.logical_key())
            .and_modify(|kept| {
                if row.order_key() > kept.order_key() {
                    *kept = row;
                }
            })
            .or_insert(row);
    }
    let mut out: Vec<Row<T>> = latest.into_values().cloned().collect();
    out.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
    out
}
