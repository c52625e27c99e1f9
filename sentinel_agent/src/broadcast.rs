//! Live-feed fan-out: one bounded queue per subscriber, never awaited by the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{BroadcastDeliveryFailure, DeliveryFailureReason};
use crate::types::Event;

struct Outbound {
    tx: mpsc::Sender<Arc<str>>,
    // Dropped together with the slot, which resolves the subscriber's `evicted`.
    _evict: oneshot::Sender<()>,
}

pub struct Subscription {
    pub id: u64,
    /// Serialized events. Closed once the broadcaster drops this subscriber.
    pub rx: mpsc::Receiver<Arc<str>>,
    /// Resolves as soon as the subscriber leaves the registry, even while `rx` still holds
    /// queued events.
    pub evicted: oneshot::Receiver<()>,
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: Vec<BroadcastDeliveryFailure>,
}

/// Registry of live subscribers. Owned by whoever builds the agent and shared by `Arc`.
pub struct Broadcaster {
    subscribers: Mutex<HashMap<u64, Outbound>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    // A panic while holding the registry cannot leave a half-updated map.
    fn registry(&self) -> MutexGuard<'_, HashMap<u64, Outbound>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let (evict, evicted) = oneshot::channel();
        self.registry().insert(id, Outbound { tx, _evict: evict });
        debug!(subscriber = id, "subscriber joined");
        Subscription { id, rx, evicted }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "subscriber left");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    /// Serializes once and offers the event to every subscriber without waiting.
    /// Subscribers whose queue is full or closed are removed and reported.
    pub fn publish(&self, event: &Event) -> PublishReport {
        let mut report = PublishReport::default();
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(s) => s.into(),
            Err(e) => {
                warn!(error = %e, "failed to encode event");
                return report;
            }
        };

        let mut registry = self.registry();
        registry.retain(|&id, slot| match slot.tx.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(e) => {
                let reason = match e {
                    TrySendError::Full(_) => DeliveryFailureReason::BufferFull,
                    TrySendError::Closed(_) => DeliveryFailureReason::Disconnected,
                };
                report.dropped.push(BroadcastDeliveryFailure {
                    subscriber: id,
                    reason,
                });
                false
            }
        });
        drop(registry);

        for failure in &report.dropped {
            warn!(subscriber = failure.subscriber, reason = %failure.reason, "dropping subscriber");
        }
        report
    }
}
