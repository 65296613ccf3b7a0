//! Per-identity subscription registry for live record delivery
//!
//! Listeners are grouped by user identity. Each identity's set has its own
//! lock so publishing for one identity never waits on another, while the
//! outer map lock is only taken for writing when a set is created or pruned.
//!
//! Lock order is always outer map, then identity set.

use crate::domain::record::ProcessedRecord;
use crate::domain::types::UserId;
use crate::infra::metrics::Metrics;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Record shared by every listener it is delivered to
pub type LiveRecord = Arc<ProcessedRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Delivery handle for one live-feed connection
#[derive(Debug, Clone)]
pub struct Listener {
    id: ListenerId,
    tx: mpsc::Sender<LiveRecord>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

type ListenerSet = FxHashMap<ListenerId, mpsc::Sender<LiveRecord>>;

pub struct SubscriptionRegistry {
    sets: RwLock<FxHashMap<UserId, Arc<Mutex<ListenerSet>>>>,
    next_id: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self { sets: RwLock::new(FxHashMap::default()), next_id: AtomicU64::new(1), metrics: None }
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self { metrics: Some(metrics), ..Self::new() }
    }

    /// Create a listener handle and the queue its session drains
    ///
    /// `queue` bounds how many records may wait for a slow connection.
    pub fn listener(&self, queue: usize) -> (Listener, mpsc::Receiver<LiveRecord>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        (Listener { id, tx }, rx)
    }

    /// Add a listener under an identity; subscribing twice is a no-op
    ///
    /// The registry keeps its own sender, so a caller that drops the handle
    /// afterwards lets `close_all` end the session. Returns true when the
    /// listener was not yet subscribed.
    pub fn subscribe(&self, user_id: UserId, listener: &Listener) -> bool {
        {
            let sets = self.sets.read();
            if let Some(set) = sets.get(&user_id) {
                return Self::insert(&mut set.lock(), user_id, listener);
            }
        }

        let mut sets = self.sets.write();
        let set = sets.entry(user_id).or_default();
        let inserted = Self::insert(&mut set.lock(), user_id, listener);
        inserted
    }

    fn insert(set: &mut ListenerSet, user_id: UserId, listener: &Listener) -> bool {
        let inserted = set.insert(listener.id, listener.tx.clone()).is_none();
        if inserted {
            debug!(user_id = %user_id, listener = %listener.id, listeners = set.len(), "listener_subscribed");
        }
        inserted
    }

    /// Remove a listener; unknown identities or listeners are ignored
    pub fn unsubscribe(&self, user_id: UserId, listener_id: ListenerId) {
        let now_empty = {
            let sets = self.sets.read();
            let Some(set) = sets.get(&user_id) else {
                return;
            };
            let mut set = set.lock();
            if set.remove(&listener_id).is_some() {
                debug!(user_id = %user_id, listener = %listener_id, "listener_unsubscribed");
            }
            set.is_empty()
        };

        if now_empty {
            self.prune(user_id);
        }
    }

    /// Deliver a record to every listener of its identity
    ///
    /// Delivery never blocks. A listener whose queue is full or whose session
    /// has gone is dropped from the set; the rest still receive the record.
    /// Returns the number of listeners the record was queued for.
    pub fn publish(&self, user_id: UserId, record: &LiveRecord) -> usize {
        let mut delivered = 0;
        let mut failed = 0;

        let now_empty = {
            let sets = self.sets.read();
            let Some(set) = sets.get(&user_id) else {
                return 0;
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_published();
            }
            let mut set = set.lock();
            set.retain(|listener_id, tx| match tx.try_send(Arc::clone(record)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(user_id = %user_id, listener = %listener_id, "listener_queue_full_dropped");
                    failed += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(user_id = %user_id, listener = %listener_id, "listener_gone_dropped");
                    failed += 1;
                    false
                }
            });
            set.is_empty()
        };

        if now_empty {
            self.prune(user_id);
        }

        if let Some(metrics) = &self.metrics {
            for _ in 0..failed {
                metrics.record_listener_send_failure();
            }
        }
        delivered
    }

    /// Publish each record under its own identity, in order
    pub fn publish_all(&self, records: &[ProcessedRecord]) {
        for record in records {
            self.publish(record.user_id, &Arc::new(record.clone()));
        }
    }

    /// Drop an identity's set once it is empty
    fn prune(&self, user_id: UserId) {
        let mut sets = self.sets.write();
        let empty = sets.get(&user_id).is_some_and(|set| set.lock().is_empty());
        if empty {
            sets.remove(&user_id);
        }
    }

    pub fn listener_count(&self, user_id: UserId) -> usize {
        self.sets.read().get(&user_id).map_or(0, |set| set.lock().len())
    }

    /// Identities with at least one listener
    pub fn identity_count(&self) -> usize {
        self.sets.read().len()
    }

    /// Release every listener
    ///
    /// Dropping the senders closes each session's queue, which ends it.
    pub fn close_all(&self) {
        let released: usize = {
            let mut sets = self.sets.write();
            let count = sets.values().map(|set| set.lock().len()).sum();
            sets.clear();
            count
        };
        info!(listeners = released, "subscriptions_released");
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
