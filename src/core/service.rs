//! Queue service: keeps the bounded queue and the durable store aligned.
//!
//! Ordering of queue and store mutations:
//!
//! * `add` reserves a capacity slot first (this is where it may wait), then
//!   persists, then publishes the identity-bearing record into the slot. If
//!   the save fails the slot is released, so neither side changes. A record
//!   is never visible to consumers before it is durable.
//! * `get` and `get_group` take from the queue, then delete from the store.
//!   If the delete fails the records stay persisted and come back on the
//!   next `synchronise`: delivery is at-least-once, never lossy. The error
//!   hands the records to the caller.
//!
//! A recovery gate (`RwLock<()>`) is held shared by `add`, `get` and
//! `get_group` across their store call plus queue publish/take, and held
//! exclusively by `synchronise`. Nothing waits for capacity or content while
//! holding it, and the queue's own lock is never held across a store call.
//! Entering the gate counts against the caller's timeout: with a zero
//! timeout a call that finds `synchronise` running fails at once (`add` with
//! `QueueFull`, `get` with `QueueEmpty`) and `get_group` returns nothing.
//!
//! Blocked calls cannot be cancelled; they return when their timeout
//! elapses or when another thread makes room or content available.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::core::error::{Operation, QueueError, StoreError};
use crate::core::queue::BoundedQueue;
use crate::core::record::{Record, RecordId};
use crate::core::store::Store;

/// Outcome of [`QueueService::synchronise`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records placed into the queue.
    pub restored: usize,
    /// Persisted records left out because the queue was full. They remain in
    /// the store and are picked up by a later `synchronise`.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct QueueService {
    queue: BoundedQueue<Record>,
    store: Arc<dyn Store>,
    gate: RwLock<()>,
}

impl QueueService {
    /// Creates a service holding at most `capacity` records in memory.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(store: Arc<dyn Store>, capacity: usize) -> Self {
        Self {
            queue: BoundedQueue::new(capacity),
            store,
            gate: RwLock::new(()),
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &QueueConfig) -> Self {
        Self::new(store, config.max_entries)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Records currently queued in memory.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues and persists `record`, waiting up to `timeout` (none means
    /// an immediate attempt) for capacity. Returns the store-assigned id.
    #[tracing::instrument(skip(self, record), fields(name = record.name()))]
    pub fn add(&self, record: Record, timeout: Option<Duration>) -> Result<RecordId, QueueError> {
        let wait = timeout.unwrap_or(Duration::ZERO);
        let deadline = Instant::now().checked_add(wait);

        let Some(slot) = self.queue.reserve(wait) else {
            debug!(?wait, "queue full");
            return Err(QueueError::QueueFull {
                timeout: wait,
                record: Box::new(record),
            });
        };

        let Some(_gate) = self.enter(remaining(deadline)) else {
            debug!(?wait, "synchronise in progress");
            return Err(QueueError::QueueFull {
                timeout: wait,
                record: Box::new(record),
            });
        };
        let saved = match self.store.save(&record) {
            Ok(saved) => saved,
            Err(source) => {
                warn!(error = %source, "save failed, releasing reserved slot");
                return Err(QueueError::StoreFailure {
                    operation: Operation::Add,
                    record_id: record.id(),
                    records: vec![record],
                    source,
                });
            }
        };

        let Some(id) = saved.id() else {
            return Err(QueueError::StoreFailure {
                operation: Operation::Add,
                record_id: None,
                records: vec![record],
                source: StoreError::Corruption(
                    "store returned a record without identity".to_string(),
                ),
            });
        };

        slot.commit(saved);
        debug!(%id, "record enqueued");
        Ok(id)
    }

    /// Dequeues the oldest record and deletes its persisted copy, waiting up
    /// to `timeout` (none means an immediate attempt) for one to arrive.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, timeout: Option<Duration>) -> Result<Record, QueueError> {
        let wait = timeout.unwrap_or(Duration::ZERO);
        let deadline = Instant::now().checked_add(wait);

        loop {
            {
                let Some(_gate) = self.enter(remaining(deadline)) else {
                    debug!(?wait, "synchronise in progress");
                    return Err(QueueError::QueueEmpty { timeout: wait });
                };
                if let Some(record) = self.queue.try_dequeue(Duration::ZERO) {
                    if let Err(source) = self.store.delete(&record) {
                        warn!(error = %source, record = %record, "delete failed after dequeue");
                        return Err(QueueError::StoreFailure {
                            operation: Operation::Get,
                            record_id: record.id(),
                            records: vec![record],
                            source,
                        });
                    }
                    debug!(record = %record, "record dequeued");
                    return Ok(record);
                }
            }

            if !self.queue.wait_for_item(remaining(deadline)) {
                debug!(?wait, "queue empty");
                return Err(QueueError::QueueEmpty { timeout: wait });
            }
        }
    }

    /// Drains up to `max_count` records that are immediately available and
    /// removes them from the store with one bulk delete. Never waits.
    #[tracing::instrument(skip(self))]
    pub fn get_group(&self, max_count: usize) -> Result<Vec<Record>, QueueError> {
        if max_count < 1 {
            return Err(QueueError::InvalidArgument {
                requested: max_count,
            });
        }

        let Some(_gate) = self.enter(Duration::ZERO) else {
            debug!("synchronise in progress, nothing drained");
            return Ok(Vec::new());
        };
        let drained = self.queue.drain_up_to(max_count);
        if drained.is_empty() {
            return Ok(drained);
        }

        if let Err(source) = self.store.delete_all(&drained) {
            warn!(error = %source, count = drained.len(), "bulk delete failed after drain");
            return Err(QueueError::StoreFailure {
                operation: Operation::GetGroup,
                record_id: None,
                records: drained,
                source,
            });
        }

        debug!(count = drained.len(), "group drained");
        Ok(drained)
    }

    /// Shares the recovery gate, waiting at most `wait` for a running
    /// `synchronise` to finish.
    fn enter(&self, wait: Duration) -> Option<RwLockReadGuard<'_, ()>> {
        if wait.is_zero() {
            self.gate.try_read()
        } else {
            self.gate.try_read_for(wait)
        }
    }

    /// Empties the in-memory queue. The store is not touched.
    pub fn purge(&self) -> usize {
        let removed = self.queue.clear();
        debug!(removed, "queue purged");
        removed
    }

    /// Rebuilds the in-memory queue from the store.
    ///
    /// The queue is purged, then refilled in store-iteration order until it
    /// is full. Records that do not fit stay persisted and are counted in
    /// [`SyncReport::skipped`]. Calling it again is harmless.
    #[tracing::instrument(skip(self))]
    pub fn synchronise(&self) -> Result<SyncReport, QueueError> {
        let _gate = self.gate.write();
        self.purge();

        let records = self
            .store
            .find_all()
            .map_err(|source| QueueError::StoreFailure {
                operation: Operation::Synchronise,
                record_id: None,
                records: Vec::new(),
                source,
            })?;

        let mut report = SyncReport::default();
        for record in records {
            let name = record.name().to_string();
            match self.queue.try_enqueue(record, Duration::ZERO) {
                Ok(()) => {
                    report.restored += 1;
                    debug!(%name, "recovered record");
                }
                Err(_) => report.skipped += 1,
            }
        }

        info!(
            restored = report.restored,
            skipped = report.skipped,
            "queue synchronised with store"
        );
        Ok(report)
    }
}

/// Time left until `deadline`; `None` means no deadline.
fn remaining(deadline: Option<Instant>) -> Duration {
    deadline
        .map(|d| d.saturating_duration_since(Instant::now()))
        .unwrap_or(Duration::MAX)
}
