use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::core::record::{Record, RecordId};

/// Failure reported by a durable store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store corruption: {0}")]
    Corruption(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A caller-supplied identity already belongs to a live record.
    #[error("identity {0} is already stored")]
    DuplicateIdentity(RecordId),
}

/// Queue service operation that touched the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Get,
    GetGroup,
    Synchronise,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "add"),
            Operation::Get => write!(f, "get"),
            Operation::GetGroup => write!(f, "get_group"),
            Operation::Synchronise => write!(f, "synchronise"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// No capacity freed up within `timeout`. Queue and store are unchanged;
    /// the record is handed back untouched.
    #[error("queue full: record '{}' not enqueued within {timeout:?}", .record.name())]
    QueueFull {
        timeout: Duration,
        record: Box<Record>,
    },

    /// Nothing arrived within `timeout`. Queue and store are unchanged.
    #[error("queue empty: nothing dequeued within {timeout:?}")]
    QueueEmpty { timeout: Duration },

    #[error("invalid group size {requested}: must be at least 1")]
    InvalidArgument { requested: usize },

    /// The durable store failed after, or while, the queue was touched.
    ///
    /// `records` holds whatever the operation had in hand when the store
    /// failed: the unsaved record for `add`, the dequeued records (still
    /// persisted, restored by the next `synchronise`) for `get` and
    /// `get_group`.
    #[error("{operation} failed in the durable store{}: {source}", describe(.record_id))]
    StoreFailure {
        operation: Operation,
        record_id: Option<RecordId>,
        records: Vec<Record>,
        #[source]
        source: StoreError,
    },
}

impl QueueError {
    /// Capacity and availability failures are worth retrying with a longer
    /// timeout; the others are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::QueueFull { .. } | QueueError::QueueEmpty { .. }
        )
    }
}

fn describe(record_id: &Option<RecordId>) -> String {
    match record_id {
        Some(id) => format!(" for record {id}"),
        None => String::new(),
    }
}
