//! Durable store interface consumed by the queue service.
//!
//! The store is the system of record for recovery. It assigns identities,
//! performs its own internal locking, and is never called while the queue's
//! lock is held.

pub mod log;
pub mod memory;

pub use log::{LogStore, LogStoreConfig, LogStoreStats};
pub use memory::MemoryStore;

use std::fmt::Debug;

use crate::core::error::StoreError;
use crate::core::record::Record;

pub trait Store: Send + Sync + Debug {
    /// Persists `record` and returns the identity-bearing copy.
    ///
    /// A record without identity is given a fresh one; a caller-supplied
    /// identity is kept. An identity that already belongs to a live record
    /// fails with [`StoreError::DuplicateIdentity`], and an identity with no
    /// successor (`u64::MAX`) fails with [`StoreError::Unavailable`].
    /// Retrying a save is not guaranteed to be idempotent.
    fn save(&self, record: &Record) -> Result<Record, StoreError>;

    /// Removes `record` by identity. Records without identity and unknown
    /// identities are a no-op.
    fn delete(&self, record: &Record) -> Result<(), StoreError>;

    /// Removes every record in `records` as a single bulk operation.
    fn delete_all(&self, records: &[Record]) -> Result<(), StoreError>;

    /// Every persisted record, in ascending identity order.
    fn find_all(&self) -> Result<Vec<Record>, StoreError>;
}
