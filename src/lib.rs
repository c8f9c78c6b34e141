//! custq – a bounded, durable work queue.
//!
//! This crate exports
//!  * `core`    – records, the bounded blocking queue, durable stores and
//!    the queue service tying them together
//!  * `config`  – TOML/YAML + environment runtime configuration
//!  * `logging` – tracing subscriber setup
//!
//! The queue holds a small fixed number of in-flight records in memory and
//! mirrors them into a durable store on a best-effort basis. After a restart
//! [`QueueService::synchronise`] rebuilds the in-memory queue from the store.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{Config, ConfigError};
pub use crate::core::error::{Operation, QueueError, StoreError};
pub use crate::core::queue::BoundedQueue;
pub use crate::core::record::{Record, RecordId};
pub use crate::core::service::{QueueService, SyncReport};
pub use crate::core::store::{LogStore, LogStoreConfig, MemoryStore, Store};
