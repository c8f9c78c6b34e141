#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use custq::{MemoryStore, Record, RecordId, Store, StoreError};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = custq::logging::init_logging("custq=debug");
    });
}

/// Record with a caller-supplied identity, shaped like the seed data the
/// service tests use.
pub fn company(id: u64) -> Record {
    Record::with_id(
        RecordId::from_raw(id),
        format!("TestCo{id}"),
        format!("TestCo{id} Description"),
        "07423134565",
    )
}

pub fn ids(records: &[Record]) -> Vec<u64> {
    records
        .iter()
        .filter_map(Record::id)
        .map(RecordId::value)
        .collect()
}

/// In-memory store that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    saves: AtomicUsize,
    deletes: AtomicUsize,
    bulk_deletes: Mutex<Vec<Vec<RecordId>>>,
    pub fail_save: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_find_all: AtomicBool,
    /// Milliseconds `find_all` sleeps before answering.
    pub stall_find_all_ms: AtomicU64,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(&self) -> Vec<u64> {
        ids(&self.inner.find_all().unwrap())
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn bulk_deletes(&self) -> Vec<Vec<RecordId>> {
        self.bulk_deletes.lock().clone()
    }

    fn unavailable(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{what} switched off")))
        } else {
            Ok(())
        }
    }
}

impl Store for RecordingStore {
    fn save(&self, record: &Record) -> Result<Record, StoreError> {
        Self::unavailable(&self.fail_save, "save")?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(record)
    }

    fn delete(&self, record: &Record) -> Result<(), StoreError> {
        Self::unavailable(&self.fail_delete, "delete")?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(record)
    }

    fn delete_all(&self, records: &[Record]) -> Result<(), StoreError> {
        Self::unavailable(&self.fail_delete, "delete_all")?;
        self.bulk_deletes
            .lock()
            .push(records.iter().filter_map(Record::id).collect());
        self.inner.delete_all(records)
    }

    fn find_all(&self) -> Result<Vec<Record>, StoreError> {
        Self::unavailable(&self.fail_find_all, "find_all")?;
        let stall = self.stall_find_all_ms.load(Ordering::SeqCst);
        if stall > 0 {
            thread::sleep(Duration::from_millis(stall));
        }
        self.inner.find_all()
    }
}
