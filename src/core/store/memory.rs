use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::error::StoreError;
use crate::core::record::{Record, RecordId};
use crate::core::store::Store;

/// Volatile store keyed by identity. Useful for tests and for embedding the
/// queue where durability is provided elsewhere.
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.read().contains_key(&id)
    }
}

impl Store for MemoryStore {
    fn save(&self, record: &Record) -> Result<Record, StoreError> {
        let mut map = self.records.write();
        let id = match record.id() {
            Some(id) => {
                if map.contains_key(&id) {
                    return Err(StoreError::DuplicateIdentity(id));
                }
                let next = id.value().checked_add(1).ok_or_else(exhausted)?;
                self.next_id.fetch_max(next, Ordering::Relaxed);
                id
            }
            None => self
                .next_id
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
                .map(RecordId::from_raw)
                .map_err(|_| exhausted())?,
        };

        let saved = record.with_identity(id);
        map.insert(id, saved.clone());
        Ok(saved)
    }

    fn delete(&self, record: &Record) -> Result<(), StoreError> {
        if let Some(id) = record.id() {
            self.records.write().remove(&id);
        }
        Ok(())
    }

    fn delete_all(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut map = self.records.write();
        for id in records.iter().filter_map(Record::id) {
            map.remove(&id);
        }
        Ok(())
    }

    fn find_all(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}

fn exhausted() -> StoreError {
    StoreError::Unavailable("identity space exhausted".to_string())
}
