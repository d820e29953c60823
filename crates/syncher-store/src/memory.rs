//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use syncher_core::{Record, RecordId};

use crate::error::{Result, StoreError};
use crate::traits::{PutCondition, PutResult, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; each
/// conditional write checks and writes under one write lock, so it is atomic.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordId, Record>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, tombstones included.
    pub fn len(&self) -> Result<usize> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Poisoned(e.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).cloned())
    }

    async fn put(&self, record: &Record, condition: PutCondition) -> Result<PutResult> {
        let mut records = self.records.write().map_err(poisoned)?;

        match condition {
            PutCondition::Always => {}
            PutCondition::IfAbsent => {
                if records.contains_key(&record.id) {
                    return Ok(PutResult::AlreadyExists);
                }
            }
            PutCondition::IfVersion(expected) => {
                let current = records.get(&record.id).map(|r| r.version);
                if current != Some(expected) {
                    return Ok(PutResult::VersionMismatch { current });
                }
            }
        }

        records.insert(record.id.clone(), record.clone());
        Ok(PutResult::Written)
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syncher_core::Secret;

    fn make_record(id: &str) -> Record {
        let data = match json!({ "foo": "foo", "baz": 321 }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        Record::new(RecordId::new(id), Secret::new("secret"), data)
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let record = make_record("r1");

        let result = store.put(&record, PutCondition::IfAbsent).await.unwrap();
        assert_eq!(result, PutResult::Written);

        let retrieved = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(retrieved, record);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_if_absent() {
        let store = MemoryStore::new();
        let record = make_record("r1");

        let r1 = store.put(&record, PutCondition::IfAbsent).await.unwrap();
        assert_eq!(r1, PutResult::Written);

        let r2 = store.put(&record, PutCondition::IfAbsent).await.unwrap();
        assert_eq!(r2, PutResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_memory_store_compare_and_set() {
        let store = MemoryStore::new();
        let mut record = make_record("r1");
        store.put(&record, PutCondition::IfAbsent).await.unwrap();

        record.version = 1;
        let ok = store.put(&record, PutCondition::IfVersion(0)).await.unwrap();
        assert_eq!(ok, PutResult::Written);

        let stale = store.put(&record, PutCondition::IfVersion(0)).await.unwrap();
        assert_eq!(stale, PutResult::VersionMismatch { current: Some(1) });

        let missing = store
            .put(&make_record("nope"), PutCondition::IfVersion(0))
            .await
            .unwrap();
        assert_eq!(missing, PutResult::VersionMismatch { current: None });
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        let record = make_record("r1");
        store.put(&record, PutCondition::Always).await.unwrap();

        assert!(store.delete(&record.id).await.unwrap());
        assert!(!store.delete(&record.id).await.unwrap());
        assert!(store.get(&record.id).await.unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }
}
