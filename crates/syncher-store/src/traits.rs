//! Store trait: the abstract interface for record persistence.
//!
//! This trait allows the sequencer to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests and embedding).

use async_trait::async_trait;
use syncher_core::{Record, RecordId};

use crate::error::Result;

/// Precondition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Write unconditionally.
    Always,
    /// Write only if no record (or tombstone) exists under the id.
    IfAbsent,
    /// Write only if the stored record is at exactly this version.
    IfVersion(u64),
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// The record was written.
    Written,
    /// `IfAbsent` failed: the id is taken.
    AlreadyExists,
    /// `IfVersion` failed; `current` is the stored version (`None` if absent).
    VersionMismatch { current: Option<u64> },
}

/// The Store trait: async key-value interface over a persistence backend.
///
/// Conditional writes let the sequencer serialize updates per id without
/// external locking: a compare-and-set on `version` either lands atomically
/// or reports the version it lost against.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a record (including tombstones) by id.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Write a record subject to `condition`.
    async fn put(&self, record: &Record, condition: PutCondition) -> Result<PutResult>;

    /// Remove a record outright. Returns whether anything was removed.
    async fn delete(&self, id: &RecordId) -> Result<bool>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        (**self).get(id).await
    }

    async fn put(&self, record: &Record, condition: PutCondition) -> Result<PutResult> {
        (**self).put(record, condition).await
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        (**self).delete(id).await
    }
}
