//! Store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// CBOR encoding or decoding of record data failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row does not describe a valid record.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    /// A writer panicked while holding the backend lock.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// The blocking worker running a statement panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
