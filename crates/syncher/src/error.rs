//! Error types for Syncher.

use thiserror::Error;

use syncher_channel::{ChannelError, RejectCode};
use syncher_core::{CoreError, RecordId};
use syncher_store::StoreError;

/// Errors surfaced by instances and the sequencer.
#[derive(Debug, Error)]
pub enum SyncherError {
    /// No live record with this id.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The id is taken (possibly by a destroyed record).
    #[error("record already exists: {0}")]
    AlreadyExists(RecordId),

    /// Bad secret, or a private credential from outside the process.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The record or instance was destroyed.
    #[error("record already destroyed: {0}")]
    AlreadyDestroyed(RecordId),

    /// The channel to the sequencer failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] ChannelError),

    /// The operation is malformed for the current data.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The instance is in the wrong lifecycle state for this call.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The sequencer answered with a reply of the wrong kind.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The sequencer failed internally.
    #[error("sequencer failure: {0}")]
    Internal(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<CoreError> for SyncherError {
    fn from(err: CoreError) -> Self {
        SyncherError::InvalidOperation(err.to_string())
    }
}

impl SyncherError {
    /// Map a sequencer rejection back onto the error taxonomy.
    pub fn from_rejection(record_id: &RecordId, code: RejectCode, message: String) -> Self {
        match code {
            RejectCode::NotFound => SyncherError::NotFound(record_id.clone()),
            RejectCode::AlreadyExists => SyncherError::AlreadyExists(record_id.clone()),
            RejectCode::Unauthorized => SyncherError::Unauthorized(message),
            RejectCode::AlreadyDestroyed => SyncherError::AlreadyDestroyed(record_id.clone()),
            RejectCode::InvalidOperation => SyncherError::InvalidOperation(message),
            RejectCode::Internal => SyncherError::Internal(message),
        }
    }
}

/// Result type for Syncher operations.
pub type Result<T> = std::result::Result<T, SyncherError>;
