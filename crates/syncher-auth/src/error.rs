//! Error types for the authorization gate.

use thiserror::Error;

use syncher_core::RecordId;

/// Errors that can occur during authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The credential does not match the record's secret.
    #[error("unauthorized: bad secret for record {0}")]
    BadSecret(RecordId),

    /// A private-mode credential arrived from outside the process.
    #[error("unauthorized: private credential from remote origin for record {0}")]
    RemotePrivate(RecordId),
}

/// Result type for authorization.
pub type Result<T> = std::result::Result<T, AuthError>;
