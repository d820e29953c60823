//! Error types for Syncher Core.

use thiserror::Error;

/// Errors raised while validating or applying an operation.
///
/// These are caller errors: they are detected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("field `{0}` is reserved")]
    ReservedKey(String),

    #[error("field `{0}` is not an array")]
    NotAnArray(String),

    #[error("merge-by-id patch for field `{0}` has no id")]
    MissingElementId(String),

    #[error("patch must be a JSON object")]
    NotAnObject,

    #[error("invalid record id: {0}")]
    InvalidId(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
