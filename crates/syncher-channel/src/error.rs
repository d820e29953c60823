//! Error types for the channel module.

use thiserror::Error;

/// Errors that can occur while talking to a sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The request was not delivered; retrying is safe.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The connection closed while a request was in flight.
    #[error("connection closed")]
    Closed,

    /// No reply within the configured deadline.
    #[error("request timed out")]
    Timeout,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer answered with a frame that does not fit the request.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    /// Whether the request can be retried without risk of double delivery.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
