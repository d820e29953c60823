//! Configuration for the sequencer and instances.

pub use syncher_channel::{BackoffConfig, WireConfig};

/// Configuration for the [`crate::Sequencer`].
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Compare-and-set attempts per mutation before giving up.
    pub cas_retries: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self { cas_retries: 8 }
    }
}

/// Configuration for a [`crate::Syncher`] instance.
#[derive(Debug, Clone)]
pub struct SyncherConfig {
    /// How often `load()` re-reads when a newer broadcast was applied while
    /// the read was in flight.
    pub load_attempts: u32,
}

impl Default for SyncherConfig {
    fn default() -> Self {
        Self { load_attempts: 3 }
    }
}
