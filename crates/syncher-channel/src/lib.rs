//! # Syncher Channel
//!
//! The channel between Syncher instances and the broadcast sequencer.
//!
//! ## Overview
//!
//! - [`Transport`] - request/reply plus topic membership, as an async trait
//! - [`Topics`] - record id -> subscriber queues; owned by the sequencer
//! - [`WireClient`] / [`serve`] - CBOR [`Frame`]s over a byte [`Connection`]
//! - [`RetryTransport`] - exponential backoff for transient failures
//!
//! ## Ordering
//!
//! Broadcasts for one record id are published in sequence order and every
//! queue is FIFO, so each subscriber observes them in order. Receivers still
//! drop anything at or below the last sequence they applied.

pub mod error;
pub mod messages;
pub mod retry;
pub mod topics;
pub mod transport;
pub mod wire;

pub use error::{ChannelError, Result};
pub use messages::{Broadcast, BroadcastEvent, RejectCode, Reply, Request};
pub use retry::{BackoffConfig, RetryTransport};
pub use topics::{Subscription, SubscriptionId, Topics};
pub use transport::Transport;
pub use wire::{serve, Connection, Frame, WireClient, WireConfig};
