//! # Syncher
//!
//! Synchronized records: one logical record kept consistent across an
//! authoritative store and any number of live instances.
//!
//! ## Overview
//!
//! - **[`Syncher`]** instances cache a record locally. Mutations apply
//!   optimistically and are forwarded to the sequencer once the instance is
//!   filled (after `create()` or `load()`).
//! - The **[`Sequencer`]** authorizes each mutation against the record's
//!   secret, applies it to the store in a single order per record id, and
//!   broadcasts the canonical diff to every subscribed instance.
//! - Instances that called `synch(true)` apply remote diffs and emit
//!   `remoteupdate` then `update`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use syncher::{Sequencer, SequencerConfig, Syncher};
//! use syncher::store::SqliteStore;
//!
//! async fn example() -> syncher::Result<()> {
//!     let store = SqliteStore::open("records.db")?;
//!     let server = Arc::new(Sequencer::new(store, SequencerConfig::default()));
//!
//!     let doc = Syncher::builder(Arc::clone(&server))
//!         .data(json!({ "secret": "s3cr3t", "title": "draft" }))
//!         .build()?;
//!     doc.create().await?;
//!     doc.synch(true).await?;
//!
//!     doc.push("tags", vec![json!("biology")]).await?;
//!     doc.merge(json!({ "meta": { "reviewed": true } })).await?;
//!     println!("{}", doc.json());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `syncher::core` - Records, merge, mutation operators
//! - `syncher::store` - Store trait, SQLite and in-memory stores
//! - `syncher::auth` - Credentials and the authorization gate
//! - `syncher::channel` - Transport trait, topics, wire framing, retry

pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod sequencer;

// Re-export component crates
pub use syncher_auth as auth;
pub use syncher_channel as channel;
pub use syncher_core as core;
pub use syncher_store as store;

// Re-export main types for convenience
pub use config::{BackoffConfig, SequencerConfig, SyncherConfig, WireConfig};
pub use error::{Result, SyncherError};
pub use events::{Event, EventKind, ListenerId};
pub use instance::{Status, Syncher, SyncherBuilder};
pub use sequencer::Sequencer;

pub use syncher_core::{Data, Diff, LiveId, RecordId, Secret};
