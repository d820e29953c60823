//! # Syncher Store
//!
//! Store adapter for Syncher. Provides a trait-based interface for record
//! persistence with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait: `get`, conditional `put`, `delete`
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests and embedding
//! - [`PutCondition`] / [`PutResult`] - Compare-and-set on record version
//!
//! ## Usage
//!
//! ```rust,no_run
//! use syncher_store::{PutCondition, SqliteStore, Store};
//! use syncher_core::{Data, Record, RecordId, Secret};
//!
//! async fn example() -> syncher_store::Result<()> {
//!     let store = SqliteStore::open("records.db")?;
//!     let record = Record::new(RecordId::random(), Secret::random(), Data::new());
//!     store.put(&record, PutCondition::IfAbsent).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - Destroyed records stay behind as tombstones so their id cannot be reused
//! - `IfVersion` writes are atomic per backend; the sequencer builds its
//!   per-record ordering on top of them

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{PutCondition, PutResult, Store};
