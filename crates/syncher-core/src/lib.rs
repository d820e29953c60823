//! # Syncher Core
//!
//! Pure primitives for Syncher: records, structural merge, and the mutation
//! operators that every replica applies identically.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over JSON-like record data.
//!
//! ## Key Types
//!
//! - [`Record`] - The durable, authoritative unit of synchronized state
//! - [`Snapshot`] - A record as seen by an instance (never carries the secret)
//! - [`RecordId`], [`Secret`], [`LiveId`] - Strongly typed identifiers
//! - [`Operation`] - The tagged union of mutations (update, merge, push, ...)
//!
//! ## Diffs
//!
//! Every operation produces a [`Diff`]: a mapping from top-level field to its
//! final state (`null` meaning "deleted"). Diffs are applied with
//! [`apply_diff`], which is idempotent, so replaying a diff is harmless.

pub mod error;
pub mod merge;
pub mod ops;
pub mod record;
pub mod types;

pub use error::{CoreError, Result};
pub use merge::{element_id, merge_into, merge_value, Shape};
pub use ops::{apply_diff, OpKind, Operation};
pub use record::{project, split_reserved, Data, Diff, Record, Snapshot, RESERVED_KEYS};
pub use types::{LiveId, RecordId, Secret};
