//! # Syncher Testkit
//!
//! Testing utilities for Syncher.
//!
//! - **Fixtures**: a [`Harness`] wrapping a sequencer, in-process and
//!   wire-connected instances, and an [`EventLog`] for asserting on events
//! - **Generators**: proptest strategies for record data and operations
//! - **Fault injection**: [`FlakyTransport`] fails requests on demand
//!
//! ```rust,no_run
//! use syncher_testkit::{sample_data, watch, Harness};
//!
//! # async fn example() {
//! let harness = Harness::new();
//! let doc = harness.server_instance(sample_data());
//! let mut events = watch(&doc);
//! doc.create().await.unwrap();
//! assert!(events.next().await.is_some());
//! # }
//! ```

pub mod fixtures;
pub mod flaky;
pub mod generators;

pub use fixtures::{eventually, init_tracing, instance, sample_data, watch, EventLog, Harness};
pub use flaky::FlakyTransport;
