//! # widecol client
//!
//! Bulk mutation batching and partial-failure retry for widecol tables.
//!
//! This crate provides:
//! - `BulkMutator`, which executes one MutateRows attempt at a time and
//!   sorts each entry into succeeded, retry, or final failure
//! - Idempotency and retryability policies
//! - `BulkApplier`, a retry loop with exponential backoff
//! - Transport abstraction plus scripted and loopback implementations
//!
//! ## Architecture
//!
//! A batch is sent as one streaming request. The server answers with the
//! outcome of each entry, addressed by its position *in that request*. The
//! engine maps positions back to the entry's index in the original batch,
//! resends only entries that failed transiently and are safe to resend, and
//! accounts for every entry exactly once.
//!
//! ## Key Invariants
//!
//! - Every entry ends either applied or in `extract_final_failures()`
//! - Final failures carry the entry's original batch index
//! - Non-idempotent entries are never sent twice
//! - An entry with no reported outcome is never silently dropped
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use widecol_client::{BulkApplier, LoopbackTable, LoopbackTransport, TableConfig};
//! use widecol_protocol::{BulkMutation, Entry, Mutation};
//!
//! let table = Arc::new(LoopbackTable::new("tables/users"));
//! let applier = BulkApplier::new(
//!     TableConfig::new("tables/users"),
//!     LoopbackTransport::new(Arc::clone(&table)),
//! )
//! .unwrap();
//!
//! let batch = BulkMutation::new()
//!     .with(Entry::single("alice", Mutation::set_cell("profile", "name", 1, "Alice")))
//!     .with(Entry::single("bob", Mutation::increment("stats", "logins", 1)));
//!
//! let report = applier.bulk_apply(batch).unwrap();
//! assert!(report.is_success());
//! assert_eq!(table.counter("bob", "stats", "logins"), Some(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod engine;
mod error;
mod loopback;
mod policy;
mod transport;

pub use config::{RetryConfig, TableConfig};
pub use driver::{BulkApplier, BulkApplyReport};
pub use engine::{BulkMutator, BulkStats, FailureStatus, FinalFailure};
pub use error::{ClientError, ClientResult};
pub use loopback::{AttemptFaults, Fault, LoopbackStream, LoopbackTable, LoopbackTransport};
pub use policy::{
    AlwaysRetryPolicy, DefaultRetryability, IdempotencyPolicy, RetryabilityPolicy, RetryableCodes,
    SafeIdempotencyPolicy,
};
pub use transport::{
    AttemptScript, MutationStream, MutationTransport, ScriptedStream, ScriptedTransport,
};
