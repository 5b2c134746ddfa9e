//! Coordination store for the treadmill scheduler.
//!
//! The scheduler keeps all durable state in a hierarchical, watchable
//! key-value store. This crate provides:
//!
//! - **[`Backend`]**: the store contract (get/put/delete/list, sequence
//!   nodes, children and data watches, leader locks).
//! - **[`MemoryBackend`]**: an in-process implementation, used by tests and
//!   single-process deployments.
//! - **[`PgBackend`]**: a Postgres implementation using `LISTEN`/`NOTIFY` for
//!   watches and advisory locks for leader election.
//! - **[`StoreAdapter`]**: wraps any backend with retry-with-backoff for
//!   transient connectivity errors.
//! - **[`RecordingBackend`]**: wraps any backend and records the order of
//!   mutating calls, for tests that assert on persistence ordering.
//!
//! # Invariants
//!
//! - A missing node is never an error for reads: `get` yields `None`,
//!   `list` yields an empty list, `delete` yields `false`.
//! - `put` creates missing ancestors.
//! - `put` with `check_content` does not write, and does not fire watches,
//!   when the stored value is identical.
//! - Sequence suffixes are ten digit, zero padded and monotonic per parent.

mod backend;
mod canonical;
mod error;
pub mod json;
mod memory;
pub mod path;
mod postgres;
mod recording;
mod retry;

pub use backend::{Acl, Backend, ChildrenWatch, DataWatch, LockGuard, PutOptions, PutOutcome};
pub use canonical::{canonical_json, content_digest};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use postgres::{PgBackend, PgConfig};
pub use recording::{RecordedOp, RecordingBackend};
pub use retry::{BackoffPolicy, StoreAdapter};
