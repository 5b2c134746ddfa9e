//! # treadmill-events
//!
//! Trace event definitions and encoding for the treadmill scheduler.
//!
//! ## Design Principles
//!
//! - A trace event is an immutable record of exactly one lifecycle transition
//! - Events are append-only; readers never expect them to be rewritten
//! - Every event belongs to exactly one subject: an instance or a server
//!
//! ## Trace Record
//!
//! All events share a common record with:
//! - `timestamp` (unix seconds, fractional)
//! - `source` (the component that observed the transition)
//! - `subject` (instance id or server name)
//! - `event_type` and `event_data` (the encoded event)
//! - an optional JSON `payload`
//!
//! ## Event Types
//!
//! - Instance events: `scheduled`, `pending`, `pending_delete`, `configured`,
//!   `deleted`, `finished`, `aborted`, `killed`, `service_running`,
//!   `service_exited`
//! - Server events: `server_state`, `server_blackout`, `server_blackout_cleared`

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
