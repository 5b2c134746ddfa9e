//! # treadmill-id
//!
//! Names used by the treadmill scheduler and everything that talks to it.
//!
//! ## Design Principles
//!
//! - Names have one canonical string form with strict parsing
//! - Names roundtrip (parse → format → parse)
//! - Names are typed so instance ids and event markers cannot be mixed up
//!
//! ## Name Formats
//!
//! - Application: `{proid}.{name}`, e.g. `treadmld.web`
//! - Scheduled instance: `{proid}.{name}#{sequence}`, e.g. `treadmld.web#0000000042`
//! - Event marker: `{priority:03}-{resource}-{sequence}`, e.g. `007-servers-0000000042`
//!
//! Sequences are the zero padded, ten digit suffixes assigned by the
//! coordination store when it creates a sequence node.

mod error;
mod macros;
mod marker;
mod types;

pub use error::IdError;
pub use marker::{MarkerName, MAX_PRIORITY};
pub use types::*;
