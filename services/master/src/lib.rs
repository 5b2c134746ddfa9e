//! Treadmill master library.
//!
//! The crate ships the `treadmill-master` binary. The control loop, the
//! master API and the cell model are exposed for tooling and integration
//! tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod integrity;
pub mod loader;
pub mod master;
pub mod model;
pub mod paths;
pub mod persist;
pub mod trace;

pub use error::{MasterError, MasterResult, QuotaExceeded};
pub use master::Master;
