//! Domain layer for the Overwatch supervisor
//!
//! Models, port traits and the error taxonomy. Nothing in here touches the
//! OS, the network or the database directly.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ConfigError, StartError, StartErrorReason, SupervisorError, SupervisorResult};
