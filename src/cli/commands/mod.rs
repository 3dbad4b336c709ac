//! CLI command implementations.

pub mod history;
pub mod run;
pub mod status;
pub mod validate;
