//! Adapters implementing the domain ports.

pub mod alerts;
pub mod memory;
pub mod sqlite;
