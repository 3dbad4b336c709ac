//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - YAML file loading
//! - Environment variable overrides
//! - Configuration validation, including the descriptor set

pub mod loader;

pub use loader::ConfigLoader;
