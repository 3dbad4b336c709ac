//! In-process adapters, used by tests and by `--ephemeral` runs.

pub mod health_repository;

pub use health_repository::InMemoryHealthRepository;
