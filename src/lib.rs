//! Overwatch - single-node service supervisor
//!
//! Overwatch launches a set of interdependent services in dependency order,
//! probes their health on a fixed interval, and restarts failing services
//! with exponential backoff. A service that keeps failing after restarts is
//! escalated to an alert sink instead of being restarted forever. Health
//! state survives supervisor restarts.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): descriptor store, health state,
//!   recovery policy and the orchestrator control loop
//! - **Application Layer** (`application`): process launcher, health prober
//!   and supervisor assembly
//! - **Adapters** (`adapters`): `SQLite` and in-memory health storage, alert sinks
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use overwatch::{ConfigLoader, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let supervisor = Supervisor::from_config(&config, false).await?;
//!     supervisor.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{Supervisor, SupervisorParts};
pub use domain::errors::{ConfigError, StartError, SupervisorError, SupervisorResult};
pub use domain::models::{
    Config, HealthRecord, ProbeOutcome, ProbeResult, ServiceDescriptor, ServiceInstance,
    ServiceState,
};
pub use domain::ports::{AlertSink, HealthProber, HealthRepository, ServiceLauncher};
pub use infrastructure::config::ConfigLoader;
pub use services::{Orchestrator, ServiceStatus};
