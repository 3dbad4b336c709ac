pub mod config;
pub mod health;
pub mod instance;
pub mod probe;
pub mod service;

pub use config::{
    AlertSinkConfig, Config, DatabaseConfig, LoggingConfig, SupervisorConfig,
};
pub use health::HealthRecord;
pub use instance::{ServiceInstance, ServiceState, StopResult};
pub use probe::{ProbeOutcome, ProbeResult};
pub use service::{
    CheckKind, DegradedPolicy, HealthCheckSpec, ResourceLimits, RestartPolicy,
    ServiceDescriptor, StartSpec,
};
