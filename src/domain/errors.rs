//! Error taxonomy for the supervisor.

use thiserror::Error;

/// Format a cycle path as a human-readable string: `a -> b -> c -> a`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Configuration errors. Every variant is fatal at startup: no service is
/// launched when the configuration or descriptor set is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid probe_interval_ms: {0}. Must be positive")]
    InvalidProbeInterval(u64),

    #[error("Invalid max_concurrent_probes: {0}. Must be at least 1")]
    InvalidProbeConcurrency(usize),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Invalid {field}: must be positive")]
    NonPositiveTimeout { field: &'static str },

    #[error("No services configured")]
    NoServices,

    #[error("Service id cannot be empty")]
    EmptyServiceId,

    #[error("Duplicate service id: {0}")]
    DuplicateServiceId(String),

    #[error("Service '{0}' start command cannot be empty")]
    EmptyCommand(String),

    #[error("Service '{service_id}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        service_id: String,
        dependency: String,
    },

    #[error("Service dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Service '{service_id}' has invalid restart policy: {reason}")]
    InvalidRestartPolicy { service_id: String, reason: String },

    #[error("Service '{service_id}' has invalid health check: {reason}")]
    InvalidHealthCheck { service_id: String, reason: String },

    #[error("Invalid alert sink: {0}")]
    InvalidAlertSink(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Supervisor-level errors.
///
/// Only [`SupervisorError::Configuration`] and [`SupervisorError::Storage`]
/// abort the supervisor. Everything else is contained to the service it
/// concerns and fed into that service's recovery state machine.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Failed to spawn service '{service_id}': {source}")]
    SpawnFailure {
        service_id: String,
        #[source]
        source: StartError,
    },

    #[error("Health probe for '{service_id}' timed out after {timeout_ms}ms")]
    ProbeTimeout { service_id: String, timeout_ms: u64 },

    #[error("Dependency '{dependency}' of '{service_id}' is unavailable")]
    DependencyUnavailable {
        service_id: String,
        dependency: String,
    },

    #[error("Alert delivery failed: {0}")]
    AlertDelivery(String),

    #[error("Health state storage error: {0}")]
    Storage(String),

    #[error("Service '{service_id}' did not become healthy within {timeout_ms}ms")]
    StartupTimeout { service_id: String, timeout_ms: u64 },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,
}

impl SupervisorError {
    /// Whether this error must stop the whole supervisor.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Storage(_))
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

impl From<sqlx::Error> for SupervisorError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Why a service could not be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartErrorReason {
    /// The OS refused to create the process.
    SpawnFailed,
    /// The command or working directory does not exist.
    PathInvalid,
}

impl std::fmt::Display for StartErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SpawnFailed => write!(f, "spawn failed"),
            Self::PathInvalid => write!(f, "path invalid"),
        }
    }
}

/// Error returned by a launcher when a service cannot be started.
#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct StartError {
    pub reason: StartErrorReason,
    pub message: String,
}

impl StartError {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self {
            reason: StartErrorReason::SpawnFailed,
            message: message.into(),
        }
    }

    pub fn path_invalid(message: impl Into<String>) -> Self {
        Self {
            reason: StartErrorReason::PathInvalid,
            message: message.into(),
        }
    }
}
