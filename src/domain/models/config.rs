use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::service::ServiceDescriptor;

/// Main configuration structure for Overwatch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Control loop settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Health state database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Alert sinks invoked on escalation
    #[serde(default)]
    pub alerts: Vec<AlertSinkConfig>,

    /// Managed services
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

/// Control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Interval between steady-state probe cycles
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Maximum number of probes in flight across all services
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Time a service has to report its first healthy probe at startup
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Interval between probes while waiting for a service to come up
    #[serde(default = "default_startup_probe_interval_ms")]
    pub startup_probe_interval_ms: u64,

    /// Upper bound on launching a service process
    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_timeout_ms: u64,

    /// Grace period between the termination signal and a forced kill
    #[serde(default = "default_grace_timeout_ms")]
    pub grace_timeout_ms: u64,

    /// Upper bound on a single alert delivery
    #[serde(default = "default_alert_timeout_ms")]
    pub alert_timeout_ms: u64,

    /// Probe results kept per service
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

const fn default_probe_interval_ms() -> u64 {
    5_000
}

const fn default_max_concurrent_probes() -> usize {
    4
}

const fn default_startup_timeout_ms() -> u64 {
    30_000
}

const fn default_startup_probe_interval_ms() -> u64 {
    250
}

const fn default_spawn_timeout_ms() -> u64 {
    5_000
}

const fn default_grace_timeout_ms() -> u64 {
    10_000
}

const fn default_alert_timeout_ms() -> u64 {
    5_000
}

const fn default_history_len() -> usize {
    50
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
            startup_timeout_ms: default_startup_timeout_ms(),
            startup_probe_interval_ms: default_startup_probe_interval_ms(),
            spawn_timeout_ms: default_spawn_timeout_ms(),
            grace_timeout_ms: default_grace_timeout_ms(),
            alert_timeout_ms: default_alert_timeout_ms(),
            history_len: default_history_len(),
        }
    }
}

impl SupervisorConfig {
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub const fn startup_probe_interval(&self) -> Duration {
        Duration::from_millis(self.startup_probe_interval_ms)
    }

    pub const fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub const fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.grace_timeout_ms)
    }

    pub const fn alert_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_timeout_ms)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".overwatch/health.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// Database file path, accepting an optional `sqlite:` prefix.
    pub fn file_path(&self) -> &str {
        self.path.strip_prefix("sqlite:").unwrap_or(&self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated JSON log files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation policy for file output: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Alert sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSinkConfig {
    /// Write escalations to the error log
    Log,
    /// POST escalations as JSON to a webhook
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout_ms")]
        timeout_ms: u64,
    },
}

const fn default_webhook_timeout_ms() -> u64 {
    3_000
}
