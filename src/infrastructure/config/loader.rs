use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;

use crate::domain::errors::ConfigError;
use crate::domain::models::{AlertSinkConfig, Config};
use crate::services::descriptor_store::validate_descriptors;

/// Project config file, relative to the working directory
pub const PROJECT_CONFIG: &str = ".overwatch/config.yaml";

/// Optional local overrides, relative to the working directory
pub const LOCAL_CONFIG: &str = ".overwatch/local.yaml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "OVERWATCH_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .overwatch/config.yaml
    /// 3. .overwatch/local.yaml (optional)
    /// 4. Environment variables (OVERWATCH_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(PROJECT_CONFIG))
            .merge(Yaml::file(LOCAL_CONFIG))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(&figment)
    }

    /// Load configuration from a specific file. Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Load(format!("{} does not exist", path.display())));
        }

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(&figment)
    }

    /// `load_from_file` when a path is given, `load` otherwise.
    pub fn load_with(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    fn extract(figment: &Figment) -> Result<Config, ConfigError> {
        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        // Database
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        // Control loop
        let supervisor = &config.supervisor;
        if supervisor.probe_interval_ms == 0 {
            return Err(ConfigError::InvalidProbeInterval(supervisor.probe_interval_ms));
        }
        if supervisor.max_concurrent_probes == 0 {
            return Err(ConfigError::InvalidProbeConcurrency(supervisor.max_concurrent_probes));
        }
        for (field, value) in [
            ("startup_timeout_ms", supervisor.startup_timeout_ms),
            ("startup_probe_interval_ms", supervisor.startup_probe_interval_ms),
            ("spawn_timeout_ms", supervisor.spawn_timeout_ms),
            ("grace_timeout_ms", supervisor.grace_timeout_ms),
            ("alert_timeout_ms", supervisor.alert_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositiveTimeout { field });
            }
        }
        if supervisor.history_len == 0 {
            return Err(ConfigError::ValidationFailed(
                "history_len must be at least 1".to_string(),
            ));
        }

        // Alert sinks
        for sink in &config.alerts {
            if let AlertSinkConfig::Webhook { url, timeout_ms } = sink {
                if url.trim().is_empty() {
                    return Err(ConfigError::InvalidAlertSink("webhook url cannot be empty".to_string()));
                }
                if reqwest::Url::parse(url).is_err() {
                    return Err(ConfigError::InvalidAlertSink(format!("invalid webhook url '{url}'")));
                }
                if *timeout_ms == 0 {
                    return Err(ConfigError::NonPositiveTimeout { field: "webhook timeout_ms" });
                }
            }
        }

        // Managed services
        validate_descriptors(&config.services)
    }
}
