//! Service descriptor model.
//!
//! A descriptor is the static, immutable configuration of one managed
//! service. Descriptors are loaded once at startup and never change for the
//! lifetime of the supervisor.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Static configuration for one managed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceDescriptor {
    /// Unique service name
    pub id: String,

    /// How to launch the service
    pub start: StartSpec,

    /// Services that must be healthy before this one starts
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    /// How to evaluate the service's health
    #[serde(default)]
    pub health_check: HealthCheckSpec,

    /// When and how to restart the service
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Optional resource usage thresholds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
}

impl ServiceDescriptor {
    /// Create a descriptor with default health check and restart policy.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start: StartSpec::new(command),
            depends_on: BTreeSet::new(),
            health_check: HealthCheckSpec::default(),
            restart_policy: RestartPolicy::default(),
            resource_limits: None,
        }
    }

    /// Builder-style helper to add a dependency.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.insert(dependency.into());
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_health_check(mut self, health_check: HealthCheckSpec) -> Self {
        self.health_check = health_check;
        self
    }

    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }
}

/// Process launch specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StartSpec {
    /// Command to execute (a bare name is resolved through `PATH`)
    pub command: String,

    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// File that receives the process's stdout (appended). When unset, each
    /// line is re-emitted as a log event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,

    /// File that receives the process's stderr (appended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<PathBuf>,
}

impl StartSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            stdout: None,
            stderr: None,
        }
    }
}

/// Kind of health evaluation performed for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    /// Healthy iff the process is alive
    #[default]
    ProcessOnly,
    /// HTTP GET against `target`; 2xx is healthy
    HttpPing,
    /// Run `target` with `args`; exit code 0 is healthy
    CustomScript,
    /// TCP connect to `target` (`host:port`)
    TcpConnect,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessOnly => "process-only",
            Self::HttpPing => "http-ping",
            Self::CustomScript => "custom-script",
            Self::TcpConnect => "tcp-connect",
        }
    }

    /// Whether the check needs a `target`.
    pub const fn requires_target(&self) -> bool {
        !matches!(self, Self::ProcessOnly)
    }
}

/// Health check specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthCheckSpec {
    /// Check kind
    #[serde(default)]
    pub kind: CheckKind,

    /// URL, script path or `host:port`, depending on `kind`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Arguments for `custom-script` checks
    #[serde(default)]
    pub args: Vec<String>,

    /// Upper bound on a single check
    #[serde(default = "default_check_timeout_ms")]
    pub timeout_ms: u64,

    /// Successful `http-ping` responses slower than this are `Degraded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_latency_ms: Option<u64>,
}

const fn default_check_timeout_ms() -> u64 {
    5_000
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            kind: CheckKind::ProcessOnly,
            target: None,
            args: Vec::new(),
            timeout_ms: default_check_timeout_ms(),
            degraded_latency_ms: None,
        }
    }
}

impl HealthCheckSpec {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            kind: CheckKind::HttpPing,
            target: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn script(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: CheckKind::CustomScript,
            target: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            kind: CheckKind::TcpConnect,
            target: Some(address.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn degraded_latency(&self) -> Option<Duration> {
        self.degraded_latency_ms.map(Duration::from_millis)
    }
}

/// How `Degraded` probe results feed the failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    /// Degraded results touch neither the failure nor the success streak
    #[default]
    Informational,
    /// A Degraded streak lasting at least this many seconds counts as failure
    EscalateAfterSecs(u64),
}

/// Restart policy for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestartPolicy {
    /// Consecutive failures that trigger a restart
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Base delay before a restart attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Cap on the restart delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Window after a restart during which failures do not trigger another restart
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_after_restart_ms: u64,

    /// Restarts without a sustained-healthy period before auto-restart is
    /// suspended and the failure escalated
    #[serde(default = "default_flap_threshold")]
    pub flap_threshold: u32,

    /// Consecutive healthy probes that count as a sustained-healthy period
    #[serde(default = "default_sustained_healthy_probes")]
    pub sustained_healthy_probes: u32,

    /// Treatment of Degraded probe results. Written either as
    /// `informational` or as `{ escalate_after_secs: N }`.
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub degraded_policy: DegradedPolicy,
}

const fn default_max_consecutive_failures() -> u32 {
    3
}

const fn default_backoff_base_ms() -> u64 {
    1_000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

const fn default_cooldown_ms() -> u64 {
    10_000
}

const fn default_flap_threshold() -> u32 {
    5
}

const fn default_sustained_healthy_probes() -> u32 {
    3
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            cooldown_after_restart_ms: default_cooldown_ms(),
            flap_threshold: default_flap_threshold(),
            sustained_healthy_probes: default_sustained_healthy_probes(),
            degraded_policy: DegradedPolicy::Informational,
        }
    }
}

impl RestartPolicy {
    /// Delay before the next start attempt: `min(base * 2^restart_count, max)`.
    pub fn backoff_delay(&self, restart_count: u32) -> Duration {
        let factor = 1u64.checked_shl(restart_count).unwrap_or(u64::MAX);
        let delay_ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay_ms)
    }

    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_after_restart_ms)
    }
}

/// Resource usage thresholds. Exceeding one downgrades a healthy probe to
/// `Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ResourceLimits {
    /// Resident memory ceiling in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,

    /// CPU usage ceiling in percent of one core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu_percent: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RestartPolicy {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..RestartPolicy::default()
        };

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(63), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_yaml_descriptor_parsing() {
        let yaml = r"
id: api
start:
  command: /usr/bin/api-server
  args: [--port, '8080']
  env:
    RUST_LOG: info
depends_on: [postgres]
health_check:
  kind: http-ping
  target: http://127.0.0.1:8080/health
  timeout_ms: 2000
  degraded_latency_ms: 500
restart_policy:
  max_consecutive_failures: 4
  degraded_policy:
    escalate_after_secs: 600
resource_limits:
  max_memory_mb: 512
";
        let descriptor: ServiceDescriptor = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(descriptor.id, "api");
        assert_eq!(descriptor.start.args, vec!["--port", "8080"]);
        assert!(descriptor.depends_on.contains("postgres"));
        assert_eq!(descriptor.health_check.kind, CheckKind::HttpPing);
        assert_eq!(descriptor.health_check.timeout(), Duration::from_secs(2));
        assert_eq!(
            descriptor.health_check.degraded_latency(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(descriptor.restart_policy.max_consecutive_failures, 4);
        assert_eq!(descriptor.restart_policy.backoff_base_ms, 1_000);
        assert_eq!(
            descriptor.restart_policy.degraded_policy,
            DegradedPolicy::EscalateAfterSecs(600)
        );
        assert_eq!(
            descriptor.resource_limits.and_then(|l| l.max_memory_mb),
            Some(512)
        );
    }

    #[test]
    fn test_degraded_policy_accepts_both_forms() {
        let plain: RestartPolicy =
            serde_yaml::from_str("degraded_policy: informational").expect("YAML should parse");
        assert_eq!(plain.degraded_policy, DegradedPolicy::Informational);

        let json: RestartPolicy =
            serde_json::from_str(r#"{"degraded_policy": {"escalate_after_secs": 30}}"#).unwrap();
        assert_eq!(json.degraded_policy, DegradedPolicy::EscalateAfterSecs(30));

        let written = serde_yaml::to_string(&json).unwrap();
        assert!(written.contains("escalate_after_secs: 30"));
    }

    #[test]
    fn test_minimal_descriptor_uses_defaults() {
        let yaml = "id: worker\nstart:\n  command: worker\n";
        let descriptor: ServiceDescriptor = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert!(descriptor.depends_on.is_empty());
        assert_eq!(descriptor.health_check, HealthCheckSpec::default());
        assert_eq!(descriptor.restart_policy, RestartPolicy::default());
        assert_eq!(
            descriptor.restart_policy.degraded_policy,
            DegradedPolicy::Informational
        );
    }
}
