//! Runtime instance model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a managed service.
///
/// `Running` is the only state in which the service is fully available.
/// There is no terminal state while the supervisor is alive: a service that
/// keeps failing cycles through `Failing -> Restarting -> CoolingDown`.
/// `Stopped` is only entered during supervisor shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Launched, waiting for its first healthy probe
    #[default]
    Starting,
    /// Healthy and available
    Running,
    /// Responding, but slow or over a resource threshold
    Degraded,
    /// Accumulating failed probes
    Failing,
    /// Being stopped and relaunched
    Restarting,
    /// Relaunched; failures do not trigger another restart yet
    CoolingDown,
    /// Stopped by supervisor shutdown
    Stopped,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Failing => "failing",
            Self::Restarting => "restarting",
            Self::CoolingDown => "cooling_down",
            Self::Stopped => "stopped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "degraded" => Some(Self::Degraded),
            "failing" => Some(Self::Failing),
            "restarting" => Some(Self::Restarting),
            "cooling_down" => Some(Self::CoolingDown),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Whether the service is fully available.
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running (or most recently run) occurrence of a service.
///
/// The OS process handle itself stays inside the launcher; this record only
/// carries identifiers. A restart produces a new instance rather than
/// mutating the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique identifier of this occurrence
    pub instance_id: Uuid,
    /// Descriptor this instance was launched from
    pub descriptor_id: String,
    /// OS process id, when known
    pub pid: Option<u32>,
    /// Current lifecycle state
    pub state: ServiceState,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
    /// Exit code observed when the process terminated
    pub last_exit_code: Option<i32>,
}

impl ServiceInstance {
    pub fn new(descriptor_id: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            descriptor_id: descriptor_id.into(),
            pid,
            state: ServiceState::Starting,
            started_at: Utc::now(),
            last_exit_code: None,
        }
    }
}

/// Outcome of a graceful stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopResult {
    /// Exited within the grace period
    GracefulExit,
    /// Ignored the termination signal and was killed
    ForcedKill,
    /// Was not running when the stop was requested
    AlreadyExited,
}
