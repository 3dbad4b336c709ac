//! Alert sink port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::SupervisorResult;
use crate::domain::models::ProbeResult;

/// Why automated recovery was handed off to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// The service kept failing after repeated restarts.
    CrashLoop { restarts: u32 },
    /// The service could not even be launched on repeated attempts.
    SpawnFailing { restarts: u32, error: String },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CrashLoop { restarts } => {
                write!(f, "still failing after {restarts} restarts; auto-restart suspended")
            }
            Self::SpawnFailing { restarts, error } => {
                write!(f, "failed to launch after {restarts} attempts ({error}); auto-restart suspended")
            }
        }
    }
}

/// Escalation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub service_id: String,
    pub reason: EscalationReason,
    /// Newest first
    pub recent_history: Vec<ProbeResult>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        service_id: impl Into<String>,
        reason: EscalationReason,
        recent_history: Vec<ProbeResult>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            reason,
            recent_history,
            raised_at: Utc::now(),
        }
    }
}

/// External notifier invoked on escalation.
///
/// Callers treat delivery as fire-and-forget under their own timeout; an
/// error here is logged and never blocks recovery.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> SupervisorResult<()>;
}
