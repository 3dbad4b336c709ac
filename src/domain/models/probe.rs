//! Probe result model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy,
    /// Working, but slow or over a resource threshold
    Degraded,
    Unhealthy,
    /// The probe could not reach a verdict
    Unknown,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unhealthy" => Some(Self::Unhealthy),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of one probe. Appended to history, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub service_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: ProbeOutcome,
    /// Wall-clock time the check took
    pub latency_ms: u64,
    /// Free-form diagnostic
    pub detail: String,
}

impl ProbeResult {
    pub fn new(
        service_id: impl Into<String>,
        outcome: ProbeOutcome,
        latency: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            timestamp: Utc::now(),
            outcome,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            detail: detail.into(),
        }
    }

    pub fn healthy(service_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(service_id, ProbeOutcome::Healthy, Duration::ZERO, detail)
    }

    pub fn unhealthy(service_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(service_id, ProbeOutcome::Unhealthy, Duration::ZERO, detail)
    }

    /// A check that did not finish within its timeout counts as unhealthy.
    pub fn timed_out(service_id: impl Into<String>, timeout: Duration) -> Self {
        Self::new(service_id, ProbeOutcome::Unhealthy, timeout, "timeout")
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}
