//! Per-service health aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::ServiceState;
use super::probe::{ProbeOutcome, ProbeResult};
use super::service::{DegradedPolicy, RestartPolicy};

/// Aggregate derived from a service's probe history.
///
/// `consecutive_failures` and `consecutive_successes` are never both
/// nonzero. Restarting a service does not clear the failure streak; only a
/// new healthy probe does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub service_id: String,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_healthy_at: Option<DateTime<Utc>>,
    pub last_restart_at: Option<DateTime<Utc>>,
    /// Restarts since the last sustained-healthy period (the flap window)
    pub restart_count: u32,
    /// Restarts over the whole recorded history
    pub total_restarts: u64,
    /// Start of the current uninterrupted Degraded streak
    pub degraded_since: Option<DateTime<Utc>>,
    pub last_outcome: Option<ProbeOutcome>,
    pub last_detail: Option<String>,
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Last known lifecycle state
    pub state: ServiceState,
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_healthy_at: None,
            last_restart_at: None,
            restart_count: 0,
            total_restarts: 0,
            degraded_since: None,
            last_outcome: None,
            last_detail: None,
            last_probe_at: None,
            state: ServiceState::Starting,
            updated_at: Utc::now(),
        }
    }

    /// Fold one probe result into the record.
    pub fn apply(&mut self, result: &ProbeResult, policy: &RestartPolicy) {
        match result.outcome {
            ProbeOutcome::Healthy => {
                self.record_success(result.timestamp, policy);
                self.degraded_since = None;
            }
            ProbeOutcome::Unhealthy => {
                self.record_failure();
                self.degraded_since = None;
            }
            ProbeOutcome::Degraded => {
                let since = *self.degraded_since.get_or_insert(result.timestamp);
                if let DegradedPolicy::EscalateAfterSecs(limit) = policy.degraded_policy {
                    let elapsed = result.timestamp.signed_duration_since(since);
                    if elapsed.num_seconds() >= i64::try_from(limit).unwrap_or(i64::MAX) {
                        self.record_failure();
                    }
                }
            }
            ProbeOutcome::Unknown => {}
        }

        self.last_outcome = Some(result.outcome);
        self.last_detail = Some(result.detail.clone());
        self.last_probe_at = Some(result.timestamp);
        self.updated_at = Utc::now();
    }

    /// Record a restart. The failure streak is left untouched.
    pub fn note_restart(&mut self, at: DateTime<Utc>) {
        self.restart_count = self.restart_count.saturating_add(1);
        self.total_restarts = self.total_restarts.saturating_add(1);
        self.last_restart_at = Some(at);
        self.updated_at = Utc::now();
    }

    /// Whether the last probe reported the service healthy.
    pub fn is_healthy(&self) -> bool {
        self.last_outcome == Some(ProbeOutcome::Healthy)
    }

    fn record_success(&mut self, at: DateTime<Utc>, policy: &RestartPolicy) {
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.last_healthy_at = Some(at);
        if self.consecutive_successes >= policy.sustained_healthy_probes {
            self.restart_count = 0;
        }
    }

    fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}
