//! Recovery Policy Engine.
//!
//! Per-service state machine fed with every new probe result:
//!
//! ```text
//! Starting -> Running <-> Degraded
//!               |
//!               v
//!            Failing -> Restarting -> CoolingDown -> Running | Failing
//! ```
//!
//! A restart fires once every `max_consecutive_failures` failures: the
//! failure streak is not cleared by a restart, so the engine keeps the streak
//! length at the last restart as a baseline. Once the flap window holds
//! `flap_threshold` restarts, auto-restart is suspended and a single
//! escalation is raised until a sustained-healthy period clears the window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::domain::models::{HealthRecord, ProbeOutcome, RestartPolicy, ServiceState};
use crate::domain::ports::EscalationReason;

/// What the orchestrator should do after a probe result was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    /// Stop the current instance and start a new one after `delay`.
    Restart { delay: Duration },
    /// A restart is due but `dependency` is not healthy; retry on a later probe.
    Defer { dependency: String },
    /// Auto-restart is now suspended; hand the failure to a human.
    Escalate(EscalationReason),
}

/// Mutable recovery bookkeeping for one service.
#[derive(Debug, Clone, Default)]
pub struct RecoveryState {
    pub state: ServiceState,
    /// Failure streak length when the last restart was issued
    failure_baseline: u32,
    suspended: bool,
    cooldown_until: Option<DateTime<Utc>>,
    last_spawn_error: Option<String>,
}

impl RecoveryState {
    pub const fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub const fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    /// A new instance was launched as part of a restart.
    pub fn on_restarted(&mut self, policy: &RestartPolicy, now: DateTime<Utc>) {
        let cooldown = ChronoDuration::from_std(policy.cooldown()).unwrap_or(ChronoDuration::MAX);
        self.state = ServiceState::CoolingDown;
        self.cooldown_until = now.checked_add_signed(cooldown);
        self.last_spawn_error = None;
    }

    /// A restart attempt could not launch the process.
    pub fn on_spawn_failed(&mut self, error: impl Into<String>) {
        self.state = ServiceState::Failing;
        self.cooldown_until = None;
        self.last_spawn_error = Some(error.into());
    }

    pub fn on_stopped(&mut self) {
        self.state = ServiceState::Stopped;
        self.cooldown_until = None;
    }
}

/// Stateless decision logic; all per-service state lives in [`RecoveryState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryPolicyEngine;

impl RecoveryPolicyEngine {
    pub const fn new() -> Self {
        Self
    }

    /// Decide the next action for a service.
    ///
    /// `record` must already include `outcome`. `blocked_by` names a
    /// dependency that is currently not healthy, if any.
    pub fn decide(
        &self,
        recovery: &mut RecoveryState,
        policy: &RestartPolicy,
        record: &HealthRecord,
        outcome: ProbeOutcome,
        blocked_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> RecoveryAction {
        // A healthy probe ended the streak the baseline was measured against
        if record.consecutive_failures < recovery.failure_baseline {
            recovery.failure_baseline = 0;
        }

        if recovery.suspended && record.restart_count == 0 {
            tracing::info!(
                service_id = %record.service_id,
                "sustained healthy period observed, auto-restart resumed"
            );
            recovery.suspended = false;
            recovery.last_spawn_error = None;
        }

        if let Some(until) = recovery.cooldown_until {
            if now < until {
                if outcome == ProbeOutcome::Healthy {
                    recovery.cooldown_until = None;
                    recovery.state = ServiceState::Running;
                }
                return RecoveryAction::None;
            }
            recovery.cooldown_until = None;
        }

        recovery.state = match outcome {
            ProbeOutcome::Healthy => ServiceState::Running,
            ProbeOutcome::Degraded if record.consecutive_failures == 0 => ServiceState::Degraded,
            ProbeOutcome::Degraded | ProbeOutcome::Unhealthy => ServiceState::Failing,
            ProbeOutcome::Unknown => match recovery.state {
                ServiceState::CoolingDown | ServiceState::Restarting => ServiceState::Failing,
                other => other,
            },
        };

        if recovery.suspended {
            return RecoveryAction::None;
        }

        let streak = record.consecutive_failures.saturating_sub(recovery.failure_baseline);
        if streak < policy.max_consecutive_failures {
            return RecoveryAction::None;
        }

        if let Some(dependency) = blocked_by {
            return RecoveryAction::Defer {
                dependency: dependency.to_string(),
            };
        }

        if record.restart_count >= policy.flap_threshold {
            recovery.suspended = true;
            let reason = match recovery.last_spawn_error.clone() {
                Some(error) => EscalationReason::SpawnFailing {
                    restarts: record.restart_count,
                    error,
                },
                None => EscalationReason::CrashLoop {
                    restarts: record.restart_count,
                },
            };
            return RecoveryAction::Escalate(reason);
        }

        recovery.failure_baseline = record.consecutive_failures;
        recovery.state = ServiceState::Restarting;
        RecoveryAction::Restart {
            delay: policy.backoff_delay(record.restart_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ProbeResult;

    struct Harness {
        engine: RecoveryPolicyEngine,
        policy: RestartPolicy,
        record: HealthRecord,
        recovery: RecoveryState,
        now: DateTime<Utc>,
    }

    impl Harness {
        fn new(policy: RestartPolicy) -> Self {
            Self {
                engine: RecoveryPolicyEngine::new(),
                policy,
                record: HealthRecord::new("api"),
                recovery: RecoveryState::default(),
                now: Utc::now(),
            }
        }

        fn feed(&mut self, outcome: ProbeOutcome) -> RecoveryAction {
            self.feed_blocked(outcome, None)
        }

        fn feed_blocked(&mut self, outcome: ProbeOutcome, blocked_by: Option<&str>) -> RecoveryAction {
            self.now += ChronoDuration::seconds(1);
            let result = ProbeResult::new("api", outcome, Duration::ZERO, "").at(self.now);
            self.record.apply(&result, &self.policy);
            self.engine.decide(
                &mut self.recovery,
                &self.policy,
                &self.record,
                outcome,
                blocked_by,
                self.now,
            )
        }

        /// Simulate the orchestrator executing a restart.
        fn restart(&mut self) {
            self.record.note_restart(self.now);
            self.recovery.on_restarted(&self.policy, self.now);
        }

        fn skip_cooldown(&mut self) {
            self.now += ChronoDuration::from_std(self.policy.cooldown()).unwrap();
        }
    }

    fn policy() -> RestartPolicy {
        RestartPolicy {
            max_consecutive_failures: 3,
            flap_threshold: 3,
            ..RestartPolicy::default()
        }
    }

    #[test]
    fn test_exactly_one_restart_for_threshold_failures() {
        let mut h = Harness::new(policy());
        assert_eq!(h.feed(ProbeOutcome::Healthy), RecoveryAction::None);
        assert_eq!(h.recovery.state, ServiceState::Running);
        assert_eq!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::None);
        assert_eq!(h.recovery.state, ServiceState::Failing);
        assert_eq!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::None);
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        assert_eq!(h.recovery.state, ServiceState::Restarting);
    }

    #[test]
    fn test_no_second_restart_without_new_failures() {
        let mut h = Harness::new(policy());
        for _ in 0..2 {
            h.feed(ProbeOutcome::Unhealthy);
        }
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        h.restart();
        h.skip_cooldown();

        // Streak continues from 3; two more failures are not enough
        assert_eq!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::None);
        assert_eq!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::None);
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        assert_eq!(h.record.consecutive_failures, 6);
    }

    #[test]
    fn test_cooldown_suppresses_restarts() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 1,
            cooldown_after_restart_ms: 60_000,
            ..policy()
        });
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        h.restart();

        for _ in 0..5 {
            assert_eq!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::None);
            assert_eq!(h.recovery.state, ServiceState::CoolingDown);
        }

        h.skip_cooldown();
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
    }

    #[test]
    fn test_healthy_probe_ends_cooldown() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 1,
            ..policy()
        });
        h.feed(ProbeOutcome::Unhealthy);
        h.restart();
        assert_eq!(h.feed(ProbeOutcome::Healthy), RecoveryAction::None);
        assert_eq!(h.recovery.state, ServiceState::Running);
        assert!(h.recovery.cooldown_until().is_none());
    }

    #[test]
    fn test_backoff_grows_with_restart_count() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 1,
            flap_threshold: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 350,
            ..RestartPolicy::default()
        });

        let mut delays = Vec::new();
        for _ in 0..4 {
            if let RecoveryAction::Restart { delay } = h.feed(ProbeOutcome::Unhealthy) {
                delays.push(delay.as_millis());
                h.restart();
                h.skip_cooldown();
            }
        }
        assert_eq!(delays, vec![100, 200, 350, 350]);
    }

    #[test]
    fn test_flap_threshold_escalates_once() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 1,
            flap_threshold: 3,
            ..RestartPolicy::default()
        });

        let mut restarts = 0;
        let mut escalations = Vec::new();
        for _ in 0..20 {
            match h.feed(ProbeOutcome::Unhealthy) {
                RecoveryAction::Restart { .. } => {
                    restarts += 1;
                    h.restart();
                    h.skip_cooldown();
                }
                RecoveryAction::Escalate(reason) => escalations.push(reason),
                _ => {}
            }
        }

        assert_eq!(restarts, 3);
        assert_eq!(escalations, vec![EscalationReason::CrashLoop { restarts: 3 }]);
        assert!(h.recovery.is_suspended());
    }

    #[test]
    fn test_sustained_healthy_lifts_suspension() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 1,
            flap_threshold: 1,
            sustained_healthy_probes: 2,
            ..RestartPolicy::default()
        });
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        h.restart();
        h.skip_cooldown();
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Escalate(_)));
        assert!(h.recovery.is_suspended());

        h.feed(ProbeOutcome::Healthy);
        assert!(h.recovery.is_suspended());
        h.feed(ProbeOutcome::Healthy);
        assert!(!h.recovery.is_suspended());

        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
    }

    #[test]
    fn test_spawn_failures_escalate_as_spawn_failing() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 1,
            flap_threshold: 1,
            ..RestartPolicy::default()
        });
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        h.record.note_restart(h.now);
        h.recovery.on_spawn_failed("path invalid: /opt/api");

        assert_eq!(
            h.feed(ProbeOutcome::Unhealthy),
            RecoveryAction::Escalate(EscalationReason::SpawnFailing {
                restarts: 1,
                error: "path invalid: /opt/api".to_string(),
            })
        );
    }

    #[test]
    fn test_unhealthy_dependency_defers_restart() {
        let mut h = Harness::new(policy());
        h.feed(ProbeOutcome::Unhealthy);
        h.feed(ProbeOutcome::Unhealthy);
        assert_eq!(
            h.feed_blocked(ProbeOutcome::Unhealthy, Some("postgres")),
            RecoveryAction::Defer {
                dependency: "postgres".to_string()
            }
        );
        assert_eq!(h.record.restart_count, 0);

        // Dependency recovered: the pending restart goes ahead
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
    }

    #[test]
    fn test_degraded_is_informational() {
        let mut h = Harness::new(policy());
        for _ in 0..10 {
            assert_eq!(h.feed(ProbeOutcome::Degraded), RecoveryAction::None);
        }
        assert_eq!(h.recovery.state, ServiceState::Degraded);
    }

    #[test]
    fn test_healthy_resets_baseline() {
        let mut h = Harness::new(RestartPolicy {
            max_consecutive_failures: 2,
            ..policy()
        });
        h.feed(ProbeOutcome::Unhealthy);
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
        h.restart();
        h.feed(ProbeOutcome::Healthy);

        assert_eq!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::None);
        assert!(matches!(h.feed(ProbeOutcome::Unhealthy), RecoveryAction::Restart { .. }));
    }
}
