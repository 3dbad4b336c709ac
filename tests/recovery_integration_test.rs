//! Restart, deferral and escalation behavior driven through the orchestrator.

mod common;

use common::{config_with, fast_policy, wait_for, Harness, RecordingAlertSink, ScriptedProber};
use overwatch::domain::models::{ProbeOutcome, ProbeResult, RestartPolicy, ServiceDescriptor, ServiceState};
use overwatch::domain::ports::{EscalationReason, InstanceEvent};
use std::sync::Arc;
use std::time::Duration;

use ProbeOutcome::{Healthy, Unhealthy};

fn single(policy: RestartPolicy) -> Vec<ServiceDescriptor> {
    vec![ServiceDescriptor::new("worker", "worker").with_restart_policy(policy)]
}

#[tokio::test]
async fn test_three_failures_trigger_exactly_one_restart() {
    let policy = RestartPolicy {
        cooldown_after_restart_ms: 60_000,
        ..fast_policy()
    };
    let harness = Harness::new(ScriptedProber::new().script("worker", &[Healthy, Healthy, Unhealthy]));
    let supervisor = harness.supervisor(&config_with(single(policy))).await.unwrap();
    let orchestrator = supervisor.orchestrator();
    orchestrator.start_all().await.unwrap();

    // H, then U U U
    for _ in 0..4 {
        orchestrator.tick().await.unwrap();
    }
    assert_eq!(harness.launcher.start_count("worker"), 2);

    // still failing, but inside the cooldown window
    for _ in 0..5 {
        orchestrator.tick().await.unwrap();
    }
    assert_eq!(harness.launcher.start_count("worker"), 2);

    let status = &supervisor.status()[0];
    assert_eq!(status.state, ServiceState::CoolingDown);
    assert_eq!(status.health.restart_count, 1);
    assert_eq!(harness.launcher.stopped(), vec!["worker"]);
}

#[tokio::test]
async fn test_flapping_service_escalates_exactly_once() {
    let harness = Harness::new(ScriptedProber::new().script("worker", &[Healthy, Unhealthy]));
    let policy = RestartPolicy {
        max_consecutive_failures: 1,
        ..fast_policy()
    };
    let supervisor = harness.supervisor(&config_with(single(policy))).await.unwrap();
    let orchestrator = supervisor.orchestrator();
    orchestrator.start_all().await.unwrap();

    for _ in 0..30 {
        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    assert!(wait_for(|| harness.alerts.alerts().len() == 1, 1_000).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let alerts = harness.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].service_id, "worker");
    assert_eq!(alerts[0].reason, EscalationReason::CrashLoop { restarts: 3 });
    assert!(!alerts[0].recent_history.is_empty());

    // 1 initial launch + 3 restarts, then auto-restart is suspended
    assert_eq!(harness.launcher.start_count("worker"), 4);
    assert!(supervisor.status()[0].suspended);
}

#[tokio::test]
async fn test_sustained_health_lifts_suspension() {
    let prober = ScriptedProber::new().script("worker", &[Healthy, Unhealthy]);
    let harness = Harness::new(prober);
    let policy = RestartPolicy {
        max_consecutive_failures: 1,
        flap_threshold: 1,
        ..fast_policy()
    };
    let supervisor = harness.supervisor(&config_with(single(policy))).await.unwrap();
    let orchestrator = supervisor.orchestrator();
    orchestrator.start_all().await.unwrap();

    for _ in 0..10 {
        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    assert!(supervisor.status()[0].suspended);
    assert_eq!(harness.launcher.start_count("worker"), 2);

    harness.prober.set_script("worker", &[Healthy]);
    for _ in 0..4 {
        orchestrator.tick().await.unwrap();
    }
    let status = &supervisor.status()[0];
    assert!(!status.suspended);
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.health.restart_count, 0);
}

#[tokio::test]
async fn test_restart_deferred_until_dependency_recovers() {
    let policy = RestartPolicy {
        max_consecutive_failures: 2,
        ..fast_policy()
    };
    let patient = RestartPolicy {
        max_consecutive_failures: 1_000,
        ..fast_policy()
    };
    let services = vec![
        ServiceDescriptor::new("api", "api").depends_on("db").with_restart_policy(policy),
        ServiceDescriptor::new("db", "postgres").with_restart_policy(patient),
    ];
    let prober = ScriptedProber::new()
        .script("db", &[Healthy, Unhealthy])
        .script("api", &[Healthy, Unhealthy]);
    let harness = Harness::new(prober);
    let supervisor = harness.supervisor(&config_with(services)).await.unwrap();
    let orchestrator = supervisor.orchestrator();
    orchestrator.start_all().await.unwrap();
    supervisor
        .health()
        .record(&ProbeResult::unhealthy("db", "connection refused"))
        .await
        .unwrap();

    for _ in 0..4 {
        orchestrator.tick().await.unwrap();
    }
    assert_eq!(harness.launcher.start_count("api"), 1);
    assert_eq!(supervisor.health().get("api").unwrap().restart_count, 0);

    harness.prober.set_script("db", &[Healthy]);
    supervisor
        .health()
        .record(&ProbeResult::healthy("db", "accepting connections"))
        .await
        .unwrap();
    orchestrator.tick().await.unwrap();

    assert_eq!(harness.launcher.start_count("api"), 2);
    assert_eq!(harness.launcher.start_count("db"), 1);
}

#[tokio::test]
async fn test_relaunch_failure_is_recorded_and_escalated() {
    let harness = Harness::new(ScriptedProber::new().script("worker", &[Healthy, Unhealthy]));
    let policy = RestartPolicy {
        max_consecutive_failures: 1,
        flap_threshold: 2,
        ..fast_policy()
    };
    let supervisor = harness.supervisor(&config_with(single(policy))).await.unwrap();
    let orchestrator = supervisor.orchestrator();
    orchestrator.start_all().await.unwrap();
    harness.launcher.fail_starts("worker");

    for _ in 0..10 {
        orchestrator.tick().await.unwrap();
    }

    assert!(wait_for(|| !harness.alerts.alerts().is_empty(), 1_000).await);
    let alerts = harness.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(matches!(alerts[0].reason, EscalationReason::SpawnFailing { restarts: 2, .. }));

    let history = supervisor.health().recent_history("worker", 50).await.unwrap();
    assert!(history.iter().any(|r| r.detail.starts_with("spawn failed")));
    assert!(history.iter().any(|r| r.detail == "no running instance"));
}

#[tokio::test]
async fn test_slow_alert_sink_does_not_stall_supervision() {
    let mut harness = Harness::new(ScriptedProber::new().script("worker", &[Healthy, Unhealthy]));
    harness.alerts = Arc::new(RecordingAlertSink::slow(Duration::from_secs(30)));
    let policy = RestartPolicy {
        max_consecutive_failures: 1,
        flap_threshold: 1,
        ..fast_policy()
    };
    let supervisor = harness.supervisor(&config_with(single(policy))).await.unwrap();
    let orchestrator = supervisor.orchestrator();
    orchestrator.start_all().await.unwrap();

    let ticks = async {
        for _ in 0..10 {
            orchestrator.tick().await.unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), ticks).await.unwrap();

    assert!(supervisor.status()[0].suspended);
    // delivery is abandoned after alert_timeout_ms
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_unexpected_exit_triggers_probe_between_ticks() {
    let harness = Harness::new(ScriptedProber::new());
    let mut config = config_with(single(fast_policy()));
    config.supervisor.probe_interval_ms = 60_000;
    let supervisor = Arc::new(harness.supervisor(&config).await.unwrap());

    let runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            supervisor
                .run_until(tokio::time::sleep(Duration::from_millis(300)))
                .await
        })
    };

    assert!(wait_for(|| harness.prober.probe_count("worker") >= 2, 1_000).await);
    let before = harness.prober.probe_count("worker");
    let instance_id = supervisor.status()[0].instance_id.unwrap();
    harness.launcher.emit(InstanceEvent::Terminated {
        service_id: "worker".into(),
        instance_id,
        exit_code: Some(137),
    });

    assert!(wait_for(|| harness.prober.probe_count("worker") > before, 200).await);
    runner.await.unwrap().unwrap();
}
