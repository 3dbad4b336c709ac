//! Common test utilities for integration tests
//!
//! Scriptable launcher, prober and alert sink fakes, plus helpers to build a
//! supervisor around them.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast;

use overwatch::adapters::memory::InMemoryHealthRepository;
use overwatch::domain::models::{
    Config, ProbeOutcome, ProbeResult, RestartPolicy, ServiceDescriptor, ServiceInstance,
    StopResult, SupervisorConfig,
};
use overwatch::domain::ports::{Alert, AlertSink, HealthProber, HealthRepository, InstanceEvent};
use overwatch::{ServiceLauncher, StartError, Supervisor, SupervisorParts, SupervisorResult};

/// Create a temporary test database path
///
/// The TempDir must be kept alive for the path to stay valid.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("health.db");
    (dir, db_path)
}

/// Initialize a tracing subscriber writing to the test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `predicate` every 10ms until it holds or `timeout_ms` elapses.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    predicate()
}

/// Launcher that never spawns anything. Records every start and stop.
pub struct MockLauncher {
    starts: Mutex<Vec<(String, Instant)>>,
    stops: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    events: broadcast::Sender<InstanceEvent>,
}

impl MockLauncher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Make every later start of `service_id` fail.
    pub fn fail_starts(&self, service_id: &str) {
        self.failing.lock().unwrap().insert(service_id.to_string());
    }

    pub fn started(&self) -> Vec<String> {
        self.starts.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn start_count(&self, service_id: &str) -> usize {
        self.starts.lock().unwrap().iter().filter(|(id, _)| id == service_id).count()
    }

    pub fn first_start(&self, service_id: &str) -> Option<Instant> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == service_id)
            .map(|(_, at)| *at)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }

    pub fn emit(&self, event: InstanceEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ServiceLauncher for MockLauncher {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<ServiceInstance, StartError> {
        if self.failing.lock().unwrap().contains(&descriptor.id) {
            return Err(StartError::spawn_failed("resource temporarily unavailable"));
        }
        self.starts
            .lock()
            .unwrap()
            .push((descriptor.id.clone(), Instant::now()));
        Ok(ServiceInstance::new(&descriptor.id, Some(1000)))
    }

    async fn stop(&self, instance: &ServiceInstance, _grace: Duration) -> StopResult {
        self.stops.lock().unwrap().push(instance.descriptor_id.clone());
        StopResult::GracefulExit
    }

    async fn is_alive(&self, _instance: &ServiceInstance) -> bool {
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }
}

/// Prober replaying a scripted outcome queue per service.
///
/// The last outcome of a script repeats forever; unscripted services are
/// healthy. Every probe is recorded with the time it was answered.
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, VecDeque<ProbeOutcome>>>,
    probes: Mutex<Vec<(String, ProbeOutcome, Instant)>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn script(self, service_id: &str, outcomes: &[ProbeOutcome]) -> Self {
        self.set_script(service_id, outcomes);
        self
    }

    pub fn set_script(&self, service_id: &str, outcomes: &[ProbeOutcome]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(service_id.to_string(), outcomes.iter().copied().collect());
    }

    pub fn first_healthy(&self, service_id: &str) -> Option<Instant> {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .find(|(id, outcome, _)| id == service_id && *outcome == ProbeOutcome::Healthy)
            .map(|(_, _, at)| *at)
    }

    pub fn probe_count(&self, service_id: &str) -> usize {
        self.probes.lock().unwrap().iter().filter(|(id, _, _)| id == service_id).count()
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, descriptor: &ServiceDescriptor, _instance: &ServiceInstance) -> ProbeResult {
        let outcome = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&descriptor.id) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => *queue.front().unwrap(),
                None => ProbeOutcome::Healthy,
            }
        };
        self.probes
            .lock()
            .unwrap()
            .push((descriptor.id.clone(), outcome, Instant::now()));
        ProbeResult::new(&descriptor.id, outcome, Duration::from_millis(2), outcome.as_str())
    }
}

/// Alert sink that keeps every alert it receives.
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
    delay: Option<Duration>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that takes `delay` to deliver each alert.
    pub fn slow(delay: Duration) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, alert: &Alert) -> SupervisorResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Restart policy with millisecond-scale timings.
pub fn fast_policy() -> RestartPolicy {
    RestartPolicy {
        max_consecutive_failures: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        cooldown_after_restart_ms: 1,
        flap_threshold: 3,
        sustained_healthy_probes: 3,
        ..RestartPolicy::default()
    }
}

/// Control loop settings with millisecond-scale timings.
pub fn fast_settings() -> SupervisorConfig {
    SupervisorConfig {
        probe_interval_ms: 20,
        max_concurrent_probes: 4,
        startup_timeout_ms: 300,
        startup_probe_interval_ms: 5,
        spawn_timeout_ms: 200,
        grace_timeout_ms: 50,
        alert_timeout_ms: 100,
        history_len: 20,
    }
}

pub fn config_with(services: Vec<ServiceDescriptor>) -> Config {
    Config {
        supervisor: fast_settings(),
        services,
        ..Config::default()
    }
}

/// Test doubles shared between a supervisor and the test body.
pub struct Harness {
    pub launcher: Arc<MockLauncher>,
    pub prober: Arc<ScriptedProber>,
    pub alerts: Arc<RecordingAlertSink>,
    pub repository: Arc<dyn HealthRepository>,
}

impl Harness {
    pub fn new(prober: ScriptedProber) -> Self {
        Self {
            launcher: Arc::new(MockLauncher::new()),
            prober: Arc::new(prober),
            alerts: Arc::new(RecordingAlertSink::new()),
            repository: Arc::new(InMemoryHealthRepository::new()),
        }
    }

    pub fn parts(&self) -> SupervisorParts {
        SupervisorParts {
            launcher: self.launcher.clone(),
            prober: self.prober.clone(),
            repository: self.repository.clone(),
            alerts: self.alerts.clone(),
        }
    }

    pub async fn supervisor(&self, config: &Config) -> SupervisorResult<Supervisor> {
        Supervisor::build(config, self.parts()).await
    }
}
