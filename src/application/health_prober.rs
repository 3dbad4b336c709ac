//! Health Prober
//!
//! One probe = liveness, then the kind-specific check, then (for a healthy
//! result) resource thresholds. The whole evaluation runs under the check's
//! timeout; a check that overruns is reported as `Unhealthy` / `"timeout"`.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::domain::models::{
    CheckKind, ProbeOutcome, ProbeResult, ResourceLimits, ServiceDescriptor, ServiceInstance,
};
use crate::domain::ports::{HealthProber, ServiceLauncher};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Maximum length of a script's stdout kept as probe detail
const MAX_DETAIL_LEN: usize = 512;

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Name the first breached limit, if any.
pub fn evaluate_resource_usage(limits: &ResourceLimits, usage: ResourceUsage) -> Option<String> {
    if let Some(max_mb) = limits.max_memory_mb {
        let used_mb = usage.memory_bytes / BYTES_PER_MB;
        if used_mb > max_mb {
            return Some(format!("memory {used_mb}MB exceeds limit {max_mb}MB"));
        }
    }
    if let Some(max_cpu) = limits.max_cpu_percent {
        if usage.cpu_percent > max_cpu {
            return Some(format!(
                "cpu {:.1}% exceeds limit {max_cpu:.1}%",
                usage.cpu_percent
            ));
        }
    }
    None
}

/// Map an HTTP response to an outcome.
pub fn classify_http_response(
    status: reqwest::StatusCode,
    latency: Duration,
    degraded_after: Option<Duration>,
) -> (ProbeOutcome, String) {
    if !status.is_success() {
        return (ProbeOutcome::Unhealthy, format!("HTTP {status}"));
    }
    match degraded_after {
        Some(threshold) if latency > threshold => (
            ProbeOutcome::Degraded,
            format!(
                "HTTP {status} in {}ms (slower than {}ms)",
                latency.as_millis(),
                threshold.as_millis()
            ),
        ),
        _ => (ProbeOutcome::Healthy, format!("HTTP {status}")),
    }
}

/// [`HealthProber`] for process, HTTP, script and TCP checks.
pub struct Prober {
    launcher: Arc<dyn ServiceLauncher>,
    http: reqwest::Client,
    system: Arc<Mutex<System>>,
}

impl Prober {
    pub fn new(launcher: Arc<dyn ServiceLauncher>) -> Self {
        Self {
            launcher,
            http: reqwest::Client::new(),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn evaluate(&self, descriptor: &ServiceDescriptor, instance: &ServiceInstance) -> (ProbeOutcome, String) {
        if !self.launcher.is_alive(instance).await {
            return (ProbeOutcome::Unhealthy, "process not running".to_string());
        }

        let check = &descriptor.health_check;
        let target = check.target.as_deref().unwrap_or_default();
        let (outcome, detail) = match check.kind {
            CheckKind::ProcessOnly => (ProbeOutcome::Healthy, "process alive".to_string()),
            CheckKind::HttpPing => self.http_ping(target, check.degraded_latency()).await,
            CheckKind::CustomScript => run_script(target, &check.args).await,
            CheckKind::TcpConnect => tcp_connect(target).await,
        };

        if outcome != ProbeOutcome::Healthy {
            return (outcome, detail);
        }

        match (descriptor.resource_limits, instance.pid) {
            (Some(limits), Some(pid)) => match self.sample(pid).await {
                Some(usage) => evaluate_resource_usage(&limits, usage)
                    .map_or((outcome, detail), |breach| (ProbeOutcome::Degraded, breach)),
                None => (outcome, detail),
            },
            _ => (outcome, detail),
        }
    }

    async fn http_ping(&self, url: &str, degraded_after: Option<Duration>) -> (ProbeOutcome, String) {
        let started = Instant::now();
        match self.http.get(url).send().await {
            Ok(response) => classify_http_response(response.status(), started.elapsed(), degraded_after),
            Err(e) => (ProbeOutcome::Unhealthy, format!("request failed: {e}")),
        }
    }

    async fn sample(&self, pid: u32) -> Option<ResourceUsage> {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || {
            let pid = Pid::from_u32(pid);
            let mut system = system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::new().with_memory().with_cpu(),
            );
            system.process(pid).map(|process| ResourceUsage {
                memory_bytes: process.memory(),
                cpu_percent: process.cpu_usage(),
            })
        })
        .await
        .ok()
        .flatten()
    }
}

async fn run_script(command: &str, args: &[String]) -> (ProbeOutcome, String) {
    let output = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) => {
            let mut detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
            truncate_detail(&mut detail);
            if output.status.success() {
                if detail.is_empty() {
                    detail = "exit code 0".to_string();
                }
                (ProbeOutcome::Healthy, detail)
            } else {
                if detail.is_empty() {
                    detail = output
                        .status
                        .code()
                        .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
                }
                (ProbeOutcome::Unhealthy, detail)
            }
        }
        Err(e) => (ProbeOutcome::Unknown, format!("check command '{command}' failed to run: {e}")),
    }
}

async fn tcp_connect(address: &str) -> (ProbeOutcome, String) {
    match TcpStream::connect(address).await {
        Ok(_) => (ProbeOutcome::Healthy, format!("connected to {address}")),
        Err(e) => (ProbeOutcome::Unhealthy, format!("connect to {address} failed: {e}")),
    }
}

fn truncate_detail(detail: &mut String) {
    if detail.len() > MAX_DETAIL_LEN {
        let mut cut = MAX_DETAIL_LEN;
        while !detail.is_char_boundary(cut) {
            cut -= 1;
        }
        detail.truncate(cut);
    }
}

#[async_trait]
impl HealthProber for Prober {
    async fn probe(&self, descriptor: &ServiceDescriptor, instance: &ServiceInstance) -> ProbeResult {
        let timeout = descriptor.health_check.timeout();
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, self.evaluate(descriptor, instance)).await {
            Ok((outcome, detail)) => ProbeResult::new(descriptor.id.clone(), outcome, started.elapsed(), detail),
            Err(_) => ProbeResult::timed_out(descriptor.id.clone(), timeout),
        };

        tracing::debug!(
            service_id = %descriptor.id,
            outcome = %result.outcome,
            latency_ms = result.latency_ms,
            detail = %result.detail,
            "probe completed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StartError;
    use crate::domain::models::{HealthCheckSpec, StopResult};
    use crate::domain::ports::InstanceEvent;
    use tokio::sync::broadcast;

    struct StubLauncher {
        alive: bool,
    }

    #[async_trait]
    impl ServiceLauncher for StubLauncher {
        async fn start(&self, descriptor: &ServiceDescriptor) -> Result<ServiceInstance, StartError> {
            Ok(ServiceInstance::new(descriptor.id.clone(), None))
        }
        async fn stop(&self, _instance: &ServiceInstance, _grace: Duration) -> StopResult {
            StopResult::GracefulExit
        }
        async fn is_alive(&self, _instance: &ServiceInstance) -> bool {
            self.alive
        }
        fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
            broadcast::channel(1).1
        }
    }

    fn prober(alive: bool) -> Prober {
        Prober::new(Arc::new(StubLauncher { alive }))
    }

    async fn probe(prober: &Prober, descriptor: &ServiceDescriptor) -> ProbeResult {
        let instance = ServiceInstance::new(descriptor.id.clone(), None);
        prober.probe(descriptor, &instance).await
    }

    #[tokio::test]
    async fn test_process_only() {
        let descriptor = ServiceDescriptor::new("worker", "worker");
        assert_eq!(probe(&prober(true), &descriptor).await.outcome, ProbeOutcome::Healthy);

        let result = probe(&prober(false), &descriptor).await;
        assert_eq!(result.outcome, ProbeOutcome::Unhealthy);
        assert_eq!(result.detail, "process not running");
    }

    #[tokio::test]
    async fn test_http_ping_success_and_failure() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server.mock("GET", "/health").with_status(200).create_async().await;
        let _down = server.mock("GET", "/ready").with_status(503).create_async().await;

        let healthy = ServiceDescriptor::new("api", "api")
            .with_health_check(HealthCheckSpec::http(format!("{}/health", server.url())));
        let result = probe(&prober(true), &healthy).await;
        assert_eq!(result.outcome, ProbeOutcome::Healthy);

        let unhealthy = ServiceDescriptor::new("api", "api")
            .with_health_check(HealthCheckSpec::http(format!("{}/ready", server.url())));
        let result = probe(&prober(true), &unhealthy).await;
        assert_eq!(result.outcome, ProbeOutcome::Unhealthy);
        assert!(result.detail.contains("503"));
    }

    #[tokio::test]
    async fn test_http_ping_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let descriptor = ServiceDescriptor::new("api", "api")
            .with_health_check(HealthCheckSpec::http(format!("http://127.0.0.1:{port}/health")));
        let result = probe(&prober(true), &descriptor).await;
        assert_eq!(result.outcome, ProbeOutcome::Unhealthy);
    }

    #[test]
    fn test_slow_success_is_degraded() {
        let (outcome, detail) = classify_http_response(
            reqwest::StatusCode::OK,
            Duration::from_millis(900),
            Some(Duration::from_millis(500)),
        );
        assert_eq!(outcome, ProbeOutcome::Degraded);
        assert!(detail.contains("900ms"));

        let (outcome, _) = classify_http_response(
            reqwest::StatusCode::OK,
            Duration::from_millis(100),
            Some(Duration::from_millis(500)),
        );
        assert_eq!(outcome, ProbeOutcome::Healthy);

        let (outcome, _) =
            classify_http_response(reqwest::StatusCode::NOT_FOUND, Duration::ZERO, None);
        assert_eq!(outcome, ProbeOutcome::Unhealthy);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_script_exit_codes() {
        let ok = ServiceDescriptor::new("db", "postgres").with_health_check(HealthCheckSpec::script(
            "sh",
            vec!["-c".into(), "echo accepting connections".into()],
        ));
        let result = probe(&prober(true), &ok).await;
        assert_eq!(result.outcome, ProbeOutcome::Healthy);
        assert_eq!(result.detail, "accepting connections");

        let failing = ServiceDescriptor::new("db", "postgres").with_health_check(HealthCheckSpec::script(
            "sh",
            vec!["-c".into(), "echo no response; exit 2".into()],
        ));
        let result = probe(&prober(true), &failing).await;
        assert_eq!(result.outcome, ProbeOutcome::Unhealthy);
        assert_eq!(result.detail, "no response");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_check_times_out() {
        let descriptor = ServiceDescriptor::new("db", "postgres").with_health_check(
            HealthCheckSpec::script("sleep", vec!["10".into()]).with_timeout_ms(100),
        );
        let started = Instant::now();
        let result = probe(&prober(true), &descriptor).await;

        assert_eq!(result.outcome, ProbeOutcome::Unhealthy);
        assert_eq!(result.detail, "timeout");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let descriptor = ServiceDescriptor::new("postgres", "postgres")
            .with_health_check(HealthCheckSpec::tcp(address));
        assert_eq!(probe(&prober(true), &descriptor).await.outcome, ProbeOutcome::Healthy);

        drop(listener);
    }

    #[test]
    fn test_resource_limits() {
        let limits = ResourceLimits {
            max_memory_mb: Some(256),
            max_cpu_percent: Some(80.0),
        };
        let within = ResourceUsage {
            memory_bytes: 100 * BYTES_PER_MB,
            cpu_percent: 10.0,
        };
        assert_eq!(evaluate_resource_usage(&limits, within), None);

        let heavy = ResourceUsage {
            memory_bytes: 300 * BYTES_PER_MB,
            cpu_percent: 10.0,
        };
        assert_eq!(
            evaluate_resource_usage(&limits, heavy).as_deref(),
            Some("memory 300MB exceeds limit 256MB")
        );

        let busy = ResourceUsage {
            memory_bytes: 0,
            cpu_percent: 95.5,
        };
        assert!(evaluate_resource_usage(&limits, busy).unwrap().starts_with("cpu 95.5%"));
        assert_eq!(evaluate_resource_usage(&ResourceLimits::default(), busy), None);
    }
}
