//! Process Launcher
//!
//! Spawns managed services as child processes and owns their handles. Each
//! child is moved into a watcher task that waits for it to exit; everything
//! else talks to the watcher through channels. An exit that nobody asked for
//! is published as [`InstanceEvent::Terminated`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::StartError;
use crate::domain::models::{ServiceDescriptor, ServiceInstance, StopResult};
use crate::domain::ports::{InstanceEvent, ServiceLauncher};

/// Upper bound on waiting for a killed process to be reaped
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Running,
    Exited(Option<i32>),
}

impl ExitState {
    const fn is_exited(self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

#[derive(Clone)]
struct ManagedProcess {
    service_id: String,
    pid: Option<u32>,
    stop_requested: Arc<AtomicBool>,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<ExitState>,
}

/// [`ServiceLauncher`] backed by OS processes.
pub struct ProcessLauncher {
    processes: Mutex<HashMap<Uuid, ManagedProcess>>,
    events: broadcast::Sender<InstanceEvent>,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            processes: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn lookup(&self, instance_id: Uuid) -> Option<ManagedProcess> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance_id)
            .cloned()
    }

    fn forget(&self, instance_id: Uuid) {
        let removed = self
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&instance_id);
        if let Some(process) = removed {
            debug!(service_id = %process.service_id, %instance_id, "instance released");
        }
    }

    fn build_command(descriptor: &ServiceDescriptor) -> Result<Command, StartError> {
        let spec = &descriptor.start;

        if spec.command.contains('/') && !Path::new(&spec.command).exists() {
            return Err(StartError::path_invalid(format!(
                "command '{}' does not exist",
                spec.command
            )));
        }
        if let Some(dir) = &spec.working_dir {
            if !dir.is_dir() {
                return Err(StartError::path_invalid(format!(
                    "working directory '{}' does not exist",
                    dir.display()
                )));
            }
        }

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(output_sink(spec.stdout.as_deref())?)
            .stderr(output_sink(spec.stderr.as_deref())?)
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

/// Append to the configured file, or pipe so lines can be re-emitted as logs.
fn output_sink(path: Option<&Path>) -> Result<Stdio, StartError> {
    match path {
        Some(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Stdio::from)
            .map_err(|e| StartError::path_invalid(format!("cannot open output sink '{}': {e}", path.display()))),
        None => Ok(Stdio::piped()),
    }
}

fn forward_output<R>(service_id: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stream == "stderr" {
                warn!(service_id = %service_id, stream, "{line}");
            } else {
                info!(service_id = %service_id, stream, "{line}");
            }
        }
    });
}

fn watch_child(
    mut child: Child,
    instance: &ServiceInstance,
    stop_requested: Arc<AtomicBool>,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
    events: broadcast::Sender<InstanceEvent>,
) {
    let service_id = instance.descriptor_id.clone();
    let instance_id = instance.instance_id;

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx.recv() => {
                if let Err(e) = child.start_kill() {
                    warn!(service_id = %service_id, error = %e, "failed to kill process");
                }
                child.wait().await
            }
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!(service_id = %service_id, error = %e, "failed to wait for process");
                None
            }
        };
        let _ = exit_tx.send(ExitState::Exited(exit_code));

        if stop_requested.load(Ordering::SeqCst) {
            debug!(service_id = %service_id, %instance_id, ?exit_code, "process exited after stop request");
        } else {
            warn!(service_id = %service_id, %instance_id, ?exit_code, "process terminated unexpectedly");
            let _ = events.send(InstanceEvent::Terminated {
                service_id,
                instance_id,
                exit_code,
            });
        }
    });
}

#[cfg(unix)]
fn request_termination(pid: Option<u32>, kill_tx: &mpsc::Sender<()>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        let _ = kill_tx.try_send(());
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn request_termination(_pid: Option<u32>, kill_tx: &mpsc::Sender<()>) {
    let _ = kill_tx.try_send(());
}

#[async_trait]
impl ServiceLauncher for ProcessLauncher {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<ServiceInstance, StartError> {
        let mut command = Self::build_command(descriptor)?;

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StartError::path_invalid(format!("command '{}' not found", descriptor.start.command))
            } else {
                StartError::spawn_failed(format!("{}: {e}", descriptor.start.command))
            }
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(descriptor.id.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(descriptor.id.clone(), "stderr", stderr);
        }

        let instance = ServiceInstance::new(descriptor.id.clone(), child.id());
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);

        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                instance.instance_id,
                ManagedProcess {
                    service_id: descriptor.id.clone(),
                    pid: instance.pid,
                    stop_requested: stop_requested.clone(),
                    kill_tx,
                    exit_rx,
                },
            );

        watch_child(child, &instance, stop_requested, kill_rx, exit_tx, self.events.clone());

        info!(
            service_id = %descriptor.id,
            instance_id = %instance.instance_id,
            pid = ?instance.pid,
            "service process started"
        );
        Ok(instance)
    }

    async fn stop(&self, instance: &ServiceInstance, grace: Duration) -> StopResult {
        let Some(mut process) = self.lookup(instance.instance_id) else {
            return StopResult::AlreadyExited;
        };

        let already_exited = process.exit_rx.borrow().is_exited();
        if already_exited {
            self.forget(instance.instance_id);
            return StopResult::AlreadyExited;
        }

        process.stop_requested.store(true, Ordering::SeqCst);
        request_termination(process.pid, &process.kill_tx);

        // A closed channel also means the watcher finished, so the process is gone
        let exited_in_grace = tokio::time::timeout(grace, process.exit_rx.wait_for(|s| s.is_exited()))
            .await
            .is_ok();

        let result = if exited_in_grace {
            StopResult::GracefulExit
        } else {
            warn!(
                service_id = %instance.descriptor_id,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "grace period expired, killing process"
            );
            let _ = process.kill_tx.send(()).await;
            let reaped = tokio::time::timeout(KILL_REAP_TIMEOUT, process.exit_rx.wait_for(|s| s.is_exited()))
                .await
                .is_ok();
            if !reaped {
                error!(service_id = %instance.descriptor_id, "killed process was not reaped in time");
            }
            StopResult::ForcedKill
        };

        info!(service_id = %instance.descriptor_id, ?result, "service process stopped");
        self.forget(instance.instance_id);
        result
    }

    async fn is_alive(&self, instance: &ServiceInstance) -> bool {
        let Some(process) = self.lookup(instance.instance_id) else {
            return false;
        };
        let exited = process.exit_rx.borrow().is_exited();
        !exited
    }

    fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }
}
