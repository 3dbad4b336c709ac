//! Orchestrator: the supervisor control loop.
//!
//! Startup launches services wave by wave, each wave only after every
//! service of the previous one reported a healthy probe. In steady state a
//! probe cycle runs per service on every tick and whenever the launcher
//! reports an unexpected exit. Cycles for one service are serialized through
//! its slot lock; different services are probed concurrently, bounded by
//! `max_concurrent_probes`.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::descriptor_store::DescriptorStore;
use super::health_state::HealthStateStore;
use super::recovery_policy::{RecoveryAction, RecoveryPolicyEngine, RecoveryState};
use crate::domain::errors::{StartError, SupervisorError, SupervisorResult};
use crate::domain::models::{
    HealthRecord, ProbeOutcome, ProbeResult, ServiceDescriptor, ServiceInstance, ServiceState,
    SupervisorConfig,
};
use crate::domain::ports::{
    Alert, AlertSink, EscalationReason, HealthProber, InstanceEvent, ServiceLauncher,
};

/// Per-service mutable state. Only the cycle holding the lock touches it.
#[derive(Debug, Default)]
struct ServiceSlot {
    instance: Option<ServiceInstance>,
    recovery: RecoveryState,
}

/// Lock-free view of a slot, refreshed after every change.
#[derive(Debug, Clone, Default)]
struct SlotView {
    state: ServiceState,
    instance_id: Option<Uuid>,
    pid: Option<u32>,
    suspended: bool,
}

/// Point-in-time status of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service_id: String,
    pub state: ServiceState,
    pub instance_id: Option<Uuid>,
    pub pid: Option<u32>,
    /// Auto-restart suspended after an escalation
    pub suspended: bool,
    pub health: HealthRecord,
}

pub struct Orchestrator {
    descriptors: Arc<DescriptorStore>,
    launcher: Arc<dyn ServiceLauncher>,
    prober: Arc<dyn HealthProber>,
    health: Arc<HealthStateStore>,
    alerts: Arc<dyn AlertSink>,
    engine: RecoveryPolicyEngine,
    settings: SupervisorConfig,
    slots: HashMap<String, Arc<Mutex<ServiceSlot>>>,
    views: RwLock<HashMap<String, SlotView>>,
    probe_permits: Semaphore,
    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        descriptors: Arc<DescriptorStore>,
        launcher: Arc<dyn ServiceLauncher>,
        prober: Arc<dyn HealthProber>,
        health: Arc<HealthStateStore>,
        alerts: Arc<dyn AlertSink>,
        settings: SupervisorConfig,
    ) -> Self {
        let slots = descriptors
            .ids()
            .map(|id| (id.to_string(), Arc::new(Mutex::new(ServiceSlot::default()))))
            .collect();
        let views = descriptors
            .ids()
            .map(|id| (id.to_string(), SlotView::default()))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            probe_permits: Semaphore::new(settings.max_concurrent_probes.max(1)),
            descriptors,
            launcher,
            prober,
            health,
            alerts,
            engine: RecoveryPolicyEngine::new(),
            settings,
            slots,
            views: RwLock::new(views),
            shutdown_tx,
        }
    }

    /// Launch every service in dependency order.
    ///
    /// Services in the same wave start concurrently. If any service fails to
    /// launch or to become healthy in time, everything started so far is
    /// stopped and the first error is returned.
    pub async fn start_all(&self) -> SupervisorResult<()> {
        for (index, wave) in self.descriptors.startup_waves().iter().enumerate() {
            info!(wave = index, services = ?wave, "starting wave");
            let results = if self.is_shutting_down() {
                vec![Err(SupervisorError::ShuttingDown)]
            } else {
                join_all(wave.iter().map(|id| self.start_service(id))).await
            };

            if let Some(err) = results.into_iter().find_map(Result::err) {
                if matches!(err, SupervisorError::ShuttingDown) {
                    info!("startup interrupted, stopping started services");
                } else {
                    error!(error = %err, "startup failed, stopping started services");
                }
                if let Err(stop_err) = self.shutdown().await {
                    warn!(error = %stop_err, "cleanup after failed startup was incomplete");
                }
                return Err(err);
            }
        }
        info!(services = self.descriptors.len(), "all services running");
        Ok(())
    }

    async fn start_service(&self, service_id: &str) -> SupervisorResult<()> {
        let descriptor = self.descriptor(service_id)?;
        let mut slot = self.slot(service_id)?.lock().await;

        slot.recovery = RecoveryState::default();
        self.persist_state(service_id, &slot).await?;

        let instance = self
            .launch(&descriptor)
            .await
            .map_err(|source| SupervisorError::SpawnFailure {
                service_id: service_id.to_string(),
                source,
            })?;
        info!(service_id, instance_id = %instance.instance_id, pid = ?instance.pid, "service launched");
        slot.instance = Some(instance.clone());
        self.publish(service_id, &slot);

        let deadline = Instant::now() + self.settings.startup_timeout();
        loop {
            let Some(result) = self.probe(&descriptor, &instance).await else {
                return Err(SupervisorError::ShuttingDown);
            };

            if result.outcome == ProbeOutcome::Healthy {
                self.health.record(&result).await?;
                slot.recovery.state = ServiceState::Running;
                self.persist_state(service_id, &slot).await?;
                info!(service_id, latency_ms = result.latency_ms, "service healthy");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                self.health.record(&result).await?;
                return Err(SupervisorError::StartupTimeout {
                    service_id: service_id.to_string(),
                    timeout_ms: self.settings.startup_timeout_ms,
                });
            }

            debug!(service_id, outcome = %result.outcome, detail = %result.detail, "waiting for service");
            let pause = self.settings.startup_probe_interval().min(deadline - now);
            tokio::select! {
                () = sleep(pause) => {}
                () = self.cancelled() => return Err(SupervisorError::ShuttingDown),
            }
        }
    }

    /// Steady-state loop. Returns after [`Orchestrator::request_shutdown`],
    /// or early with the first fatal error.
    pub async fn run(self: &Arc<Self>) -> SupervisorResult<()> {
        let mut ticker = interval(self.settings.probe_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events = self.launcher.subscribe();
        let mut events_open = true;
        let mut cycles: JoinSet<SupervisorResult<()>> = JoinSet::new();

        info!(interval_ms = self.settings.probe_interval_ms, "supervision loop started");
        let outcome = loop {
            tokio::select! {
                () = self.cancelled() => break Ok(()),
                _ = ticker.tick() => self.schedule_tick(&mut cycles),
                event = events.recv(), if events_open => match event {
                    Ok(InstanceEvent::Terminated { service_id, instance_id, exit_code }) => {
                        warn!(service_id = %service_id, %instance_id, ?exit_code, "service exited unexpectedly");
                        self.schedule_event(&mut cycles, service_id, instance_id);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed instance events, relying on the next tick");
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => match joined {
                    Ok(Err(err)) if err.is_fatal() => {
                        error!(error = %err, "fatal error in probe cycle");
                        self.request_shutdown();
                        break Err(err);
                    }
                    Ok(Err(err)) => warn!(error = %err, "probe cycle failed"),
                    Ok(Ok(())) => {}
                    Err(join_err) => error!(error = %join_err, "probe cycle panicked"),
                },
            }
        };

        while let Some(joined) = cycles.join_next().await {
            if let Ok(Err(err)) = joined {
                debug!(error = %err, "probe cycle ended during shutdown");
            }
        }
        info!("supervision loop stopped");
        outcome
    }

    fn schedule_tick(self: &Arc<Self>, cycles: &mut JoinSet<SupervisorResult<()>>) {
        for (service_id, slot) in &self.slots {
            let Ok(guard) = slot.clone().try_lock_owned() else {
                debug!(service_id = %service_id, "previous cycle still running, skipping tick");
                continue;
            };
            let this = Arc::clone(self);
            let service_id = service_id.clone();
            cycles.spawn(async move { this.run_cycle(&service_id, guard, None).await });
        }
    }

    fn schedule_event(
        self: &Arc<Self>,
        cycles: &mut JoinSet<SupervisorResult<()>>,
        service_id: String,
        instance_id: Uuid,
    ) {
        let Some(slot) = self.slots.get(&service_id).cloned() else {
            return;
        };
        let this = Arc::clone(self);
        cycles.spawn(async move {
            let guard = slot.lock_owned().await;
            this.run_cycle(&service_id, guard, Some(instance_id)).await
        });
    }

    /// Run one probe cycle for every service and wait for all of them.
    pub async fn tick(&self) -> SupervisorResult<()> {
        let cycles = self.slots.iter().map(|(service_id, slot)| async move {
            let guard = slot.clone().lock_owned().await;
            self.run_cycle(service_id, guard, None).await
        });
        join_all(cycles).await.into_iter().collect()
    }

    /// Probe, record, decide, act. `expected_instance` drops the cycle if
    /// the instance it was scheduled for has already been replaced.
    async fn run_cycle(
        &self,
        service_id: &str,
        mut slot: OwnedMutexGuard<ServiceSlot>,
        expected_instance: Option<Uuid>,
    ) -> SupervisorResult<()> {
        if self.is_shutting_down() {
            return Ok(());
        }
        if let Some(expected) = expected_instance {
            if slot.instance.as_ref().map(|i| i.instance_id) != Some(expected) {
                debug!(service_id, instance_id = %expected, "ignoring event for replaced instance");
                return Ok(());
            }
        }

        let descriptor = self.descriptor(service_id)?;
        let result = match slot.instance.clone() {
            Some(instance) => match self.probe(&descriptor, &instance).await {
                Some(result) => result,
                None => return Ok(()),
            },
            None => ProbeResult::unhealthy(service_id, "no running instance"),
        };

        let record = self.health.record(&result).await?;
        let blocked_by = self.unavailable_dependency(&descriptor);
        let action = self.engine.decide(
            &mut slot.recovery,
            &descriptor.restart_policy,
            &record,
            result.outcome,
            blocked_by.as_deref(),
            Utc::now(),
        );
        self.persist_state(service_id, &slot).await?;

        match action {
            RecoveryAction::None => Ok(()),
            RecoveryAction::Defer { dependency } => {
                let reason = SupervisorError::DependencyUnavailable {
                    service_id: service_id.to_string(),
                    dependency,
                };
                info!(service_id, reason = %reason, "restart deferred");
                Ok(())
            }
            RecoveryAction::Escalate(reason) => {
                error!(service_id, reason = %reason, "escalating, auto-restart suspended");
                self.publish(service_id, &slot);
                self.dispatch_alert(service_id, reason).await;
                Ok(())
            }
            RecoveryAction::Restart { delay } => self.restart(&descriptor, &mut slot, delay).await,
        }
    }

    async fn restart(
        &self,
        descriptor: &ServiceDescriptor,
        slot: &mut ServiceSlot,
        delay: Duration,
    ) -> SupervisorResult<()> {
        let service_id = descriptor.id.as_str();
        info!(
            service_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "restarting service"
        );

        if let Some(old) = slot.instance.take() {
            let stopped = self.launcher.stop(&old, self.settings.grace_timeout()).await;
            debug!(service_id, instance_id = %old.instance_id, result = ?stopped, "old instance stopped");
        }
        self.publish(service_id, slot);

        tokio::select! {
            () = sleep(delay) => {}
            () = self.cancelled() => return Ok(()),
        }

        let now = Utc::now();
        match self.launch(descriptor).await {
            Ok(instance) => {
                self.health.note_restart(service_id, now).await?;
                info!(service_id, instance_id = %instance.instance_id, pid = ?instance.pid, "service relaunched");
                slot.instance = Some(instance);
                slot.recovery.on_restarted(&descriptor.restart_policy, now);
            }
            Err(source) => {
                warn!(service_id, error = %source, "relaunch failed");
                self.health.note_restart(service_id, now).await?;
                let failed = ProbeResult::unhealthy(service_id, format!("spawn failed: {source}"));
                self.health.record(&failed).await?;
                slot.recovery.on_spawn_failed(source.to_string());
            }
        }
        self.persist_state(service_id, slot).await
    }

    /// Start a process, bounded by the spawn timeout.
    async fn launch(&self, descriptor: &ServiceDescriptor) -> Result<ServiceInstance, StartError> {
        let limit = self.settings.spawn_timeout();
        timeout(limit, self.launcher.start(descriptor))
            .await
            .unwrap_or_else(|_| {
                Err(StartError::spawn_failed(format!(
                    "spawn timed out after {}ms",
                    self.settings.spawn_timeout_ms
                )))
            })
    }

    /// Probe under the concurrency bound and the check timeout. `None` when
    /// shutdown interrupted the probe.
    async fn probe(
        &self,
        descriptor: &ServiceDescriptor,
        instance: &ServiceInstance,
    ) -> Option<ProbeResult> {
        let _permit = tokio::select! {
            permit = self.probe_permits.acquire() => permit.ok()?,
            () = self.cancelled() => return None,
        };

        let limit = descriptor.health_check.timeout();
        tokio::select! {
            result = timeout(limit, self.prober.probe(descriptor, instance)) => Some(
                result.unwrap_or_else(|_| {
                    let err = SupervisorError::ProbeTimeout {
                        service_id: descriptor.id.clone(),
                        timeout_ms: descriptor.health_check.timeout_ms,
                    };
                    warn!(error = %err, "counting probe as unhealthy");
                    ProbeResult::timed_out(&descriptor.id, limit)
                }),
            ),
            () = self.cancelled() => None,
        }
    }

    /// First dependency whose last probe was not healthy.
    fn unavailable_dependency(&self, descriptor: &ServiceDescriptor) -> Option<String> {
        descriptor
            .depends_on
            .iter()
            .find(|dep| !self.health.get(dep).is_some_and(|r| r.is_healthy()))
            .cloned()
    }

    async fn dispatch_alert(&self, service_id: &str, reason: EscalationReason) {
        let history = match self
            .health
            .recent_history(service_id, self.settings.history_len)
            .await
        {
            Ok(history) => history,
            Err(err) => {
                warn!(service_id, error = %err, "could not load history for alert");
                Vec::new()
            }
        };

        let alert = Alert::new(service_id, reason, history);
        let sink = Arc::clone(&self.alerts);
        let limit = self.settings.alert_timeout();
        tokio::spawn(async move {
            let outcome = match timeout(limit, sink.notify(&alert)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SupervisorError::AlertDelivery(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ))),
            };
            match outcome {
                Ok(()) => info!(service_id = %alert.service_id, "alert delivered"),
                Err(err) => warn!(service_id = %alert.service_id, error = %err, "alert not delivered"),
            }
        });
    }

    /// Persist the slot's lifecycle state if it changed, then publish.
    async fn persist_state(&self, service_id: &str, slot: &ServiceSlot) -> SupervisorResult<()> {
        let state = slot.recovery.state;
        if self.health.get(service_id).map(|r| r.state) != Some(state) {
            self.health.set_state(service_id, state).await?;
        }
        self.publish(service_id, slot);
        Ok(())
    }

    fn publish(&self, service_id: &str, slot: &ServiceSlot) {
        let view = SlotView {
            state: slot.recovery.state,
            instance_id: slot.instance.as_ref().map(|i| i.instance_id),
            pid: slot.instance.as_ref().and_then(|i| i.pid),
            suspended: slot.recovery.is_suspended(),
        };
        self.views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service_id.to_string(), view);
    }

    /// Current status of every service in startup order. Never waits on a
    /// running cycle.
    pub fn status(&self) -> Vec<ServiceStatus> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        let records = self.health.snapshot();

        self.descriptors
            .startup_order()
            .into_iter()
            .filter_map(|service_id| {
                let view = views.get(&service_id).cloned().unwrap_or_default();
                let health = records.get(&service_id).cloned()?;
                Some(ServiceStatus {
                    state: view.state,
                    instance_id: view.instance_id,
                    pid: view.pid,
                    suspended: view.suspended,
                    health,
                    service_id,
                })
            })
            .collect()
    }

    /// Signal the control loop and any in-flight cycle to stop.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop every service, dependents before their dependencies.
    ///
    /// Keeps going past individual failures and returns the first one.
    pub async fn shutdown(&self) -> SupervisorResult<()> {
        self.request_shutdown();
        let mut first_error = None;

        for service_id in self.descriptors.shutdown_order() {
            let Ok(slot) = self.slot(&service_id) else {
                continue;
            };
            let mut slot = slot.lock().await;
            if let Some(instance) = slot.instance.take() {
                let result = self.launcher.stop(&instance, self.settings.grace_timeout()).await;
                info!(service_id = %service_id, result = ?result, "service stopped");
            }
            slot.recovery.on_stopped();
            if let Err(err) = self.persist_state(&service_id, &slot).await {
                warn!(service_id = %service_id, error = %err, "could not persist stopped state");
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn cancelled(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    fn descriptor(&self, service_id: &str) -> SupervisorResult<Arc<ServiceDescriptor>> {
        self.descriptors
            .get(service_id)
            .ok_or_else(|| SupervisorError::UnknownService(service_id.to_string()))
    }

    fn slot(&self, service_id: &str) -> SupervisorResult<&Arc<Mutex<ServiceSlot>>> {
        self.slots
            .get(service_id)
            .ok_or_else(|| SupervisorError::UnknownService(service_id.to_string()))
    }
}
