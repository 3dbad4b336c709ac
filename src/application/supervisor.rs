//! Supervisor assembly: wires configuration, storage, launcher, prober and
//! alert sinks into a running [`Orchestrator`].

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::health_prober::Prober;
use super::process_launcher::ProcessLauncher;
use crate::adapters::alerts::build_alert_sink;
use crate::adapters::memory::InMemoryHealthRepository;
use crate::adapters::sqlite::{initialize_database, SqliteHealthRepository};
use crate::domain::errors::{SupervisorError, SupervisorResult};
use crate::domain::models::Config;
use crate::domain::ports::{AlertSink, HealthProber, HealthRepository, ServiceLauncher};
use crate::services::{DescriptorStore, HealthStateStore, Orchestrator, ServiceStatus};

/// Pluggable collaborators. Production code uses [`Supervisor::from_config`];
/// tests inject fakes through [`Supervisor::build`].
pub struct SupervisorParts {
    pub launcher: Arc<dyn ServiceLauncher>,
    pub prober: Arc<dyn HealthProber>,
    pub repository: Arc<dyn HealthRepository>,
    pub alerts: Arc<dyn AlertSink>,
}

pub struct Supervisor {
    orchestrator: Arc<Orchestrator>,
    health: Arc<HealthStateStore>,
}

impl Supervisor {
    /// Validate the descriptor set and restore persisted health state.
    ///
    /// Fails before any process is launched if the descriptors are invalid.
    pub async fn build(config: &Config, parts: SupervisorParts) -> SupervisorResult<Self> {
        let descriptors = Arc::new(DescriptorStore::new(config.services.clone())?);
        let health = Arc::new(
            HealthStateStore::open(parts.repository, &descriptors, config.supervisor.history_len).await?,
        );

        let orchestrator = Arc::new(Orchestrator::new(
            descriptors,
            parts.launcher,
            parts.prober,
            Arc::clone(&health),
            parts.alerts,
            config.supervisor.clone(),
        ));

        Ok(Self {
            orchestrator,
            health,
        })
    }

    /// Production wiring. `ephemeral` keeps health state in memory only.
    pub async fn from_config(config: &Config, ephemeral: bool) -> SupervisorResult<Self> {
        let repository: Arc<dyn HealthRepository> = if ephemeral {
            info!("using in-memory health state");
            Arc::new(InMemoryHealthRepository::new())
        } else {
            let pool = initialize_database(&config.database).await?;
            info!(path = %config.database.path, "health state database ready");
            Arc::new(SqliteHealthRepository::new(pool))
        };

        let launcher = Arc::new(ProcessLauncher::new());
        let prober = Arc::new(Prober::new(launcher.clone()));
        let parts = SupervisorParts {
            launcher,
            prober,
            repository,
            alerts: build_alert_sink(&config.alerts),
        };

        Self::build(config, parts).await
    }

    /// Start every service, supervise until `shutdown_signal` resolves, then
    /// stop everything in reverse dependency order.
    ///
    /// The signal is honored from the first moment, including while services
    /// are still starting. A fatal error ends supervision early; services are
    /// still stopped.
    pub async fn run_until<F>(&self, shutdown_signal: F) -> SupervisorResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown_signal);
        let mut signalled = false;

        let startup = self.orchestrator.start_all();
        tokio::pin!(startup);
        let started = tokio::select! {
            started = &mut startup => started,
            () = &mut shutdown_signal => {
                info!("shutdown requested during startup");
                signalled = true;
                self.orchestrator.request_shutdown();
                startup.await
            }
        };

        if signalled {
            return match started {
                Ok(()) | Err(SupervisorError::ShuttingDown) => self.orchestrator.shutdown().await,
                Err(err) => Err(err),
            };
        }
        started?;

        let supervise = self.orchestrator.run();
        tokio::pin!(supervise);

        let outcome = tokio::select! {
            outcome = &mut supervise => outcome,
            () = &mut shutdown_signal => {
                info!("shutdown requested");
                self.orchestrator.request_shutdown();
                supervise.await
            }
        };

        let stopped = self.orchestrator.shutdown().await;
        if let Err(err) = &stopped {
            warn!(error = %err, "shutdown was incomplete");
        }
        outcome.and(stopped)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn health(&self) -> &Arc<HealthStateStore> {
        &self.health
    }

    pub fn status(&self) -> Vec<ServiceStatus> {
        self.orchestrator.status()
    }
}
