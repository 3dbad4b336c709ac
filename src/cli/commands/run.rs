//! Implementation of the `overwatch run` command.

use anyhow::{Context, Result};
use clap::Args;
use std::future::Future;
use std::path::Path;
use tracing::{info, warn};

use crate::application::Supervisor;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Keep health state in memory instead of the configured database
    #[arg(long)]
    pub ephemeral: bool,
}

pub async fn execute(args: RunArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_with(config_path).context("Invalid configuration")?;

    let mut log_config = LogConfig::from(&config.logging);
    if json_mode {
        log_config.format = LogFormat::Json;
    }
    let _logger = LoggerImpl::init(&log_config)?;

    let shutdown = shutdown_signal();

    info!(
        services = config.services.len(),
        ephemeral = args.ephemeral,
        "starting supervisor"
    );
    let supervisor = Supervisor::from_config(&config, args.ephemeral)
        .await
        .context("Failed to initialize supervisor")?;

    supervisor
        .run_until(shutdown)
        .await
        .context("Supervisor stopped with an error")?;

    info!("supervisor stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. The handlers are registered on call, so
/// a signal that arrives before the future is first polled is not lost.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = signal(SignalKind::interrupt());
    let terminate = signal(SignalKind::terminate());
    async move {
        match (interrupt, terminate) {
            (Ok(mut interrupt), Ok(mut terminate)) => tokio::select! {
                _ = interrupt.recv() => info!("received SIGINT"),
                _ = terminate.recv() => info!("received SIGTERM"),
            },
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "could not install signal handlers, falling back to ctrl-c");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "could not listen for ctrl-c");
                }
            }
        }
    }
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "could not listen for ctrl-c");
        }
    }
}
