//! Implementation of the `overwatch history` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;

use crate::adapters::sqlite::{initialize_database, SqliteHealthRepository};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::ProbeResult;
use crate::domain::ports::HealthRepository;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Service id
    pub service: String,

    /// Number of probe results to show, newest first
    #[arg(long, short, default_value = "20")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryOutput {
    pub service_id: String,
    pub results: Vec<ProbeResult>,
}

impl CommandOutput for HistoryOutput {
    fn to_human(&self) -> String {
        if self.results.is_empty() {
            return format!("No probe history for '{}'.", self.service_id);
        }
        format!(
            "Probe history for {} (newest first):\n{}",
            self.service_id,
            TableFormatter::new().format_history(&self.results)
        )
    }
}

pub async fn execute(args: HistoryArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_with(config_path).context("Invalid configuration")?;
    if !config.services.iter().any(|s| s.id == args.service) {
        anyhow::bail!("Unknown service: {}", args.service);
    }

    let pool = initialize_database(&config.database)
        .await
        .context("Failed to open health state database")?;
    let results = SqliteHealthRepository::new(pool)
        .recent_probes(&args.service, args.limit)
        .await
        .context("Failed to read probe history")?;

    output(
        &HistoryOutput {
            service_id: args.service,
            results,
        },
        json_mode,
    );
    Ok(())
}
