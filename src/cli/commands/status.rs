//! Implementation of the `overwatch status` command.
//!
//! Reads the persisted health state; works whether or not a supervisor is
//! currently running.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;

use crate::adapters::sqlite::{initialize_database, SqliteHealthRepository};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::HealthRecord;
use crate::domain::ports::HealthRepository;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this service
    #[arg(long)]
    pub service: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub services: Vec<HealthRecord>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        if self.services.is_empty() {
            return "No health state recorded yet.".to_string();
        }
        TableFormatter::new().format_records(&self.services)
    }
}

pub async fn execute(args: StatusArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_with(config_path).context("Invalid configuration")?;
    let pool = initialize_database(&config.database)
        .await
        .context("Failed to open health state database")?;
    let repo = SqliteHealthRepository::new(pool);

    let mut services = repo.load_all().await.context("Failed to read health state")?;
    if let Some(ref wanted) = args.service {
        services.retain(|record| &record.service_id == wanted);
        if services.is_empty() {
            anyhow::bail!("No health state recorded for service '{wanted}'");
        }
    }

    output(&StatusOutput { services }, json_mode);
    Ok(())
}
