//! Implementation of the `overwatch validate` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::ConfigLoader;
use crate::services::DescriptorStore;

#[derive(Args, Debug)]
pub struct ValidateArgs {}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub valid: bool,
    pub service_count: usize,
    /// Services grouped by startup wave
    pub startup_waves: Vec<Vec<String>>,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Configuration is valid: {} service(s)", self.service_count)];
        lines.push("\nStartup order:".to_string());
        for (index, wave) in self.startup_waves.iter().enumerate() {
            lines.push(format!("  {}. {}", index + 1, wave.join(", ")));
        }
        lines.join("\n")
    }
}

pub fn execute(_args: ValidateArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_with(config_path).context("Invalid configuration")?;
    let descriptors = DescriptorStore::new(config.services).context("Invalid service definitions")?;

    let result = ValidateOutput {
        valid: true,
        service_count: descriptors.len(),
        startup_waves: descriptors.startup_waves().to_vec(),
    };
    output(&result, json_mode);
    Ok(())
}
