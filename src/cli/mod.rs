//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::history::HistoryArgs;
use commands::run::RunArgs;
use commands::status::StatusArgs;
use commands::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(name = "overwatch")]
#[command(about = "Overwatch - single-node service supervisor", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .overwatch/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start all services and supervise them until interrupted
    Run(RunArgs),
    /// Validate the configuration and print the startup order
    Validate(ValidateArgs),
    /// Show persisted health state
    Status(StatusArgs),
    /// Show recent probe results for a service
    History(HistoryArgs),
}

/// Print an error with its cause chain and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": causes,
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
