//! Overwatch CLI entry point.

use clap::Parser;

use overwatch::cli::{commands, handle_error, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Validate(args) => commands::validate::execute(args, config, cli.json),
        Commands::Status(args) => commands::status::execute(args, config, cli.json).await,
        Commands::History(args) => commands::history::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
