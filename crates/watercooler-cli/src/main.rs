//! Watercooler CLI entry point

use clap::Parser;
use tracing::error;

use watercooler_cli::{
    app::{print_config, run_join},
    cli::{Cli, Commands},
    config::AppConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref(), &cli.overrides)?;

    let outcome = match cli.command {
        Commands::Join => run_join(config).await,
        Commands::Config => print_config(&config),
    };
    if let Err(e) = &outcome {
        error!("{}", e);
    }
    Ok(outcome?)
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
