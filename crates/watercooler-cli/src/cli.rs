//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

/// Flags layered over the file and environment configuration
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Signaling server URL
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Horizontal position
    #[arg(long, global = true)]
    pub x: Option<f64>,

    /// Vertical position
    #[arg(long, global = true)]
    pub y: Option<f64>,

    /// Facing angle in radians
    #[arg(long, global = true)]
    pub angle: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a room and log roster changes until Ctrl-C
    Join,
    /// Print the effective configuration as TOML
    Config,
}
