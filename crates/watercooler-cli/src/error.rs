//! Error handling for the Watercooler CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Watercooler error: {0}")]
    Watercooler(#[from] watercooler_core::WatercoolerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer connection setup failed: {0}")]
    PeerSetup(#[from] watercooler_core::NegotiationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        CliError::Config(err.to_string())
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
