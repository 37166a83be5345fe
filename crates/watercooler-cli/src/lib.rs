//! Watercooler CLI library
//!
//! Argument parsing, layered configuration and the headless `join` loop.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
