//! Watercooler CLI configuration
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - `watercooler.toml` in the working directory
//! - the file named by `--config`
//! - `WATERCOOLER_*` environment variables, `__` separating sections
//!   (`WATERCOOLER_CONNECTION__SIGNALING_URL`)
//! - command-line flags

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use watercooler_core::{ConnectionConfig, Position, StaticSampler};

use crate::cli::Overrides;
use crate::error::{CliError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "watercooler.toml";
pub const ENV_PREFIX: &str = "WATERCOOLER_";

/// Complete configuration for the CLI participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub participant: ParticipantConfig,
}

/// The fixed state this participant broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub x: f64,
    pub y: f64,
    /// Radians
    pub angle: f64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            x: 430.0,
            y: 150.0,
            angle: 0.0,
        }
    }
}

impl ParticipantConfig {
    pub fn sampler(&self) -> StaticSampler {
        StaticSampler::new(Position(self.x, self.y), self.angle)
    }
}

impl AppConfig {
    /// Defaults, the working-directory file, an explicit file, then env
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(CliError::Config(format!(
                    "Configuration file {} not found",
                    path.display()
                )));
            }
        }
        Self::from_figment(Self::figment(config_file), overrides)
    }

    /// Apply command-line overrides on top of `figment` and validate
    pub fn from_figment(mut figment: Figment, overrides: &Overrides) -> Result<Self> {
        if let Some(url) = &overrides.url {
            figment = figment.merge(("connection.signaling_url", url));
        }
        if let Some(x) = overrides.x {
            figment = figment.merge(("participant.x", x));
        }
        if let Some(y) = overrides.y {
            figment = figment.merge(("participant.y", y));
        }
        if let Some(angle) = overrides.angle {
            figment = figment.merge(("participant.angle", angle));
        }

        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate().map_err(CliError::Config)?;
        let values = [self.participant.x, self.participant.y, self.participant.angle];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CliError::Config("Participant position and angle must be finite".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Figment {
        Figment::new().merge(Serialized::defaults(AppConfig::default()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::from_figment(base(), &Overrides::default()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.connection.signaling_url, "ws://localhost:3000/");
    }

    #[test]
    fn test_file_overrides_defaults_partially() {
        let figment = base().merge(Toml::string(
            r#"
            [connection]
            signaling_url = "wss://room.example.com/"

            [connection.broadcast]
            interval_ms = 100

            [participant]
            x = 10.0
            "#,
        ));
        let config = AppConfig::from_figment(figment, &Overrides::default()).unwrap();
        assert_eq!(config.connection.signaling_url, "wss://room.example.com/");
        assert_eq!(config.connection.broadcast.interval_ms, 100);
        assert_eq!(config.connection.broadcast.position_precision, 1.0);
        assert_eq!(config.participant.x, 10.0);
        assert_eq!(config.participant.y, 150.0);
    }

    #[test]
    fn test_flags_win_over_file() {
        let figment = base().merge(Toml::string(
            r#"
            [connection]
            signaling_url = "wss://room.example.com/"
            [participant]
            x = 10.0
            "#,
        ));
        let overrides = Overrides {
            url: Some("ws://127.0.0.1:4000/".into()),
            x: Some(55.0),
            y: None,
            angle: Some(1.5),
        };
        let config = AppConfig::from_figment(figment, &overrides).unwrap();
        assert_eq!(config.connection.signaling_url, "ws://127.0.0.1:4000/");
        assert_eq!(config.participant.x, 55.0);
        assert_eq!(config.participant.angle, 1.5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let figment = base().merge(Toml::string("[connection.broadcast]\ninterval_ms = 0\n"));
        let result = AppConfig::from_figment(figment, &Overrides::default());
        assert!(matches!(result, Err(CliError::Config(_))));

        let figment = base().merge(Toml::string("[participant]\nx = \"left\"\n"));
        assert!(AppConfig::from_figment(figment, &Overrides::default()).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/watercooler.toml")), &Overrides::default());
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_toml_round_trips_through_figment() {
        let mut config = AppConfig::default();
        config.participant.angle = 0.75;
        let text = config.to_toml().unwrap();
        assert!(text.contains("[connection.broadcast]"));

        let reloaded = AppConfig::from_figment(base().merge(Toml::string(&text)), &Overrides::default()).unwrap();
        assert_eq!(reloaded, config);
    }
}
