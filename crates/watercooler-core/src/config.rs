//! Centralized Configuration Management
//!
//! All configuration structures used by the connection layer, with defaults
//! matching the hosted room and a single `validate()` entry point.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Broadcast Configuration
// ----------------------------------------------------------------------------

/// Throttling and quantization for local state broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Sampling interval in milliseconds
    pub interval_ms: u64,
    /// Rounding step for positions (0 disables rounding)
    pub position_precision: f64,
    /// Rounding step for the orientation angle
    pub angle_precision: f64,
    /// Rounding step for speed
    pub speed_precision: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            position_precision: 1.0,
            angle_precision: 0.1,
            speed_precision: 0.1,
        }
    }
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ----------------------------------------------------------------------------
// ICE Configuration
// ----------------------------------------------------------------------------

/// A STUN/TURN server handed to the peer connection factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun<T: Into<String>>(url: T) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig::stun("stun:stun.l.google.com:19302")]
}

// ----------------------------------------------------------------------------
// Reconnect Configuration
// ----------------------------------------------------------------------------

/// Exponential backoff used by the signaling transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the session task channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub command_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a remote connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Rendezvous endpoint
    pub signaling_url: String,
    pub broadcast: BroadcastConfig,
    pub ice_servers: Vec<IceServerConfig>,
    pub reconnect: ReconnectConfig,
    pub channels: ChannelConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000/".to_string(),
            broadcast: BroadcastConfig::default(),
            ice_servers: default_ice_servers(),
            reconnect: ReconnectConfig::default(),
            channels: ChannelConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_signaling_url<T: Into<String>>(mut self, url: T) -> Self {
        self.signaling_url = url.into();
        self
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.signaling_url.trim().is_empty() {
            return Err("Signaling URL cannot be empty".into());
        }
        url::Url::parse(&self.signaling_url)
            .map_err(|e| format!("Invalid signaling URL {}: {}", self.signaling_url, e))?;

        if self.broadcast.interval_ms == 0 {
            return Err("Broadcast interval cannot be zero".into());
        }
        let precisions = [
            self.broadcast.position_precision,
            self.broadcast.angle_precision,
            self.broadcast.speed_precision,
        ];
        if precisions.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err("Broadcast precisions must be finite and non-negative".into());
        }

        if self.reconnect.multiplier < 1.0 {
            return Err("Reconnect multiplier must be at least 1.0".into());
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err("Initial reconnect delay cannot be greater than max delay".into());
        }

        if self.channels.command_buffer_size == 0 {
            return Err("Command buffer size cannot be zero".into());
        }
        if self.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err("ICE server entries need at least one URL".into());
        }

        Ok(())
    }
}
