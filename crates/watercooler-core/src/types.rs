//! Core types for Watercooler
//!
//! Participant identity, 2D positions and the application state snapshot
//! that is broadcast alongside media.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::config::BroadcastConfig;

// ----------------------------------------------------------------------------
// Participant Identity
// ----------------------------------------------------------------------------

/// Opaque participant identifier assigned by the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new participant ID
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Position
// ----------------------------------------------------------------------------

/// A point in the shared 2D room, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position(pub f64, pub f64);

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self(x, y)
    }

    pub fn x(&self) -> f64 {
        self.0
    }

    pub fn y(&self) -> f64 {
        self.1
    }

    pub fn distance_squared(&self, other: &Position) -> f64 {
        (self.0 - other.0).powi(2) + (self.1 - other.1).powi(2)
    }

    pub fn distance(&self, other: &Position) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self(x, y)
    }
}

/// Round `value` to the nearest multiple of `precision`.
///
/// A precision of zero leaves the value untouched. Non-finite values
/// quantize to zero so they compare equal to each other.
pub fn round_to(value: f64, precision: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    if precision == 0.0 {
        return value;
    }
    (value / precision).round() * precision
}

// ----------------------------------------------------------------------------
// State Snapshot
// ----------------------------------------------------------------------------

/// Application-level state broadcast to every peer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub position: Position,
    /// Orientation in radians
    pub angle: f64,
    pub speed: f64,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl StateSnapshot {
    /// Create a snapshot with media flags cleared
    pub fn new(position: Position, angle: f64, speed: f64) -> Self {
        Self {
            position,
            angle,
            speed,
            audio_enabled: false,
            video_enabled: false,
        }
    }

    /// Set the media-enabled flags
    pub fn with_media(mut self, audio_enabled: bool, video_enabled: bool) -> Self {
        self.audio_enabled = audio_enabled;
        self.video_enabled = video_enabled;
        self
    }

    /// Copy of this snapshot with numeric fields rounded for comparison
    pub fn quantized(&self, config: &BroadcastConfig) -> Self {
        Self {
            position: Position(
                round_to(self.position.0, config.position_precision),
                round_to(self.position.1, config.position_precision),
            ),
            angle: round_to(self.angle, config.angle_precision),
            speed: round_to(self.speed, config.speed_precision),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
        }
    }
}

// ----------------------------------------------------------------------------
// Movement Sampling
// ----------------------------------------------------------------------------

/// Synchronous, non-blocking view of the local movement integrator
pub trait MovementSampler: Send + Sync {
    fn position(&self) -> Position;
    /// Orientation in radians
    fn angle(&self) -> f64;
    fn speed(&self) -> f64;
}

/// A participant that never moves
#[derive(Debug, Clone, Copy)]
pub struct StaticSampler {
    position: Position,
    angle: f64,
}

impl StaticSampler {
    pub fn new(position: Position, angle: f64) -> Self {
        Self { position, angle }
    }
}

impl Default for StaticSampler {
    fn default() -> Self {
        Self::new(Position(430.0, 150.0), 0.0)
    }
}

impl MovementSampler for StaticSampler {
    fn position(&self) -> Position {
        self.position
    }

    fn angle(&self) -> f64 {
        self.angle
    }

    fn speed(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to(12.4, 1.0), 12.0);
        assert_eq!(round_to(12.6, 1.0), 13.0);
        assert!((round_to(0.449, 0.1) - 0.4).abs() < 1e-9);
        assert_eq!(round_to(0.123456, 0.0), 0.123456);
    }

    #[test]
    fn test_round_to_non_finite() {
        assert_eq!(round_to(f64::NAN, 1.0), 0.0);
        assert_eq!(round_to(f64::INFINITY, 0.0), 0.0);
    }

    #[test]
    fn test_quantized_ignores_jitter() {
        let config = BroadcastConfig::default();
        let a = StateSnapshot::new(Position(10.2, 9.8), 0.51, 2.04);
        let b = StateSnapshot::new(Position(9.9, 10.1), 0.49, 1.96);
        assert_eq!(a.quantized(&config), b.quantized(&config));

        let c = StateSnapshot::new(Position(11.0, 10.0), 0.5, 2.0);
        assert_ne!(a.quantized(&config), c.quantized(&config));
    }

    #[test]
    fn test_position_serializes_as_pair() {
        let json = serde_json::to_string(&Position(12.0, 34.0)).unwrap();
        assert_eq!(json, "[12.0,34.0]");
        let back: Position = serde_json::from_str("[1,2]").unwrap();
        assert_eq!(back, Position(1.0, 2.0));
    }

    #[test]
    fn test_distance() {
        let a = Position(0.0, 0.0);
        let b = Position(3.0, 4.0);
        assert_eq!(a.distance_squared(&b), 25.0);
        assert_eq!(a.distance(&b), 5.0);
    }
}
