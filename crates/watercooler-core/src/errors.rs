//! Error types for Watercooler
//!
//! Transport, negotiation and configuration failures, plus the
//! `WatercoolerError` type that unifies them.

use core::fmt;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Signaling transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },
    #[error("Invalid signaling URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Step of the offer/answer exchange that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    CreateConnection,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    AddTrack,
    RemoveTrack,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStep::CreateConnection => "create connection",
            NegotiationStep::CreateOffer => "create offer",
            NegotiationStep::CreateAnswer => "create answer",
            NegotiationStep::SetLocalDescription => "set local description",
            NegotiationStep::SetRemoteDescription => "set remote description",
            NegotiationStep::AddIceCandidate => "add ice candidate",
            NegotiationStep::AddTrack => "add track",
            NegotiationStep::RemoveTrack => "remove track",
        };
        f.write_str(name)
    }
}

/// A rejected negotiation step, as reported by a peer connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{step} failed: {reason}")]
pub struct NegotiationError {
    pub step: NegotiationStep,
    pub reason: String,
}

impl NegotiationError {
    pub fn new<T: Into<String>>(step: NegotiationStep, reason: T) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for Watercooler
#[derive(Debug, thiserror::Error)]
pub enum WatercoolerError {
    /// Signaling transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Peer negotiation error
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Wire (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Facade started twice
    #[error("Connection already running")]
    AlreadyRunning,

    /// Channel communication error
    #[error("Channel error: {message}")]
    Channel { message: String },
}

impl WatercoolerError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        WatercoolerError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        WatercoolerError::Channel {
            message: message.into(),
        }
    }
}

/// Result type for Watercooler operations
pub type WatercoolerResult<T> = Result<T, WatercoolerError>;
