//! Collaborator traits for the connection layer
//!
//! `SignalingTransport` abstracts the rendezvous channel, `PeerConnection`
//! and `PeerConnectionFactory` abstract the point-to-point media session. Peer
//! connections report asynchronous happenings through a `PeerEventSink`, which
//! feeds the session task.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    errors::{NegotiationError, TransportError},
    media::{MediaTrack, RemoteStream},
    signal::{IceCandidate, InboundSignal, OutboundSignal, SessionDescription, SignalKind},
    types::ParticipantId,
};

// ----------------------------------------------------------------------------
// Signaling Transport
// ----------------------------------------------------------------------------

/// Callback invoked for every inbound message of a registered type
pub type SignalHandler = Arc<dyn Fn(InboundSignal) + Send + Sync>;

/// Result of a best-effort send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The channel was down; nothing was queued
    NotConnected,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Ordered duplex channel to the rendezvous server
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open the channel. Reconnection after a drop is the transport's job.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send without queuing; a logged no-op while disconnected
    fn send(&self, signal: OutboundSignal) -> SendOutcome;

    /// Register the handler for `kind`, replacing any previous one
    fn on(&self, kind: SignalKind, handler: SignalHandler);

    /// Remove the handler for `kind`
    fn off(&self, kind: SignalKind);

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Peer Connections
// ----------------------------------------------------------------------------

/// Transport-level state reported by a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate was gathered and should be relayed
    IceCandidate(IceCandidate),
    /// Local tracks changed; an offer should be made
    NegotiationNeeded,
    /// Remote media arrived
    Track(RemoteStream),
    LinkStateChanged(LinkState),
}

/// A `PeerEvent` tagged with the session it belongs to
#[derive(Debug, Clone)]
pub struct PeerSignal {
    pub participant: ParticipantId,
    pub generation: u64,
    pub event: PeerEvent,
}

/// Handle a peer connection uses to report events to its session
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    participant: ParticipantId,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerSignal>,
}

impl PeerEventSink {
    pub fn new(
        participant: ParticipantId,
        generation: u64,
        tx: mpsc::UnboundedSender<PeerSignal>,
    ) -> Self {
        Self {
            participant,
            generation,
            tx,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns false once the session task is gone
    pub fn emit(&self, event: PeerEvent) -> bool {
        let sent = self.tx.send(PeerSignal {
            participant: self.participant.clone(),
            generation: self.generation,
            event,
        });
        match sent {
            Ok(()) => true,
            Err(mpsc::error::SendError(signal)) => {
                debug!(
                    participant = %signal.participant,
                    generation = signal.generation,
                    event = ?signal.event,
                    "Peer event dropped, session task is gone"
                );
                false
            }
        }
    }
}

/// A point-to-point media connection with one remote participant
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;

    /// Fails if no remote description has been applied yet
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Attach a local track; may trigger `PeerEvent::NegotiationNeeded`
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), NegotiationError>;

    /// Detach a previously added local track; may trigger `PeerEvent::NegotiationNeeded`
    async fn remove_track(&self, track_id: &str) -> Result<(), NegotiationError>;

    async fn close(&self);
}

/// Creates peer connections wired to a session's event sink
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new("b".into(), 7, tx);
        assert!(sink.emit(PeerEvent::NegotiationNeeded));

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.participant, ParticipantId::from("b"));
        assert_eq!(signal.generation, 7);
        assert_eq!(signal.event, PeerEvent::NegotiationNeeded);
    }

    #[test]
    fn test_sink_reports_closed_task() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = PeerEventSink::new("b".into(), 1, tx);
        assert!(!sink.emit(PeerEvent::LinkStateChanged(LinkState::Closed)));
    }
}
