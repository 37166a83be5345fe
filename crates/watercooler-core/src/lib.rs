//! Watercooler Core
//!
//! Stable API definitions for the Watercooler peer presence layer:
//! - participant identity, positions and the broadcast `StateSnapshot`
//! - the signaling wire messages (`InboundSignal` / `OutboundSignal`)
//! - collaborator traits for the signaling transport, peer connections,
//!   local media and remote volume
//! - the `RosterStore`, the stream resource cache and configuration
//!
//! The orchestration itself lives in `watercooler-runtime`.

pub mod config;
pub mod errors;
pub mod media;
pub mod resources;
pub mod roster;
pub mod signal;
pub mod transport;
pub mod types;

pub use config::{BroadcastConfig, ChannelConfig, ConnectionConfig, IceServerConfig, ReconnectConfig};
pub use errors::{
    NegotiationError, NegotiationStep, TransportError, WatercoolerError, WatercoolerResult,
};
pub use media::{
    LocalMediaSource, MediaKind, MediaSource, MediaTrack, RemoteStream, VolumeControl,
    VolumeControlFactory,
};
pub use resources::StreamResources;
pub use roster::{Participant, ParticipantUpdate, Roster, RosterStore, SessionPhase};
pub use signal::{
    Frame, IceCandidate, InboundSignal, OutboundSignal, SdpType, SessionDescription, SignalKind,
    StateUpdate,
};
pub use transport::{
    LinkState, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSink, PeerSignal,
    SendOutcome, SignalHandler, SignalingTransport,
};
pub use types::{round_to, MovementSampler, ParticipantId, Position, StateSnapshot, StaticSampler};
