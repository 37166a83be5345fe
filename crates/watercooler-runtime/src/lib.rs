//! Watercooler Runtime Engine
//!
//! This crate contains the orchestration engine for a Watercooler room:
//! - `RemoteConnection`: the public facade an application holds
//! - `SessionTask`: the single task owning every peer session
//! - Session and broadcast managers
//!
//! `watercooler-core` provides the stable types and the transport seams.

pub mod builder;
pub mod connection;
pub mod logic;
pub mod managers;

pub use builder::RemoteConnectionBuilder;
pub use connection::RemoteConnection;
pub use managers::*;

// Re-export core types for convenience
pub use watercooler_core::{
    ConnectionConfig, MediaKind, MediaSource, MovementSampler, ParticipantId, Position, Roster,
    SessionPhase, StateSnapshot, WatercoolerError, WatercoolerResult,
};
