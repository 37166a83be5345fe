//! Stateful managers for the Watercooler runtime
//!
//! Manager structs owned by the session task: peer sessions and the state
//! broadcast change filter.

pub mod broadcast;
pub mod session;

pub use broadcast::{BroadcastScheduler, BroadcastStats};
pub use session::{
    CandidateDisposition, Job, JobCompletion, JobOutput, PeerSession, SessionManager, SessionStats, TrackChanges,
};
