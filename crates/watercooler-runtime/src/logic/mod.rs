//! Session Logic Module
//!
//! The session task is split into focused components:
//! - `state`: Commands from the facade and the values it observes
//! - `handlers`: Signaling handler registration and teardown
//! - `task`: Main `SessionTask` event loop
//!
//! ## Single Owner
//!
//! All peer sessions, the broadcast filter and the volume controls are owned
//! by one `SessionTask`. Inbound signals and peer connection callbacks are
//! forwarded into it over channels, and negotiation steps run as futures the
//! task polls itself, so a participant's steps never overlap and nothing is
//! shared behind a lock.
//!
//! The roster is the one exception: the task writes it through `RosterStore`
//! and every reader holds an immutable snapshot.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::HandlerRegistry;
pub use state::{Command, ConnectionViews};
pub use task::{SessionTask, TaskContext};
