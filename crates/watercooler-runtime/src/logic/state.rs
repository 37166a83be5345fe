//! Session task commands and shared observable state

use std::sync::Arc;

use tokio::sync::watch;

use watercooler_core::{MediaSource, ParticipantId, StateSnapshot};

/// Requests from the facade to the session task
pub enum Command {
    /// Broadcast a state snapshot through the change filter
    PushState(StateSnapshot),
    /// Replace the local media source and attach its tracks everywhere
    SetMediaSource(Arc<dyn MediaSource>),
    /// Local capture failed; continue without media
    MediaUnavailable(String),
    SetVolume { participant: ParticipantId, volume: f64 },
    /// Tear everything down and exit
    Shutdown,
}

impl core::fmt::Debug for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::PushState(snapshot) => f.debug_tuple("PushState").field(snapshot).finish(),
            Command::SetMediaSource(source) => f.debug_tuple("SetMediaSource").field(&source.stream_id()).finish(),
            Command::MediaUnavailable(reason) => f.debug_tuple("MediaUnavailable").field(reason).finish(),
            Command::SetVolume { participant, volume } => f
                .debug_struct("SetVolume")
                .field("participant", participant)
                .field("volume", volume)
                .finish(),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Values the session task publishes for the facade to read
#[derive(Debug)]
pub struct ConnectionViews {
    self_id: watch::Sender<Option<ParticipantId>>,
    max_participants_reached: watch::Sender<bool>,
    media_error: watch::Sender<Option<String>>,
}

impl Default for ConnectionViews {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionViews {
    pub fn new() -> Self {
        Self {
            self_id: watch::channel(None).0,
            max_participants_reached: watch::channel(false).0,
            media_error: watch::channel(None).0,
        }
    }

    pub fn self_id(&self) -> Option<ParticipantId> {
        self.self_id.borrow().clone()
    }

    pub fn subscribe_self_id(&self) -> watch::Receiver<Option<ParticipantId>> {
        self.self_id.subscribe()
    }

    pub fn set_self_id(&self, id: Option<ParticipantId>) {
        self.self_id.send_replace(id);
    }

    pub fn max_participants_reached(&self) -> bool {
        *self.max_participants_reached.borrow()
    }

    pub fn set_max_participants_reached(&self, reached: bool) {
        self.max_participants_reached.send_replace(reached);
    }

    pub fn media_error(&self) -> Option<String> {
        self.media_error.borrow().clone()
    }

    pub fn set_media_error(&self, error: Option<String>) {
        self.media_error.send_replace(error);
    }

    /// Back to the state of a facade that never connected
    pub fn reset(&self) {
        self.set_self_id(None);
        self.set_max_participants_reached(false);
    }
}
