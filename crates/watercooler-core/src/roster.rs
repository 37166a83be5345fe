//! Roster Store
//!
//! The roster maps every known participant to their session phase, inbound
//! streams, last state and last error. Mutations go through `RosterStore`,
//! which publishes each result as a fresh immutable `Roster` on a
//! `tokio::sync::watch` channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::{
    errors::NegotiationError,
    media::RemoteStream,
    transport::LinkState,
    types::{ParticipantId, Position, StateSnapshot},
};

// ----------------------------------------------------------------------------
// Roster Entries
// ----------------------------------------------------------------------------

/// Negotiation phase of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// No connection object yet; creation failed and will be retried
    Uninitialized,
    Negotiating,
    Connected,
    /// Last published phase of an entry, just before it leaves the roster
    Closed,
}

/// Everything known about one remote participant
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub phase: SessionPhase,
    pub link: LinkState,
    pub streams: Vec<RemoteStream>,
    pub state: Option<StateSnapshot>,
    pub error: Option<NegotiationError>,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            phase: SessionPhase::Uninitialized,
            link: LinkState::New,
            streams: Vec::new(),
            state: None,
            error: None,
        }
    }

    /// Latest known position, for distance-based volume
    pub fn position(&self) -> Option<Position> {
        self.state.map(|s| s.position)
    }
}

/// Partial update merged into an existing entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantUpdate {
    pub phase: Option<SessionPhase>,
    pub link: Option<LinkState>,
    /// Added, or replaces the stream with the same id
    pub stream: Option<RemoteStream>,
    pub state: Option<StateSnapshot>,
    /// `Some(None)` clears the error
    pub error: Option<Option<NegotiationError>>,
}

impl ParticipantUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: SessionPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn link(mut self, link: LinkState) -> Self {
        self.link = Some(link);
        self
    }

    pub fn stream(mut self, stream: RemoteStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn state(mut self, state: StateSnapshot) -> Self {
        self.state = Some(state);
        self
    }

    pub fn error(mut self, error: NegotiationError) -> Self {
        self.error = Some(Some(error));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    fn merge_into(self, entry: &mut Participant) {
        if let Some(phase) = self.phase {
            entry.phase = phase;
        }
        if let Some(link) = self.link {
            entry.link = link;
        }
        if let Some(stream) = self.stream {
            match entry.streams.iter_mut().find(|s| s.id == stream.id) {
                Some(existing) => *existing = stream,
                None => entry.streams.push(stream),
            }
        }
        if let Some(state) = self.state {
            entry.state = Some(state);
        }
        if let Some(error) = self.error {
            entry.error = error;
        }
    }
}

// ----------------------------------------------------------------------------
// Roster Snapshot
// ----------------------------------------------------------------------------

/// Immutable view of all participants; cheap to clone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Arc<BTreeMap<ParticipantId, Participant>>,
}

impl Roster {
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if both values are the same published snapshot
    pub fn same_snapshot(&self, other: &Roster) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

// ----------------------------------------------------------------------------
// Roster Store
// ----------------------------------------------------------------------------

/// Single mutation path for the roster
#[derive(Debug)]
pub struct RosterStore {
    tx: watch::Sender<Roster>,
}

impl Default for RosterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Roster::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Roster> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Roster {
        self.tx.borrow().clone()
    }

    /// Add an empty entry; returns false if `id` is already present
    pub fn add_participant(&self, id: ParticipantId) -> bool {
        if self.tx.borrow().contains(&id) {
            return false;
        }
        self.commit(|entries| {
            entries.insert(id.clone(), Participant::new(id));
        });
        true
    }

    /// Publish the entry as `Closed`, then drop it; returns the closed entry
    pub fn remove_participant(&self, id: &ParticipantId) -> Option<Participant> {
        let Some(mut closed) = self.tx.borrow().get(id).cloned() else {
            trace!(participant = %id, "Removal of unknown participant ignored");
            return None;
        };
        closed.phase = SessionPhase::Closed;
        let last = closed.clone();
        self.commit(|entries| {
            entries.insert(id.clone(), last);
        });
        self.commit(|entries| {
            entries.remove(id);
        });
        debug!(participant = %id, "Participant removed from roster");
        Some(closed)
    }

    /// Merge `update` into the entry for `id`; unknown ids are left alone.
    ///
    /// An update that changes nothing publishes nothing.
    pub fn update_participant(&self, id: &ParticipantId, update: ParticipantUpdate) -> bool {
        let Some(mut merged) = self.tx.borrow().get(id).cloned() else {
            trace!(participant = %id, "Update for unknown participant ignored");
            return false;
        };
        update.merge_into(&mut merged);
        if self.tx.borrow().get(id) == Some(&merged) {
            return true;
        }
        self.commit(|entries| {
            entries.insert(id.clone(), merged);
        });
        true
    }

    /// Drop every entry
    pub fn clear(&self) {
        if self.tx.borrow().is_empty() {
            return;
        }
        self.commit(|entries| entries.clear());
    }

    fn commit<F>(&self, mutate: F)
    where
        F: FnOnce(&mut BTreeMap<ParticipantId, Participant>),
    {
        let mut next = (*self.tx.borrow().entries).clone();
        mutate(&mut next);
        self.tx.send_replace(Roster {
            entries: Arc::new(next),
        });
    }
}
