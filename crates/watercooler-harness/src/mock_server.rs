//! In-memory rendezvous server
//!
//! Behaves like the room server: assigns sequential ids, greets each joiner
//! with the current member list, announces joins and leaves, relays targeted
//! negotiation messages and fans state updates out to everyone else.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use watercooler_core::{InboundSignal, OutboundSignal, ParticipantId};

use crate::mock_transport::MockTransport;

struct ServerState {
    next_id: u64,
    max_users: Option<usize>,
    members: BTreeMap<ParticipantId, MockTransport>,
}

#[derive(Clone)]
pub struct MockSignalingServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MockSignalingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSignalingServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                next_id: 1,
                max_users: None,
                members: BTreeMap::new(),
            })),
        }
    }

    /// Refuse joins beyond `max` members
    pub fn with_max_users(self, max: usize) -> Self {
        self.state.lock().max_users = Some(max);
        self
    }

    /// A fresh transport that joins this server on connect
    pub fn transport(&self) -> MockTransport {
        MockTransport::linked(self.clone())
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.state.lock().members.keys().cloned().collect()
    }

    pub(crate) fn join(&self, transport: &MockTransport) {
        let admitted = {
            let mut state = self.state.lock();
            let full = state.max_users.is_some_and(|max| state.members.len() >= max);
            if full {
                None
            } else {
                let id = ParticipantId::new(format!("user-{}", state.next_id));
                state.next_id += 1;
                let others: Vec<_> = state
                    .members
                    .iter()
                    .map(|(id, member)| (id.clone(), member.clone()))
                    .collect();
                state.members.insert(id.clone(), transport.clone());
                Some((id, others))
            }
        };

        let Some((id, others)) = admitted else {
            debug!("Room full; refusing join");
            transport.deliver(InboundSignal::MaxUsersReached);
            return;
        };

        debug!(%id, "Participant joined mock server");
        transport.set_assigned_id(Some(id.clone()));
        transport.deliver(InboundSignal::Hello {
            id: id.clone(),
            user_ids: others.iter().map(|(other, _)| other.clone()).collect(),
        });
        for (_, member) in others {
            member.deliver(InboundSignal::UserJoined { user_id: id.clone() });
        }
    }

    pub(crate) fn leave(&self, id: &ParticipantId) {
        let remaining: Vec<_> = {
            let mut state = self.state.lock();
            if state.members.remove(id).is_none() {
                return;
            }
            state.members.values().cloned().collect()
        };
        debug!(%id, "Participant left mock server");
        for member in remaining {
            member.deliver(InboundSignal::UserLeft { user_id: id.clone() });
        }
    }

    pub(crate) fn route(&self, from: &ParticipantId, signal: OutboundSignal) {
        match signal {
            OutboundSignal::IceCandidate { target, candidate } => {
                self.deliver_to(&target, InboundSignal::IceCandidate {
                    user_id: from.clone(),
                    candidate,
                });
            }
            OutboundSignal::Offer { target, offer } => {
                self.deliver_to(&target, InboundSignal::Offer {
                    user_id: from.clone(),
                    offer,
                });
            }
            OutboundSignal::Answer { target, answer } => {
                self.deliver_to(&target, InboundSignal::Answer {
                    user_id: from.clone(),
                    answer,
                });
            }
            OutboundSignal::StateUpdate(mut update) => {
                update.user_id = Some(from.clone());
                let others: Vec<_> = {
                    let state = self.state.lock();
                    state
                        .members
                        .iter()
                        .filter(|(id, _)| *id != from)
                        .map(|(_, member)| member.clone())
                        .collect()
                };
                for member in others {
                    member.deliver(InboundSignal::StateUpdate(update.clone()));
                }
            }
        }
    }

    fn deliver_to(&self, target: &ParticipantId, signal: InboundSignal) {
        let member = self.state.lock().members.get(target).cloned();
        match member {
            Some(member) => {
                member.deliver(signal);
            }
            None => debug!(%target, "Relay target not in room"),
        }
    }
}
