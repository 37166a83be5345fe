//! Session Task Implementation
//!
//! The session task owns every peer session, the broadcast scheduler and the
//! stream resource cache. Inbound signals, peer connection events, facade
//! commands, finished negotiation steps and broadcast ticks are processed one
//! at a time from a single `tokio::select!` loop, so no state is shared.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use watercooler_core::{
    InboundSignal, MovementSampler, OutboundSignal, ParticipantId, ParticipantUpdate, PeerEvent,
    PeerSignal, RosterStore, SignalingTransport, StateSnapshot, StateUpdate,
    StreamResources, VolumeControl, VolumeControlFactory,
};

use super::handlers::HandlerRegistry;
use super::state::{Command, ConnectionViews};
use crate::managers::{BroadcastScheduler, CandidateDisposition, Job, JobCompletion, JobOutput, SessionManager};

// ----------------------------------------------------------------------------
// Task Context
// ----------------------------------------------------------------------------

/// Everything the session task takes ownership of
pub struct TaskContext {
    pub transport: Arc<dyn SignalingTransport>,
    pub sessions: SessionManager,
    pub scheduler: BroadcastScheduler,
    pub handlers: HandlerRegistry,
    pub roster: Arc<RosterStore>,
    pub views: Arc<ConnectionViews>,
    pub sampler: Option<Arc<dyn MovementSampler>>,
    pub volume_controls: Option<Arc<dyn VolumeControlFactory>>,
    pub commands: mpsc::Receiver<Command>,
    pub signals: mpsc::UnboundedReceiver<InboundSignal>,
    pub peer_events: mpsc::UnboundedReceiver<PeerSignal>,
}

// ----------------------------------------------------------------------------
// Session Task
// ----------------------------------------------------------------------------

pub struct SessionTask {
    transport: Arc<dyn SignalingTransport>,
    sessions: SessionManager,
    scheduler: BroadcastScheduler,
    handlers: HandlerRegistry,
    roster: Arc<RosterStore>,
    views: Arc<ConnectionViews>,
    sampler: Option<Arc<dyn MovementSampler>>,
    volume_controls: Option<Arc<dyn VolumeControlFactory>>,
    volumes: StreamResources<Arc<dyn VolumeControl>>,
    command_receiver: mpsc::Receiver<Command>,
    signal_receiver: mpsc::UnboundedReceiver<InboundSignal>,
    peer_event_receiver: mpsc::UnboundedReceiver<PeerSignal>,
    self_id: Option<ParticipantId>,
}

impl SessionTask {
    pub fn new(context: TaskContext) -> Self {
        Self {
            transport: context.transport,
            sessions: context.sessions,
            scheduler: context.scheduler,
            handlers: context.handlers,
            roster: context.roster,
            views: context.views,
            sampler: context.sampler,
            volume_controls: context.volume_controls,
            volumes: StreamResources::new(),
            command_receiver: context.commands,
            signal_receiver: context.signals,
            peer_event_receiver: context.peer_events,
            self_id: None,
        }
    }

    /// Run until shutdown is requested or the facade goes away
    pub async fn run(mut self) {
        info!("Session task starting");
        let mut ticker = tokio::time::interval(self.scheduler.config().interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(Command::Shutdown) => break,
                        Some(cmd) => self.process_command(cmd),
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(signal) = self.signal_receiver.recv() => {
                    self.process_signal(signal).await;
                }

                Some(event) = self.peer_event_receiver.recv() => {
                    self.process_peer_event(event);
                }

                completion = self.sessions.next_completion(), if self.sessions.has_in_flight() => {
                    self.process_completion(completion);
                }

                _ = ticker.tick() => {
                    self.broadcast_tick();
                }
            }
        }

        self.teardown().await;
        info!("Session task stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn process_command(&mut self, command: Command) {
        debug!(?command, "Processing command");
        match command {
            Command::PushState(snapshot) => {
                self.broadcast(snapshot);
            }
            Command::SetMediaSource(source) => {
                self.sessions.set_media(Some(source));
                let sessions = self.sessions.sync_tracks_everywhere();
                info!(sessions, "Local media source attached");
            }
            Command::MediaUnavailable(reason) => {
                warn!("Continuing without local media: {}", reason);
                self.sessions.set_media(None);
                let sessions = self.sessions.sync_tracks_everywhere();
                debug!(sessions, "Detaching local tracks");
            }
            Command::SetVolume { participant, volume } => {
                self.set_volume(&participant, volume);
            }
            Command::Shutdown => {}
        }
    }

    fn set_volume(&mut self, participant: &ParticipantId, volume: f64) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
        let Some(factory) = self.volume_controls.clone() else {
            debug!("No volume controls configured");
            return;
        };
        let Some(session) = self.sessions.get(participant) else {
            debug!(%participant, "Volume for unknown participant ignored");
            return;
        };
        for stream in session.streams() {
            let control = self
                .volumes
                .get_or_insert_with(participant, &stream.id, || factory.create(participant, stream));
            control.set_volume(volume);
        }
    }

    // ------------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------------

    async fn process_signal(&mut self, signal: InboundSignal) {
        let kind = signal.kind();
        debug!(%kind, "Processing signal");
        match signal {
            InboundSignal::Hello { id, user_ids } => {
                self.handle_hello(id, user_ids).await;
            }
            InboundSignal::MaxUsersReached => {
                warn!("Signaling server reports the room is full");
                self.views.set_max_participants_reached(true);
            }
            InboundSignal::UserJoined { user_id } => {
                if self.is_self(&user_id) {
                    return;
                }
                info!(participant = %user_id, "Participant joined");
                // The newcomer has not seen our state yet.
                self.scheduler.reset();
                if self.ensure_participant(&user_id).await {
                    self.sessions.enqueue(&user_id, Job::SyncTracks);
                }
            }
            InboundSignal::UserLeft { user_id } => {
                info!(participant = %user_id, "Participant left");
                self.remove_participant(&user_id).await;
            }
            InboundSignal::IceCandidate { user_id, candidate } => {
                if self.is_self(&user_id) {
                    return;
                }
                self.ensure_participant(&user_id).await;
                match self.sessions.add_remote_candidate(&user_id, candidate) {
                    CandidateDisposition::Applying => {}
                    CandidateDisposition::Deferred => {
                        debug!(participant = %user_id, "Deferring candidate until a remote description is set");
                    }
                    CandidateDisposition::Dropped => {
                        debug!(participant = %user_id, "Dropping candidate without a connection");
                    }
                }
            }
            InboundSignal::Offer { user_id, offer } => {
                if self.is_self(&user_id) {
                    return;
                }
                if self.ensure_participant(&user_id).await {
                    self.sessions.enqueue(&user_id, Job::Answer(offer));
                    self.sync_participant(&user_id);
                }
            }
            InboundSignal::Answer { user_id, answer } => {
                if self.is_self(&user_id) {
                    return;
                }
                if self.ensure_participant(&user_id).await {
                    self.sessions.enqueue(&user_id, Job::ApplyAnswer(answer));
                }
            }
            InboundSignal::StateUpdate(update) => {
                self.handle_state_update(update).await;
            }
        }
    }

    async fn handle_hello(&mut self, id: ParticipantId, user_ids: Vec<ParticipantId>) {
        info!(self_id = %id, others = user_ids.len(), "Signaling server assigned identity");

        let previous = self.self_id.clone().filter(|previous| *previous != id);
        if let Some(previous) = previous {
            // Peers knew us by the old id; their sessions with us are gone.
            info!(%previous, "Identity changed; resetting peer sessions");
            for stale in self.sessions.ids() {
                self.remove_participant(&stale).await;
            }
        }

        self.self_id = Some(id.clone());
        self.views.set_self_id(Some(id.clone()));
        self.scheduler.reset();

        let listed: BTreeSet<ParticipantId> = user_ids.into_iter().filter(|u| *u != id).collect();
        for stale in self.sessions.ids().into_iter().filter(|s| !listed.contains(s)) {
            self.remove_participant(&stale).await;
        }
        for user_id in listed {
            self.ensure_participant(&user_id).await;
        }
    }

    async fn handle_state_update(&mut self, update: StateUpdate) {
        let Some(user_id) = update.user_id.clone() else {
            debug!("State update without sender ignored");
            return;
        };
        if self.is_self(&user_id) {
            return;
        }
        self.ensure_participant(&user_id).await;
        if let Some(state) = self.sessions.apply_state(&user_id, &update) {
            self.roster
                .update_participant(&user_id, ParticipantUpdate::new().state(state));
        }
    }

    fn is_self(&self, id: &ParticipantId) -> bool {
        self.self_id.as_ref() == Some(id)
    }

    /// Reference a participant, creating the session lazily.
    ///
    /// Returns true if the session has a usable connection.
    async fn ensure_participant(&mut self, id: &ParticipantId) -> bool {
        let created = self.sessions.ensure(id).await;
        self.roster.add_participant(id.clone());
        self.sync_participant(id);
        created.is_ok()
    }

    async fn remove_participant(&mut self, id: &ParticipantId) {
        let closed = self.sessions.close(id).await;
        let last = self.roster.remove_participant(id).map(|entry| entry.phase);
        let evicted = self.volumes.evict_owner(id);
        debug!(participant = %id, closed, evicted, ?last, "Participant removed");
    }

    /// Mirror session phase and error into the roster entry
    fn sync_participant(&self, id: &ParticipantId) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let update = ParticipantUpdate::new().phase(session.phase());
        let update = match session.last_error() {
            Some(error) => update.error(error.clone()),
            None => update.clear_error(),
        };
        self.roster.update_participant(id, update);
    }

    // ------------------------------------------------------------------------
    // Peer Events
    // ------------------------------------------------------------------------

    fn process_peer_event(&mut self, signal: PeerSignal) {
        let PeerSignal {
            participant,
            generation,
            event,
        } = signal;
        if self.sessions.generation_of(&participant) != Some(generation) {
            debug!(%participant, generation, "Ignoring event from a closed connection");
            return;
        }

        match event {
            PeerEvent::IceCandidate(candidate) => {
                self.transport.send(OutboundSignal::IceCandidate {
                    target: participant,
                    candidate,
                });
            }
            PeerEvent::NegotiationNeeded => {
                debug!(%participant, "Negotiation needed");
                self.sessions.enqueue(&participant, Job::Offer);
                self.sync_participant(&participant);
            }
            PeerEvent::Track(stream) => {
                debug!(%participant, stream = %stream.id, "Remote stream received");
                self.sessions.record_stream(&participant, stream.clone());
                self.roster
                    .update_participant(&participant, ParticipantUpdate::new().stream(stream));
            }
            PeerEvent::LinkStateChanged(link) => {
                debug!(%participant, ?link, "Link state changed");
                self.roster
                    .update_participant(&participant, ParticipantUpdate::new().link(link));
            }
        }
    }

    fn process_completion(&mut self, completion: JobCompletion) {
        let Some(done) = self.sessions.complete(completion) else {
            debug!("Discarding negotiation result for a closed session");
            return;
        };
        let participant = done.participant;
        if !done.tracks.is_empty() {
            debug!(
                %participant,
                attached = ?done.tracks.attached,
                detached = ?done.tracks.detached,
                "Local tracks changed"
            );
        }

        match done.result {
            Ok(JobOutput::OfferReady(offer)) => {
                self.transport.send(OutboundSignal::Offer {
                    target: participant.clone(),
                    offer,
                });
            }
            Ok(JobOutput::AnswerReady(answer)) => {
                self.transport.send(OutboundSignal::Answer {
                    target: participant.clone(),
                    answer,
                });
            }
            Ok(JobOutput::CandidatesApplied { applied, dropped }) => {
                debug!(%participant, applied, dropped, "Remote candidates processed");
            }
            Ok(JobOutput::TracksSynced) | Ok(JobOutput::AnswerApplied) => {}
            Err(e) => {
                warn!(%participant, "Negotiation failed: {}", e);
            }
        }
        self.sync_participant(&participant);
    }

    // ------------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------------

    fn broadcast_tick(&mut self) {
        let Some(sampler) = self.sampler.as_ref() else {
            return;
        };
        let media = self.sessions.media().map(|m| &**m);
        let snapshot = BroadcastScheduler::sample(sampler.as_ref(), media);
        self.broadcast(snapshot);
    }

    fn broadcast(&mut self, snapshot: StateSnapshot) {
        let Some(self_id) = self.self_id.clone() else {
            return;
        };
        let transport = &self.transport;
        self.scheduler.offer(snapshot, |quantized| {
            transport.send(OutboundSignal::StateUpdate(StateUpdate::from_snapshot(
                Some(self_id),
                quantized,
            )))
        });
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    async fn teardown(&mut self) {
        let deregistered = self.handlers.deregister_all(self.transport.as_ref());
        let closed = self.sessions.close_all().await;
        self.volumes.clear();
        self.roster.clear();
        self.transport.disconnect().await;
        self.self_id = None;
        self.views.reset();
        info!(deregistered, closed, "Connection torn down");
    }
}
