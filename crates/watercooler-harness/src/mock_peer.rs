//! Scripted peer connections
//!
//! `MockPeerConnection` follows the offer/answer state machine closely enough
//! for session tests: local tracks travel inside the SDP as
//! `a=track:<stream> <track> <kind>` lines and come out on the other side as
//! `PeerEvent::Track`. Any negotiation step can be made to fail.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use watercooler_core::{
    IceCandidate, LinkState, MediaKind, MediaTrack, NegotiationError, NegotiationStep,
    ParticipantId, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSink, RemoteStream,
    SdpType, SessionDescription,
};

type Failures = Arc<Mutex<Vec<NegotiationStep>>>;

fn check(failures: &Failures, step: NegotiationStep) -> Result<(), NegotiationError> {
    if failures.lock().contains(&step) {
        return Err(NegotiationError::new(step, "injected failure"));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Mock Peer Connection
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signaling {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

struct PeerState {
    signaling: Signaling,
    has_local: bool,
    has_remote: bool,
    connected: bool,
    negotiation_pending: bool,
    local_tracks: Vec<(String, MediaTrack)>,
    applied: Vec<IceCandidate>,
    rejected: usize,
    closed: usize,
    gathered: usize,
}

pub struct MockPeerConnection {
    participant: ParticipantId,
    events: PeerEventSink,
    failures: Failures,
    state: Mutex<PeerState>,
}

impl MockPeerConnection {
    fn new(events: PeerEventSink, failures: Failures) -> Self {
        Self {
            participant: events.participant().clone(),
            events,
            failures,
            state: Mutex::new(PeerState {
                signaling: Signaling::Stable,
                has_local: false,
                has_remote: false,
                connected: false,
                negotiation_pending: false,
                local_tracks: Vec::new(),
                applied: Vec::new(),
                rejected: 0,
                closed: 0,
                gathered: 0,
            }),
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    /// Candidates refused because no remote description was set
    pub fn rejected_candidates(&self) -> usize {
        self.state.lock().rejected
    }

    pub fn local_tracks(&self) -> Vec<MediaTrack> {
        self.state.lock().local_tracks.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    fn describe(state: &PeerState) -> String {
        let mut sdp = String::from("v=0\r\n");
        for (stream, track) in &state.local_tracks {
            sdp.push_str(&format!("a=track:{} {} {}\r\n", stream, track.id, track.kind.as_str()));
        }
        sdp
    }

    /// Raise `NegotiationNeeded` once per stable period
    fn negotiation_needed(&self, state: &mut PeerState) {
        if state.signaling == Signaling::Stable && !state.negotiation_pending {
            state.negotiation_pending = true;
            self.events.emit(PeerEvent::NegotiationNeeded);
        }
    }

    /// Emit the established link once both descriptions are in place
    fn maybe_connected(&self, state: &mut PeerState) {
        if !state.connected && state.signaling == Signaling::Stable && state.has_local && state.has_remote {
            state.connected = true;
            self.events.emit(PeerEvent::LinkStateChanged(LinkState::Connected));
        }
    }
}

fn parse_streams(sdp: &str) -> Vec<RemoteStream> {
    let mut streams: Vec<RemoteStream> = Vec::new();
    for line in sdp.lines() {
        let Some(rest) = line.strip_prefix("a=track:") else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let (Some(stream_id), Some(track_id), Some(kind)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        let kind = match kind {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            _ => continue,
        };
        let track = MediaTrack::new(track_id, kind);
        match streams.iter_mut().find(|s| s.id == stream_id) {
            Some(stream) => stream.tracks.push(track),
            None => {
                let mut stream = RemoteStream::new(stream_id);
                stream.tracks.push(track);
                streams.push(stream);
            }
        }
    }
    streams
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        check(&self.failures, NegotiationStep::CreateOffer)?;
        let state = self.state.lock();
        if state.signaling == Signaling::HaveRemoteOffer {
            return Err(NegotiationError::new(NegotiationStep::CreateOffer, "remote offer pending"));
        }
        Ok(SessionDescription::offer(Self::describe(&state)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        check(&self.failures, NegotiationStep::CreateAnswer)?;
        let state = self.state.lock();
        if state.signaling != Signaling::HaveRemoteOffer {
            return Err(NegotiationError::new(NegotiationStep::CreateAnswer, "no remote offer"));
        }
        Ok(SessionDescription::answer(Self::describe(&state)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        check(&self.failures, NegotiationStep::SetLocalDescription)?;
        let mut state = self.state.lock();
        let next = match (description.kind, state.signaling) {
            (SdpType::Offer, Signaling::Stable | Signaling::HaveLocalOffer) => {
                state.negotiation_pending = false;
                Signaling::HaveLocalOffer
            }
            (SdpType::Answer, Signaling::HaveRemoteOffer) => Signaling::Stable,
            (kind, signaling) => {
                return Err(NegotiationError::new(
                    NegotiationStep::SetLocalDescription,
                    format!("{:?} not allowed in {:?}", kind, signaling),
                ));
            }
        };
        state.signaling = next;
        state.has_local = true;
        state.gathered += 1;
        self.events.emit(PeerEvent::IceCandidate(IceCandidate::new(format!(
            "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
            state.gathered,
            50000 + state.gathered
        ))));
        self.maybe_connected(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        check(&self.failures, NegotiationStep::SetRemoteDescription)?;
        let mut state = self.state.lock();
        let next = match (description.kind, state.signaling) {
            (SdpType::Offer, Signaling::Stable | Signaling::HaveRemoteOffer) => Signaling::HaveRemoteOffer,
            (SdpType::Answer, Signaling::HaveLocalOffer) => Signaling::Stable,
            (kind, signaling) => {
                return Err(NegotiationError::new(
                    NegotiationStep::SetRemoteDescription,
                    format!("{:?} not allowed in {:?}", kind, signaling),
                ));
            }
        };
        state.signaling = next;
        state.has_remote = true;
        for stream in parse_streams(&description.sdp) {
            self.events.emit(PeerEvent::Track(stream));
        }
        self.maybe_connected(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        check(&self.failures, NegotiationStep::AddIceCandidate)?;
        let mut state = self.state.lock();
        if !state.has_remote {
            state.rejected += 1;
            return Err(NegotiationError::new(
                NegotiationStep::AddIceCandidate,
                "no remote description",
            ));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), NegotiationError> {
        check(&self.failures, NegotiationStep::AddTrack)?;
        let mut state = self.state.lock();
        if state.local_tracks.iter().any(|(_, t)| t.id == track.id) {
            return Err(NegotiationError::new(
                NegotiationStep::AddTrack,
                format!("track {} already added", track.id),
            ));
        }
        state.local_tracks.push((stream_id.to_string(), track.clone()));
        self.negotiation_needed(&mut state);
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), NegotiationError> {
        check(&self.failures, NegotiationStep::RemoveTrack)?;
        let mut state = self.state.lock();
        let before = state.local_tracks.len();
        state.local_tracks.retain(|(_, t)| t.id != track_id);
        if state.local_tracks.len() == before {
            return Err(NegotiationError::new(
                NegotiationStep::RemoveTrack,
                format!("track {} is not attached", track_id),
            ));
        }
        self.negotiation_needed(&mut state);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closed += 1;
        if state.connected {
            state.connected = false;
            self.events.emit(PeerEvent::LinkStateChanged(LinkState::Closed));
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Factory
// ----------------------------------------------------------------------------

#[derive(Default)]
struct FactoryState {
    connections: Vec<Arc<MockPeerConnection>>,
    fail_creates: usize,
}

/// Factory handing out `MockPeerConnection`s; clones share state
#[derive(Clone, Default)]
pub struct MockPeerConnectionFactory {
    state: Arc<Mutex<FactoryState>>,
    failures: Failures,
}

impl MockPeerConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` creations
    pub fn fail_next_creates(&self, count: usize) {
        self.state.lock().fail_creates = count;
    }

    /// Fail `step` on every connection until `clear_failures`
    pub fn fail_step(&self, step: NegotiationStep) {
        let mut failures = self.failures.lock();
        if !failures.contains(&step) {
            failures.push(step);
        }
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Most recent connection created for `participant`
    pub fn latest(&self, participant: &ParticipantId) -> Option<Arc<MockPeerConnection>> {
        self.state
            .lock()
            .connections
            .iter()
            .rev()
            .find(|c| c.participant() == participant)
            .cloned()
    }

    pub fn connections_for(&self, participant: &ParticipantId) -> Vec<Arc<MockPeerConnection>> {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|c| c.participant() == participant)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerConnectionFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        check(&self.failures, NegotiationStep::CreateConnection)?;
        let mut state = self.state.lock();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(NegotiationError::new(
                NegotiationStep::CreateConnection,
                "injected failure",
            ));
        }
        let connection = Arc::new(MockPeerConnection::new(events, self.failures.clone()));
        state.connections.push(connection.clone());
        Ok(connection)
    }
}
