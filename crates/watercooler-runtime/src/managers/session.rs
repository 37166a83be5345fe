//! Peer session manager
//!
//! Owns exactly one `PeerSession` per remote participant. Negotiation steps
//! for a session run one at a time, in order, as in-flight futures; each
//! finished step comes back as a `JobCompletion` tagged with the session
//! generation so results for a re-created session are discarded. Closing a
//! session aborts its in-flight futures.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use futures::future::{AbortHandle, Abortable, Aborted, BoxFuture};
use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use watercooler_core::{
    IceCandidate, MediaSource, MediaTrack, NegotiationError, ParticipantId, PeerConnection,
    PeerConnectionFactory, PeerEventSink, PeerSignal, RemoteStream, SessionDescription,
    SessionPhase, StateSnapshot, StateUpdate,
};

// ----------------------------------------------------------------------------
// Negotiation Jobs
// ----------------------------------------------------------------------------

/// One serialized unit of negotiation work
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Bring the attached local tracks in line with the media source
    SyncTracks,
    /// Create an offer and set it locally
    Offer,
    /// Accept a remote offer and produce an answer
    Answer(SessionDescription),
    /// Apply the remote answer to our outstanding offer
    ApplyAnswer(SessionDescription),
}

/// Successful result of a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    TracksSynced,
    OfferReady(SessionDescription),
    AnswerReady(SessionDescription),
    AnswerApplied,
    CandidatesApplied { applied: usize, dropped: usize },
}

/// Local tracks a job added to or removed from the connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackChanges {
    pub attached: Vec<String>,
    pub detached: Vec<String>,
}

impl TrackChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Queue,
    CandidateFlush,
}

/// A finished in-flight future
#[derive(Debug)]
pub struct JobCompletion {
    pub participant: ParticipantId,
    pub generation: u64,
    ticket: u64,
    origin: Origin,
    /// The remote description landed, even if a later step failed
    remote_set: bool,
    /// Track changes made before the job finished or failed
    pub tracks: TrackChanges,
    pub result: Result<JobOutput, NegotiationError>,
}

/// What a job did, before it is tagged with its session
struct JobRun {
    remote_set: bool,
    tracks: TrackChanges,
    result: Result<JobOutput, NegotiationError>,
}

impl JobRun {
    fn local(result: Result<JobOutput, NegotiationError>) -> Self {
        Self {
            remote_set: false,
            tracks: TrackChanges::default(),
            result,
        }
    }
}

#[derive(Default)]
struct TrackPlan {
    /// `None` when there is no media source
    stream_id: Option<String>,
    add: Vec<MediaTrack>,
    remove: Vec<String>,
}

impl TrackPlan {
    fn reconcile(media: Option<&Arc<dyn MediaSource>>, attached: &BTreeSet<String>) -> Self {
        let (stream_id, tracks) = match media {
            Some(source) => (Some(source.stream_id()), source.tracks()),
            None => (None, Vec::new()),
        };
        let remove = attached
            .iter()
            .filter(|id| !tracks.iter().any(|t| &t.id == *id))
            .cloned()
            .collect();
        let add = tracks.into_iter().filter(|t| !attached.contains(&t.id)).collect();
        Self { stream_id, add, remove }
    }
}

async fn sync_tracks(connection: &dyn PeerConnection, plan: TrackPlan) -> TrackChanges {
    let mut changes = TrackChanges::default();
    for track_id in plan.remove {
        match connection.remove_track(&track_id).await {
            Ok(()) => changes.detached.push(track_id),
            Err(e) => warn!(track = %track_id, "Could not detach local track: {}", e),
        }
    }
    let Some(stream_id) = plan.stream_id else {
        return changes;
    };
    for track in plan.add {
        match connection.add_track(&track, &stream_id).await {
            Ok(()) => changes.attached.push(track.id),
            Err(e) => warn!(track = %track.id, "Skipping local track: {}", e),
        }
    }
    changes
}

async fn offer(connection: &dyn PeerConnection) -> Result<SessionDescription, NegotiationError> {
    let offer = connection.create_offer().await?;
    connection.set_local_description(offer.clone()).await?;
    Ok(offer)
}

async fn answer(connection: &dyn PeerConnection) -> Result<SessionDescription, NegotiationError> {
    let answer = connection.create_answer().await?;
    connection.set_local_description(answer.clone()).await?;
    Ok(answer)
}

async fn run_job(connection: Arc<dyn PeerConnection>, job: Job, plan: TrackPlan) -> JobRun {
    let connection = connection.as_ref();
    match job {
        Job::SyncTracks => JobRun {
            tracks: sync_tracks(connection, plan).await,
            ..JobRun::local(Ok(JobOutput::TracksSynced))
        },
        Job::Offer => JobRun::local(offer(connection).await.map(JobOutput::OfferReady)),
        Job::Answer(remote_offer) => {
            if let Err(e) = connection.set_remote_description(remote_offer).await {
                return JobRun::local(Err(e));
            }
            let tracks = sync_tracks(connection, plan).await;
            JobRun {
                remote_set: true,
                tracks,
                result: answer(connection).await.map(JobOutput::AnswerReady),
            }
        }
        Job::ApplyAnswer(remote_answer) => match connection.set_remote_description(remote_answer).await {
            Ok(()) => JobRun {
                remote_set: true,
                ..JobRun::local(Ok(JobOutput::AnswerApplied))
            },
            Err(e) => JobRun::local(Err(e)),
        },
    }
}

async fn apply_candidates(connection: Arc<dyn PeerConnection>, candidates: Vec<IceCandidate>) -> JobRun {
    let mut applied = 0;
    let mut dropped = 0;
    for candidate in candidates {
        match connection.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => {
                debug!("Ignoring rejected candidate: {}", e);
                dropped += 1;
            }
        }
    }
    JobRun::local(Ok(JobOutput::CandidatesApplied { applied, dropped }))
}

type InFlight = BoxFuture<'static, Result<JobCompletion, Aborted>>;

// ----------------------------------------------------------------------------
// Peer Session
// ----------------------------------------------------------------------------

/// Whether the remote side's description has been applied
enum RemoteDescription {
    /// Candidates received so far, in arrival order
    Pending(Vec<IceCandidate>),
    Applied,
}

enum Link {
    /// Connection creation failed; retried on the next reference
    Uninitialized,
    Open {
        connection: Arc<dyn PeerConnection>,
        remote: RemoteDescription,
        negotiating: bool,
    },
}

/// What happened to an inbound candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applying,
    Deferred,
    /// No connection object to apply it to
    Dropped,
}

/// State kept for one remote participant
pub struct PeerSession {
    id: ParticipantId,
    generation: u64,
    link: Link,
    attached: BTreeSet<String>,
    queue: VecDeque<Job>,
    busy: bool,
    streams: Vec<RemoteStream>,
    remote_state: Option<StateSnapshot>,
    last_error: Option<NegotiationError>,
    /// Abort handles for this session's in-flight futures, by ticket
    running: HashMap<u64, AbortHandle>,
}

impl PeerSession {
    fn new(id: ParticipantId, generation: u64) -> Self {
        Self {
            id,
            generation,
            link: Link::Uninitialized,
            attached: BTreeSet::new(),
            queue: VecDeque::new(),
            busy: false,
            streams: Vec::new(),
            remote_state: None,
            last_error: None,
            running: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.link {
            Link::Uninitialized => SessionPhase::Uninitialized,
            Link::Open {
                remote: RemoteDescription::Applied,
                negotiating: false,
                ..
            } => SessionPhase::Connected,
            Link::Open { .. } => SessionPhase::Negotiating,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.link, Link::Open { .. })
    }

    pub fn connection(&self) -> Option<&Arc<dyn PeerConnection>> {
        match &self.link {
            Link::Open { connection, .. } => Some(connection),
            Link::Uninitialized => None,
        }
    }

    pub fn remote_description_applied(&self) -> bool {
        matches!(
            self.link,
            Link::Open {
                remote: RemoteDescription::Applied,
                ..
            }
        )
    }

    pub fn deferred_candidates(&self) -> usize {
        match &self.link {
            Link::Open {
                remote: RemoteDescription::Pending(queued),
                ..
            } => queued.len(),
            _ => 0,
        }
    }

    pub fn attached_tracks(&self) -> &BTreeSet<String> {
        &self.attached
    }

    pub fn streams(&self) -> &[RemoteStream] {
        &self.streams
    }

    pub fn remote_state(&self) -> Option<StateSnapshot> {
        self.remote_state
    }

    pub fn last_error(&self) -> Option<&NegotiationError> {
        self.last_error.as_ref()
    }

    /// Mark the remote description applied, returning deferred candidates
    fn remote_applied(&mut self) -> Vec<IceCandidate> {
        match &mut self.link {
            Link::Open {
                remote, negotiating, ..
            } => {
                *negotiating = false;
                match std::mem::replace(remote, RemoteDescription::Applied) {
                    RemoteDescription::Pending(queued) => queued,
                    RemoteDescription::Applied => Vec::new(),
                }
            }
            Link::Uninitialized => Vec::new(),
        }
    }

    fn set_negotiating(&mut self, value: bool) {
        if let Link::Open { negotiating, .. } = &mut self.link {
            *negotiating = value;
        }
    }

    /// Abort every in-flight future; returns how many were still running
    fn abort_running(&mut self) -> usize {
        let count = self.running.len();
        for (_, handle) in self.running.drain() {
            handle.abort();
        }
        count
    }

    /// Close the connection; consuming the session makes this happen once
    async fn close(self) {
        if let Link::Open { connection, .. } = self.link {
            connection.close().await;
        }
    }
}

// ----------------------------------------------------------------------------
// Session Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub creation_failures: u64,
    pub negotiation_failures: u64,
    pub stale_results: u64,
    /// In-flight futures dropped because their session closed
    pub aborted_jobs: u64,
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Manages the peer sessions of one connection
pub struct SessionManager {
    sessions: HashMap<ParticipantId, PeerSession>,
    factory: Arc<dyn PeerConnectionFactory>,
    events: mpsc::UnboundedSender<PeerSignal>,
    media: Option<Arc<dyn MediaSource>>,
    in_flight: FuturesUnordered<InFlight>,
    next_generation: u64,
    next_ticket: u64,
    stats: SessionStats,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        events: mpsc::UnboundedSender<PeerSignal>,
        media: Option<Arc<dyn MediaSource>>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            factory,
            events,
            media,
            in_flight: FuturesUnordered::new(),
            next_generation: 1,
            next_ticket: 1,
            stats: SessionStats::default(),
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&PeerSession> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Generation of the live session for `id`
    pub fn generation_of(&self, id: &ParticipantId) -> Option<u64> {
        self.sessions.get(id).map(|s| s.generation)
    }

    pub fn set_media(&mut self, media: Option<Arc<dyn MediaSource>>) {
        self.media = media;
    }

    pub fn media(&self) -> Option<&Arc<dyn MediaSource>> {
        self.media.as_ref()
    }

    /// Make sure a session with a connection exists for `id`.
    ///
    /// The session entry always exists afterwards. If the factory fails the
    /// entry stays `Uninitialized` with the error recorded.
    pub async fn ensure(&mut self, id: &ParticipantId) -> Result<(), NegotiationError> {
        let existing = self.sessions.get(id).map(|s| (s.is_open(), s.generation));
        let generation = match existing {
            Some((true, _)) => return Ok(()),
            Some((false, generation)) => generation,
            None => {
                let generation = self.next_generation;
                self.next_generation += 1;
                self.sessions
                    .insert(id.clone(), PeerSession::new(id.clone(), generation));
                generation
            }
        };

        let sink = PeerEventSink::new(id.clone(), generation, self.events.clone());
        let created = self.factory.create(sink).await;

        let Some(session) = self.sessions.get_mut(id) else {
            return Ok(());
        };
        match created {
            Ok(connection) => {
                debug!(participant = %id, generation, "Peer connection created");
                session.link = Link::Open {
                    connection,
                    remote: RemoteDescription::Pending(Vec::new()),
                    negotiating: false,
                };
                session.last_error = None;
                self.stats.connections_created += 1;
                Ok(())
            }
            Err(e) => {
                warn!(participant = %id, "Peer connection creation failed: {}", e);
                session.last_error = Some(e.clone());
                self.stats.creation_failures += 1;
                Err(e)
            }
        }
    }

    /// Queue a negotiation job; returns false if the session has no connection
    pub fn enqueue(&mut self, id: &ParticipantId, job: Job) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        if !session.is_open() {
            debug!(participant = %id, ?job, "Dropping job for uninitialized session");
            return false;
        }
        if matches!(job, Job::Offer | Job::SyncTracks) && session.queue.contains(&job) {
            return true;
        }
        session.queue.push_back(job);
        self.pump(id);
        true
    }

    /// Queue a track reconcile on every open session
    pub fn sync_tracks_everywhere(&mut self) -> usize {
        let ids: Vec<_> = self
            .sessions
            .values()
            .filter(|s| s.is_open())
            .map(|s| s.id.clone())
            .collect();
        for id in &ids {
            self.enqueue(id, Job::SyncTracks);
        }
        ids.len()
    }

    fn pump(&mut self, id: &ParticipantId) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.busy {
            return;
        }
        let Some(connection) = session.connection().cloned() else {
            return;
        };
        let Some(job) = session.queue.pop_front() else {
            return;
        };

        if matches!(job, Job::Offer | Job::Answer(_)) {
            session.set_negotiating(true);
        }
        let plan = match job {
            Job::SyncTracks | Job::Answer(_) => TrackPlan::reconcile(self.media.as_ref(), &session.attached),
            Job::Offer | Job::ApplyAnswer(_) => TrackPlan::default(),
        };
        session.busy = true;

        let run = run_job(connection, job, plan);
        self.launch(id, Origin::Queue, run.boxed());
    }

    fn spawn_candidates(&mut self, id: &ParticipantId, candidates: Vec<IceCandidate>) {
        if candidates.is_empty() {
            return;
        }
        let Some(connection) = self.sessions.get(id).and_then(|s| s.connection().cloned()) else {
            return;
        };
        let run = apply_candidates(connection, candidates);
        self.launch(id, Origin::CandidateFlush, run.boxed());
    }

    /// Start `run` for the session `id`, abortable through that session
    fn launch(&mut self, id: &ParticipantId, origin: Origin, run: BoxFuture<'static, JobRun>) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let (handle, registration) = AbortHandle::new_pair();
        session.running.insert(ticket, handle);

        let participant = id.clone();
        let generation = session.generation;
        let work = async move {
            let run = run.await;
            JobCompletion {
                participant,
                generation,
                ticket,
                origin,
                remote_set: run.remote_set,
                tracks: run.tracks,
                result: run.result,
            }
        };
        self.in_flight.push(Abortable::new(work, registration).boxed());
    }

    /// Apply a remote candidate now, or defer it until a remote description exists
    pub fn add_remote_candidate(&mut self, id: &ParticipantId, candidate: IceCandidate) -> CandidateDisposition {
        let Some(session) = self.sessions.get_mut(id) else {
            return CandidateDisposition::Dropped;
        };
        match &mut session.link {
            Link::Uninitialized => return CandidateDisposition::Dropped,
            Link::Open {
                remote: RemoteDescription::Pending(queued),
                ..
            } => {
                queued.push(candidate);
                return CandidateDisposition::Deferred;
            }
            Link::Open {
                remote: RemoteDescription::Applied,
                ..
            } => {}
        }
        self.spawn_candidates(id, vec![candidate]);
        CandidateDisposition::Applying
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Next finished in-flight future; pending forever when none are running.
    ///
    /// Aborted futures are skipped.
    pub async fn next_completion(&mut self) -> JobCompletion {
        loop {
            match self.in_flight.next().await {
                Some(Ok(done)) => return done,
                Some(Err(Aborted)) => continue,
                None => futures::future::pending::<()>().await,
            }
        }
    }

    /// Fold a finished job into its session.
    ///
    /// Returns `None` when the session was closed or re-created meanwhile.
    pub fn complete(&mut self, completion: JobCompletion) -> Option<JobCompletion> {
        let id = completion.participant.clone();
        let Some(session) = self.sessions.get_mut(&id) else {
            self.stats.stale_results += 1;
            return None;
        };
        if session.generation != completion.generation {
            self.stats.stale_results += 1;
            return None;
        }
        session.running.remove(&completion.ticket);
        if completion.origin == Origin::Queue {
            session.busy = false;
        }

        for track in &completion.tracks.detached {
            session.attached.remove(track);
        }
        session.attached.extend(completion.tracks.attached.iter().cloned());
        let flush = if completion.remote_set {
            session.remote_applied()
        } else {
            Vec::new()
        };

        match &completion.result {
            Ok(JobOutput::OfferReady(_)) | Ok(JobOutput::AnswerReady(_)) | Ok(JobOutput::AnswerApplied) => {
                session.last_error = None;
            }
            Ok(JobOutput::TracksSynced) | Ok(JobOutput::CandidatesApplied { .. }) => {}
            Err(e) => {
                // An answer that failed after the offer landed is still owed.
                session.set_negotiating(completion.remote_set);
                session.last_error = Some(e.clone());
                self.stats.negotiation_failures += 1;
            }
        }

        self.spawn_candidates(&id, flush);
        self.pump(&id);
        Some(completion)
    }

    /// Record remote media for `id`, replacing a stream with the same id
    pub fn record_stream(&mut self, id: &ParticipantId, stream: RemoteStream) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        match session.streams.iter_mut().find(|s| s.id == stream.id) {
            Some(existing) => *existing = stream,
            None => session.streams.push(stream),
        }
        true
    }

    /// Merge a state update over the last known state (last write wins)
    pub fn apply_state(&mut self, id: &ParticipantId, update: &StateUpdate) -> Option<StateSnapshot> {
        let session = self.sessions.get_mut(id)?;
        let merged = update.apply_to(session.remote_state);
        session.remote_state = Some(merged);
        Some(merged)
    }

    /// Remove and close the session for `id`, aborting its in-flight work
    pub async fn close(&mut self, id: &ParticipantId) -> bool {
        let Some(mut session) = self.sessions.remove(id) else {
            return false;
        };
        let aborted = session.abort_running();
        self.stats.aborted_jobs += aborted as u64;
        debug!(participant = %id, aborted, "Closing peer session");
        session.close().await;
        self.stats.connections_closed += 1;
        true
    }

    /// Close every session and abandon in-flight work
    pub async fn close_all(&mut self) -> usize {
        self.in_flight = FuturesUnordered::new();
        let sessions: Vec<_> = self.sessions.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        for mut session in sessions {
            self.stats.aborted_jobs += session.abort_running() as u64;
            session.close().await;
            self.stats.connections_closed += 1;
        }
        count
    }
}
