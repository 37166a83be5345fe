//! Remote connection facade
//!
//! `RemoteConnection` is the one object an application holds. It opens the
//! signaling link, spawns the session task and exposes the observable roster
//! and the local identity. Everything else goes through the task.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use watercooler_core::{
    ConnectionConfig, MediaKind, MediaSource, MovementSampler, ParticipantId,
    PeerConnectionFactory, Position, Roster, RosterStore, SignalingTransport, StateSnapshot,
    VolumeControlFactory, WatercoolerError, WatercoolerResult,
};

use crate::logic::{Command, ConnectionViews, HandlerRegistry, SessionTask, TaskContext};
use crate::managers::{BroadcastScheduler, SessionManager};

struct RunningSession {
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

/// Public connection to a multi-user room
pub struct RemoteConnection {
    transport: Arc<dyn SignalingTransport>,
    factory: Arc<dyn PeerConnectionFactory>,
    config: ConnectionConfig,
    sampler: Option<Arc<dyn MovementSampler>>,
    media_source: Option<Arc<dyn MediaSource>>,
    volume_controls: Option<Arc<dyn VolumeControlFactory>>,
    roster: Arc<RosterStore>,
    views: Arc<ConnectionViews>,
    running: Option<RunningSession>,
}

impl RemoteConnection {
    pub fn new(transport: Arc<dyn SignalingTransport>, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        Self {
            transport,
            factory,
            config: ConnectionConfig::default(),
            sampler: None,
            media_source: None,
            volume_controls: None,
            roster: Arc::new(RosterStore::new()),
            views: Arc::new(ConnectionViews::new()),
            running: None,
        }
    }

    pub(crate) fn set_config(&mut self, config: ConnectionConfig) {
        self.config = config;
    }

    pub(crate) fn set_sampler(&mut self, sampler: Option<Arc<dyn MovementSampler>>) {
        self.sampler = sampler;
    }

    pub(crate) fn set_initial_media(&mut self, media: Option<Arc<dyn MediaSource>>) {
        self.media_source = media;
    }

    pub(crate) fn set_volume_controls(&mut self, factory: Option<Arc<dyn VolumeControlFactory>>) {
        self.volume_controls = factory;
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Register signal handlers, connect and spawn the session task
    pub async fn start(&mut self) -> WatercoolerResult<()> {
        if self.running.is_some() {
            return Err(WatercoolerError::AlreadyRunning);
        }
        self.config.validate().map_err(WatercoolerError::config_error)?;

        let (command_tx, command_rx) = mpsc::channel(self.config.channels.command_buffer_size);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        // Handlers go in before connect so the hello is never missed.
        let mut handlers = HandlerRegistry::new();
        let registered = handlers.register_all(self.transport.as_ref(), &signal_tx);
        debug!(registered, "Signal handlers registered");

        if let Err(e) = self.transport.connect(&self.config.signaling_url).await {
            handlers.deregister_all(self.transport.as_ref());
            return Err(e.into());
        }

        let task = SessionTask::new(TaskContext {
            transport: self.transport.clone(),
            sessions: SessionManager::new(self.factory.clone(), peer_tx, self.media_source.clone()),
            scheduler: BroadcastScheduler::new(self.config.broadcast.clone()),
            handlers,
            roster: self.roster.clone(),
            views: self.views.clone(),
            sampler: self.sampler.clone(),
            volume_controls: self.volume_controls.clone(),
            commands: command_rx,
            signals: signal_rx,
            peer_events: peer_rx,
        });
        let handle = tokio::spawn(task.run());

        self.running = Some(RunningSession {
            commands: command_tx,
            handle,
        });
        info!(url = %self.config.signaling_url, "Connection started");
        Ok(())
    }

    /// Close every session and the signaling link; safe to call twice
    pub async fn stop(&mut self) -> WatercoolerResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        if running.commands.send(Command::Shutdown).await.is_err() {
            debug!("Session task already exited");
        }
        running
            .handle
            .await
            .map_err(|e| WatercoolerError::channel_error(format!("session task failed: {}", e)))?;

        info!("Connection stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Identity assigned by the signaling server, once the hello arrived
    pub fn self_id(&self) -> Option<ParticipantId> {
        self.views.self_id()
    }

    pub fn subscribe_self_id(&self) -> watch::Receiver<Option<ParticipantId>> {
        self.views.subscribe_self_id()
    }

    pub fn roster(&self) -> Roster {
        self.roster.snapshot()
    }

    pub fn subscribe_roster(&self) -> watch::Receiver<Roster> {
        self.roster.subscribe()
    }

    /// Last position reported by `participant`
    pub fn participant_position(&self, participant: &ParticipantId) -> Option<Position> {
        self.roster.snapshot().get(participant).and_then(|p| p.position())
    }

    /// True once the server refused us because the room is full
    pub fn max_participants_reached(&self) -> bool {
        self.views.max_participants_reached()
    }

    /// Reason local capture is unavailable, if it is
    pub fn media_error(&self) -> Option<String> {
        self.views.media_error()
    }

    // ------------------------------------------------------------------------
    // Local State
    // ------------------------------------------------------------------------

    /// Offer a state snapshot to the broadcast change filter
    pub async fn push_state(&self, snapshot: StateSnapshot) -> WatercoolerResult<()> {
        self.send_command(Command::PushState(snapshot)).await
    }

    /// Set playback volume (0.0 to 1.0) for every stream of `participant`
    pub async fn set_volume(&self, participant: &ParticipantId, volume: f64) -> WatercoolerResult<()> {
        self.send_command(Command::SetVolume {
            participant: participant.clone(),
            volume,
        })
        .await
    }

    /// Use `source` for local tracks; attached to every open session
    pub async fn set_media_source(&mut self, source: Arc<dyn MediaSource>) -> WatercoolerResult<()> {
        self.media_source = Some(source.clone());
        self.views.set_media_error(None);
        if self.running.is_some() {
            self.send_command(Command::SetMediaSource(source)).await?;
        }
        Ok(())
    }

    /// Record that local capture failed and keep going without media
    pub async fn media_unavailable<T: Into<String>>(&mut self, reason: T) -> WatercoolerResult<()> {
        let reason = reason.into();
        self.media_source = None;
        self.views.set_media_error(Some(reason.clone()));
        if self.running.is_some() {
            self.send_command(Command::MediaUnavailable(reason)).await?;
        }
        Ok(())
    }

    /// Enable or disable local tracks of `kind`; returns false without media
    pub fn set_media_enabled(&self, kind: MediaKind, enabled: bool) -> bool {
        match self.media_source.as_ref() {
            Some(source) => {
                source.set_enabled(kind, enabled);
                true
            }
            None => false,
        }
    }

    pub fn media_source(&self) -> Option<&Arc<dyn MediaSource>> {
        self.media_source.as_ref()
    }

    async fn send_command(&self, command: Command) -> WatercoolerResult<()> {
        let Some(running) = self.running.as_ref() else {
            return Err(WatercoolerError::channel_error("connection is not running"));
        };
        running
            .commands
            .send(command)
            .await
            .map_err(|_| WatercoolerError::channel_error("session task is gone"))
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            if running.commands.try_send(Command::Shutdown).is_err() {
                debug!("Could not request shutdown on drop; aborting session task");
                running.handle.abort();
            }
        }
    }
}
