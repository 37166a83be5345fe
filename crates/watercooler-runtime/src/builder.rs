//! Connection Builder API
//!
//! Builder-style construction of a `RemoteConnection` for the CLI and tests.

use std::sync::Arc;

use watercooler_core::{
    ConnectionConfig, MediaSource, MovementSampler, PeerConnectionFactory, SignalingTransport,
    VolumeControlFactory, WatercoolerResult,
};

use crate::connection::RemoteConnection;

// ----------------------------------------------------------------------------
// Connection Builder
// ----------------------------------------------------------------------------

pub struct RemoteConnectionBuilder {
    transport: Arc<dyn SignalingTransport>,
    factory: Arc<dyn PeerConnectionFactory>,
    config: ConnectionConfig,
    sampler: Option<Arc<dyn MovementSampler>>,
    media_source: Option<Arc<dyn MediaSource>>,
    volume_controls: Option<Arc<dyn VolumeControlFactory>>,
}

impl RemoteConnectionBuilder {
    pub fn new(transport: Arc<dyn SignalingTransport>, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        Self {
            transport,
            factory,
            config: ConnectionConfig::default(),
            sampler: None,
            media_source: None,
            volume_controls: None,
        }
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_signaling_url<T: Into<String>>(mut self, url: T) -> Self {
        self.config = self.config.with_signaling_url(url);
        self
    }

    /// Sampled on every broadcast tick
    pub fn with_sampler(mut self, sampler: Arc<dyn MovementSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    pub fn with_volume_controls(mut self, factory: Arc<dyn VolumeControlFactory>) -> Self {
        self.volume_controls = Some(factory);
        self
    }

    pub fn build(self) -> RemoteConnection {
        let mut connection = RemoteConnection::new(self.transport, self.factory);
        connection.set_config(self.config);
        connection.set_sampler(self.sampler);
        connection.set_initial_media(self.media_source);
        connection.set_volume_controls(self.volume_controls);
        connection
    }

    pub async fn build_and_start(self) -> WatercoolerResult<RemoteConnection> {
        let mut connection = self.build();
        connection.start().await?;
        Ok(connection)
    }
}

impl RemoteConnection {
    pub fn builder(
        transport: Arc<dyn SignalingTransport>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> RemoteConnectionBuilder {
        RemoteConnectionBuilder::new(transport, factory)
    }
}
