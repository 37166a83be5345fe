//! `webrtc`-backed peer connections

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use watercooler_core::{
    IceCandidate, IceServerConfig, MediaTrack, NegotiationError, NegotiationStep, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSink, RemoteStream, SessionDescription,
};

use crate::convert;

// ----------------------------------------------------------------------------
// Factory
// ----------------------------------------------------------------------------

/// Builds peer connections sharing one `webrtc` API instance
pub struct WebRtcPeerConnectionFactory {
    api: API,
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcPeerConnectionFactory {
    /// Register default codecs and interceptors
    pub fn new(ice_servers: &[IceServerConfig]) -> Result<Self, NegotiationError> {
        let setup = |e: webrtc::Error| NegotiationError::new(NegotiationStep::CreateConnection, e.to_string());

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(setup)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine).map_err(setup)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: ice_servers.to_vec(),
        })
    }

    pub fn ice_servers(&self) -> &[IceServerConfig] {
        &self.ice_servers
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerConnectionFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let config = RTCConfiguration {
            ice_servers: convert::ice_servers(&self.ice_servers),
            ..Default::default()
        };
        let inner = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| NegotiationError::new(NegotiationStep::CreateConnection, e.to_string()))?;

        let connection = WebRtcPeerConnection::new(Arc::new(inner), events);
        connection.wire_callbacks();
        debug!(participant = %connection.events.participant(), "Created WebRTC peer connection");
        Ok(Arc::new(connection))
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// One `RTCPeerConnection` reporting to a session's event sink
pub struct WebRtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
    events: PeerEventSink,
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
}

impl WebRtcPeerConnection {
    fn new(inner: Arc<RTCPeerConnection>, events: PeerEventSink) -> Self {
        Self {
            inner,
            events,
            local_tracks: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Local sample track for `track_id`, for the media stack to write into
    pub fn local_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().get(track_id).cloned()
    }

    fn wire_callbacks(&self) {
        let sink = self.events.clone();
        self.inner
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    // `None` marks the end of gathering.
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            sink.emit(PeerEvent::IceCandidate(convert::from_candidate_init(init)));
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let sink = self.events.clone();
        self.inner.on_negotiation_needed(Box::new(move || {
            let sink = sink.clone();
            Box::pin(async move {
                sink.emit(PeerEvent::NegotiationNeeded);
            })
        }));

        // Remote tracks arrive one at a time; report the whole stream so far.
        let sink = self.events.clone();
        let remote: Arc<Mutex<HashMap<String, RemoteStream>>> = Arc::default();
        self.inner.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    let Some(kind) = convert::media_kind(track.kind()) else {
                        trace!("Ignoring remote track of unknown kind");
                        return;
                    };
                    let stream = {
                        let mut remote = remote.lock();
                        let stream_id = track.stream_id();
                        let stream = remote
                            .entry(stream_id.clone())
                            .or_insert_with(|| RemoteStream::new(stream_id));
                        let track_id = track.id();
                        if !stream.tracks.iter().any(|t| t.id == track_id) {
                            stream.tracks.push(MediaTrack::new(track_id, kind));
                        }
                        stream.clone()
                    };
                    sink.emit(PeerEvent::Track(stream));
                })
            },
        ));

        let sink = self.events.clone();
        self.inner
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!(participant = %sink.participant(), %state, "Peer connection state changed");
                    if let Some(link) = convert::link_state(state) {
                        sink.emit(PeerEvent::LinkStateChanged(link));
                    }
                })
            }));
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let step = NegotiationStep::CreateOffer;
        let offer = self
            .inner
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::new(step, e.to_string()))?;
        convert::from_rtc_description(offer, step)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let step = NegotiationStep::CreateAnswer;
        let answer = self
            .inner
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::new(step, e.to_string()))?;
        convert::from_rtc_description(answer, step)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let step = NegotiationStep::SetLocalDescription;
        let description = convert::to_rtc_description(description, step)?;
        self.inner
            .set_local_description(description)
            .await
            .map_err(|e| NegotiationError::new(step, e.to_string()))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let step = NegotiationStep::SetRemoteDescription;
        let description = convert::to_rtc_description(description, step)?;
        self.inner
            .set_remote_description(description)
            .await
            .map_err(|e| NegotiationError::new(step, e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let step = NegotiationStep::AddIceCandidate;
        if self.inner.remote_description().await.is_none() {
            return Err(NegotiationError::new(step, "no remote description"));
        }
        self.inner
            .add_ice_candidate(convert::to_candidate_init(candidate))
            .await
            .map_err(|e| NegotiationError::new(step, e.to_string()))
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), NegotiationError> {
        let step = NegotiationStep::AddTrack;
        let local = {
            let mut tracks = self.local_tracks.lock();
            if tracks.contains_key(&track.id) {
                return Err(NegotiationError::new(step, format!("track {} already added", track.id)));
            }
            let local = Arc::new(TrackLocalStaticSample::new(
                convert::codec_for(track.kind),
                track.id.clone(),
                stream_id.to_string(),
            ));
            tracks.insert(track.id.clone(), local.clone());
            local
        };

        match self
            .inner
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => {
                self.senders.lock().insert(track.id.clone(), sender);
            }
            Err(e) => {
                self.local_tracks.lock().remove(&track.id);
                return Err(NegotiationError::new(step, e.to_string()));
            }
        }
        debug!(track = %track.id, kind = track.kind.as_str(), "Added local track");
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), NegotiationError> {
        let step = NegotiationStep::RemoveTrack;
        let Some(sender) = self.senders.lock().remove(track_id) else {
            return Err(NegotiationError::new(step, format!("track {} is not attached", track_id)));
        };
        self.local_tracks.lock().remove(track_id);
        self.inner
            .remove_track(&sender)
            .await
            .map_err(|e| NegotiationError::new(step, e.to_string()))?;
        debug!(track = %track_id, "Removed local track");
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.inner.close().await {
            debug!("Error closing peer connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use watercooler_core::{MediaKind, SdpType};

    fn factory() -> WebRtcPeerConnectionFactory {
        // No ICE servers: host candidates only, nothing leaves the machine.
        WebRtcPeerConnectionFactory::new(&[]).unwrap()
    }

    #[tokio::test]
    async fn test_offer_carries_local_tracks() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = factory()
            .create(PeerEventSink::new("b".into(), 1, tx))
            .await
            .unwrap();

        connection
            .add_track(&MediaTrack::new("local-audio", MediaKind::Audio), "local")
            .await
            .unwrap();
        let offer = connection.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));

        connection.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_track_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = factory()
            .create(PeerEventSink::new("b".into(), 1, tx))
            .await
            .unwrap();

        let track = MediaTrack::new("local-video", MediaKind::Video);
        connection.add_track(&track, "local").await.unwrap();
        let err = connection.add_track(&track, "local").await.unwrap_err();
        assert_eq!(err.step, NegotiationStep::AddTrack);

        connection.close().await;
    }

    #[tokio::test]
    async fn test_removed_track_is_forgotten() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = WebRtcPeerConnection::new(
            Arc::new(factory().api.new_peer_connection(RTCConfiguration::default()).await.unwrap()),
            PeerEventSink::new("b".into(), 1, tx),
        );

        let track = MediaTrack::new("local-audio", MediaKind::Audio);
        connection.add_track(&track, "local").await.unwrap();
        assert!(connection.local_track("local-audio").is_some());

        connection.remove_track("local-audio").await.unwrap();
        assert!(connection.local_track("local-audio").is_none());
        let err = connection.remove_track("local-audio").await.unwrap_err();
        assert_eq!(err.step, NegotiationStep::RemoveTrack);

        connection.add_track(&track, "local").await.unwrap();
        connection.close().await;
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = factory()
            .create(PeerEventSink::new("b".into(), 1, tx))
            .await
            .unwrap();

        let err = connection
            .add_ice_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"))
            .await
            .unwrap_err();
        assert_eq!(err.step, NegotiationStep::AddIceCandidate);

        connection.close().await;
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_connections() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let factory = factory();
        let a = factory.create(PeerEventSink::new("b".into(), 1, tx_a)).await.unwrap();
        let b = factory.create(PeerEventSink::new("a".into(), 1, tx_b)).await.unwrap();

        a.add_track(&MediaTrack::new("a-audio", MediaKind::Audio), "a")
            .await
            .unwrap();
        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();

        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpType::Answer);
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        a.close().await;
        b.close().await;
    }
}
