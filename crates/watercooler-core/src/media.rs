//! Media descriptors and the media collaborator traits
//!
//! Tracks and streams are described, not carried: encoding and playback live
//! in the media stack behind `MediaSource`, `PeerConnection` and
//! `VolumeControl`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A single local or remote media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
    pub enabled: bool,
}

impl MediaTrack {
    pub fn new<T: Into<String>>(id: T, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
        }
    }
}

/// A remote media stream as announced by a peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl RemoteStream {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

// ----------------------------------------------------------------------------
// Local Media Source
// ----------------------------------------------------------------------------

/// The local camera/microphone capture
pub trait MediaSource: Send + Sync {
    /// Identifier of the local stream the tracks belong to
    fn stream_id(&self) -> String;

    fn tracks(&self) -> Vec<MediaTrack>;

    /// Enable or disable every track of `kind`
    fn set_enabled(&self, kind: MediaKind, enabled: bool);

    /// Whether at least one enabled track of `kind` exists
    fn has_enabled(&self, kind: MediaKind) -> bool {
        self.tracks().iter().any(|t| t.kind == kind && t.enabled)
    }
}

/// In-process media source holding track descriptors
#[derive(Debug)]
pub struct LocalMediaSource {
    stream_id: String,
    tracks: RwLock<Vec<MediaTrack>>,
}

impl LocalMediaSource {
    pub fn new<T: Into<String>>(stream_id: T, tracks: Vec<MediaTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: RwLock::new(tracks),
        }
    }

    /// One audio and one video track, both enabled
    pub fn audio_video<T: Into<String>>(stream_id: T) -> Self {
        let stream_id = stream_id.into();
        let tracks = vec![
            MediaTrack::new(format!("{}-audio", stream_id), MediaKind::Audio),
            MediaTrack::new(format!("{}-video", stream_id), MediaKind::Video),
        ];
        Self::new(stream_id, tracks)
    }
}

impl MediaSource for LocalMediaSource {
    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.read().clone()
    }

    fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        for track in self.tracks.write().iter_mut().filter(|t| t.kind == kind) {
            track.enabled = enabled;
        }
    }
}

// ----------------------------------------------------------------------------
// Remote Volume
// ----------------------------------------------------------------------------

/// Output gain for one remote stream
pub trait VolumeControl: Send + Sync {
    /// Set the output volume, in `0.0..=1.0`
    fn set_volume(&self, volume: f64);
}

/// Builds volume controls; creating one is assumed to be expensive
pub trait VolumeControlFactory: Send + Sync {
    fn create(&self, participant: &ParticipantId, stream: &RemoteStream) -> Arc<dyn VolumeControl>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_enabled_by_kind() {
        let source = LocalMediaSource::audio_video("local");
        assert!(source.has_enabled(MediaKind::Audio));
        assert!(source.has_enabled(MediaKind::Video));

        source.set_enabled(MediaKind::Video, false);
        assert!(source.has_enabled(MediaKind::Audio));
        assert!(!source.has_enabled(MediaKind::Video));
        assert_eq!(source.tracks().len(), 2);
    }

    #[test]
    fn test_has_enabled_without_tracks() {
        let source = LocalMediaSource::new("empty", Vec::new());
        assert!(!source.has_enabled(MediaKind::Audio));
    }
}
