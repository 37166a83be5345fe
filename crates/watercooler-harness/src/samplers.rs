//! Movement and volume fakes

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use watercooler_core::{MovementSampler, ParticipantId, Position, RemoteStream, VolumeControl, VolumeControlFactory};

/// Movement sampler a test can steer
#[derive(Debug)]
pub struct ScriptedSampler {
    current: Mutex<(Position, f64, f64)>,
}

impl ScriptedSampler {
    pub fn new(position: Position, angle: f64, speed: f64) -> Self {
        Self {
            current: Mutex::new((position, angle, speed)),
        }
    }

    pub fn set(&self, position: Position, angle: f64, speed: f64) {
        *self.current.lock() = (position, angle, speed);
    }
}

impl MovementSampler for ScriptedSampler {
    fn position(&self) -> Position {
        self.current.lock().0
    }

    fn angle(&self) -> f64 {
        self.current.lock().1
    }

    fn speed(&self) -> f64 {
        self.current.lock().2
    }
}

/// Volume control remembering every value it was set to
#[derive(Debug)]
pub struct RecordingVolume {
    pub participant: ParticipantId,
    pub stream_id: String,
    volumes: Mutex<Vec<f64>>,
}

impl RecordingVolume {
    pub fn volumes(&self) -> Vec<f64> {
        self.volumes.lock().clone()
    }
}

impl VolumeControl for RecordingVolume {
    fn set_volume(&self, volume: f64) {
        self.volumes.lock().push(volume);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingVolumeFactory {
    created: Arc<Mutex<Vec<Arc<RecordingVolume>>>>,
}

impl RecordingVolumeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Controls created for `stream_id`, oldest first
    pub fn controls_for(&self, stream_id: &str) -> Vec<Arc<RecordingVolume>> {
        self.created
            .lock()
            .iter()
            .filter(|c| c.stream_id == stream_id)
            .cloned()
            .collect()
    }

    /// Every volume applied to `stream_id`, across controls
    pub fn volumes(&self, stream_id: &str) -> Vec<f64> {
        self.controls_for(stream_id)
            .iter()
            .flat_map(|c| c.volumes())
            .collect()
    }
}

impl VolumeControlFactory for RecordingVolumeFactory {
    fn create(&self, participant: &ParticipantId, stream: &RemoteStream) -> Arc<dyn VolumeControl> {
        let control = Arc::new(RecordingVolume {
            participant: participant.clone(),
            stream_id: stream.id.clone(),
            volumes: Mutex::new(Vec::new()),
        });
        self.created.lock().push(control.clone());
        control
    }
}

/// Poll `condition` every few milliseconds; false if it never held
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
