//! State broadcast scheduler
//!
//! Decides whether a sampled `StateSnapshot` is worth transmitting. Values
//! are quantized before comparison and a snapshot is only remembered as sent
//! once the transport accepted it.

use tracing::debug;

use watercooler_core::{
    BroadcastConfig, MediaKind, MediaSource, MovementSampler, SendOutcome, StateSnapshot,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub offered: u64,
    pub sent: u64,
    pub unchanged: u64,
    pub undelivered: u64,
}

/// Change filter for local state broadcasts
#[derive(Debug)]
pub struct BroadcastScheduler {
    config: BroadcastConfig,
    last_sent: Option<StateSnapshot>,
    stats: BroadcastStats,
}

impl BroadcastScheduler {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            last_sent: None,
            stats: BroadcastStats::default(),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Read the movement sampler and the media flags into a snapshot
    pub fn sample(sampler: &dyn MovementSampler, media: Option<&dyn MediaSource>) -> StateSnapshot {
        let (audio, video) = media
            .map(|m| (m.has_enabled(MediaKind::Audio), m.has_enabled(MediaKind::Video)))
            .unwrap_or((false, false));
        StateSnapshot::new(sampler.position(), sampler.angle(), sampler.speed()).with_media(audio, video)
    }

    /// Transmit `snapshot` through `send` if it differs from the last one sent.
    ///
    /// Returns true if a message went out.
    pub fn offer<F>(&mut self, snapshot: StateSnapshot, send: F) -> bool
    where
        F: FnOnce(&StateSnapshot) -> SendOutcome,
    {
        self.stats.offered += 1;
        let quantized = snapshot.quantized(&self.config);
        if self.last_sent == Some(quantized) {
            self.stats.unchanged += 1;
            return false;
        }

        match send(&quantized) {
            SendOutcome::Sent => {
                self.last_sent = Some(quantized);
                self.stats.sent += 1;
                true
            }
            SendOutcome::NotConnected => {
                debug!("State broadcast not delivered; will retry on the next tick");
                self.stats.undelivered += 1;
                false
            }
        }
    }

    /// Forget the last sent value so the next offer always transmits
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    pub fn last_sent(&self) -> Option<StateSnapshot> {
        self.last_sent
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watercooler_core::{LocalMediaSource, Position, StaticSampler};

    fn snapshot(x: f64, y: f64, angle: f64, speed: f64) -> StateSnapshot {
        StateSnapshot::new(Position(x, y), angle, speed)
    }

    #[test]
    fn test_first_offer_always_sends() {
        let mut scheduler = BroadcastScheduler::new(BroadcastConfig::default());
        assert!(scheduler.offer(snapshot(0.0, 0.0, 0.0, 0.0), |_| SendOutcome::Sent));
    }

    #[test]
    fn test_repeated_values_send_once() {
        let mut scheduler = BroadcastScheduler::new(BroadcastConfig::default());
        let mut sent = Vec::new();
        let samples = [
            snapshot(10.0, 10.0, 0.0, 0.0),
            snapshot(10.0, 10.0, 0.0, 0.0),
            snapshot(10.2, 9.9, 0.01, 0.02),
            snapshot(11.0, 10.0, 0.0, 0.0),
            snapshot(11.0, 10.0, 0.0, 0.0),
            snapshot(10.0, 10.0, 0.0, 0.0),
        ];
        for sample in samples {
            scheduler.offer(sample, |s| {
                sent.push(*s);
                SendOutcome::Sent
            });
        }
        assert_eq!(
            sent,
            vec![
                snapshot(10.0, 10.0, 0.0, 0.0),
                snapshot(11.0, 10.0, 0.0, 0.0),
                snapshot(10.0, 10.0, 0.0, 0.0),
            ]
        );
        assert_eq!(scheduler.stats().unchanged, 3);
    }

    #[test]
    fn test_media_flag_change_is_sent() {
        let mut scheduler = BroadcastScheduler::new(BroadcastConfig::default());
        let base = snapshot(1.0, 1.0, 0.0, 0.0);
        assert!(scheduler.offer(base, |_| SendOutcome::Sent));
        assert!(scheduler.offer(base.with_media(true, false), |_| SendOutcome::Sent));
    }

    #[test]
    fn test_undelivered_is_retried() {
        let mut scheduler = BroadcastScheduler::new(BroadcastConfig::default());
        let value = snapshot(5.0, 5.0, 0.0, 0.0);
        assert!(!scheduler.offer(value, |_| SendOutcome::NotConnected));
        assert_eq!(scheduler.last_sent(), None);
        assert!(scheduler.offer(value, |_| SendOutcome::Sent));
    }

    #[test]
    fn test_reset_forces_send() {
        let mut scheduler = BroadcastScheduler::new(BroadcastConfig::default());
        let value = snapshot(5.0, 5.0, 0.0, 0.0);
        scheduler.offer(value, |_| SendOutcome::Sent);
        scheduler.reset();
        assert!(scheduler.offer(value, |_| SendOutcome::Sent));
    }

    #[test]
    fn test_sample_reads_media_flags() {
        let sampler = StaticSampler::new(Position(430.0, 150.0), 1.5);
        let media = LocalMediaSource::audio_video("local");
        media.set_enabled(MediaKind::Video, false);

        let sampled = BroadcastScheduler::sample(&sampler, Some(&media));
        assert_eq!(sampled.position, Position(430.0, 150.0));
        assert!(sampled.audio_enabled);
        assert!(!sampled.video_enabled);

        let without_media = BroadcastScheduler::sample(&sampler, None);
        assert!(!without_media.audio_enabled);
    }
}
