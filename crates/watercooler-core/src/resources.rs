//! Per-stream derived resources
//!
//! Objects derived from a remote stream (volume controls, decoders) are
//! expensive to build, so they are cached by stream id. Each entry records the
//! participant that owns the stream and is evicted when that participant is
//! removed.

use std::collections::HashMap;

use crate::types::ParticipantId;

#[derive(Debug)]
pub struct StreamResources<T> {
    entries: HashMap<String, (ParticipantId, T)>,
}

impl<T> Default for StreamResources<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone> StreamResources<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached resource for `stream_id`, building it on first use
    pub fn get_or_insert_with<F>(&mut self, owner: &ParticipantId, stream_id: &str, build: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.entries
            .entry(stream_id.to_string())
            .or_insert_with(|| (owner.clone(), build()))
            .1
            .clone()
    }

    pub fn get(&self, stream_id: &str) -> Option<&T> {
        self.entries.get(stream_id).map(|(_, resource)| resource)
    }

    /// Drop every resource owned by `owner`; returns how many were dropped
    pub fn evict_owner(&mut self, owner: &ParticipantId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (entry_owner, _)| entry_owner != owner);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_once_per_stream() {
        let mut cache = StreamResources::new();
        let owner = ParticipantId::from("b");
        let mut builds = 0;
        for _ in 0..3 {
            cache.get_or_insert_with(&owner, "s1", || {
                builds += 1;
                builds
            });
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.get("s1"), Some(&1));
    }

    #[test]
    fn test_evicts_only_owner() {
        let mut cache = StreamResources::new();
        cache.get_or_insert_with(&"b".into(), "s1", || 1);
        cache.get_or_insert_with(&"b".into(), "s2", || 2);
        cache.get_or_insert_with(&"c".into(), "s3", || 3);

        assert_eq!(cache.evict_owner(&"b".into()), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("s3").is_some());
    }
}
