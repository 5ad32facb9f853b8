//! Suppression of an utterance identical to the last one fully played.

use super::item::{DedupKey, SpeakItem};

/// Owned by the worker; remembers the last key whose playback completed
/// without interruption.
#[derive(Debug)]
pub struct Deduplicator {
    enabled: bool,
    last_spoken: Option<DedupKey>,
}

impl Deduplicator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_spoken: None,
        }
    }

    /// Whether `item` repeats the last completed utterance and should be
    /// dropped without synthesis.
    pub fn is_repeat(&self, item: &SpeakItem, key: &DedupKey) -> bool {
        self.enabled && !item.no_dedup && self.last_spoken.as_ref() == Some(key)
    }

    /// Record a completed, uninterrupted playback.
    pub fn record(&mut self, key: DedupKey) {
        self.last_spoken = Some(key);
    }

    pub fn last_spoken(&self) -> Option<&DedupKey> {
        self.last_spoken.as_ref()
    }
}
