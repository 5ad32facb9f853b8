//! Speech queue, deduplication, worker loop, and the producer API.
//!
//! Producers push [`SpeakItem`]s through [`SpeechService`]; one worker
//! thread pops them in order, skips immediate repeats, synthesizes, and
//! waits for playback before taking the next item.

mod dedup;
mod item;
mod queue;
mod service;
pub mod voices;
mod worker;

pub use dedup::Deduplicator;
pub use item::{DedupKey, SpeakItem, StyleId, VoiceParams};
pub use queue::SpeechQueue;
pub use service::{SpeakRequest, SpeechService};
pub use voices::{ResolvedVoice, VoiceProfile, VoiceResolver, VoiceTable};
