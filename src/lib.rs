//! Interruptible speech queue for game dialogue.
//!
//! Text lines are queued by any number of producers, synthesized one at a
//! time through a VOICEVOX-compatible engine, and played on a persistent
//! output stream that can be silenced mid-utterance.

pub mod config;
pub mod error;
pub mod logging;
pub mod playback;
pub mod speech;
pub mod synth;

pub use config::SpeechConfig;
pub use error::{PlaybackError, SynthesisError};
pub use playback::{PlaybackEngine, PlaybackToken};
pub use speech::{SpeakItem, SpeakRequest, SpeechService};
