//! Speech synthesis clients.
//!
//! The synthesis service is remote: text plus voice parameters in, encoded
//! audio bytes out. Requests are not cancellable once sent.

mod voicevox;

use std::future::Future;
use std::pin::Pin;

pub use voicevox::VoicevoxClient;

use crate::error::SynthesisError;
use crate::speech::{StyleId, VoiceParams};

/// Boxed future returned by [`Synthesizer`] methods.
pub type SynthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SynthesisError>> + Send + 'a>>;

/// Common trait for synthesis backends (dyn-compatible).
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with the given style. `overrides` only replace
    /// parameters the service already knows about.
    fn synthesize(&self, text: &str, style_id: StyleId, overrides: &VoiceParams)
        -> SynthFuture<'_, Vec<u8>>;

    /// Raw speaker/style listing from the service.
    fn speakers(&self) -> SynthFuture<'_, serde_json::Value>;

    /// Display name (e.g. "VOICEVOX (http://127.0.0.1:50021)").
    fn name(&self) -> String;
}
