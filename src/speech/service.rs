//! Producer-facing API over the queue, worker, and playback engine.
//!
//! Any number of threads may call `enqueue`, `enqueue_interrupt`,
//! `stop_current`, and `clear_queue` concurrently; none of them block on
//! synthesis or playback.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::item::{SpeakItem, StyleId, VoiceParams};
use super::queue::SpeechQueue;
use super::voices::{VoiceResolver, VoiceTable, DEFAULT_VOICE};
use super::worker::{self, SpeechContext};
use crate::config::SpeechConfig;
use crate::error::SynthesisError;
use crate::playback::{AudioOutput, CpalOutput, NullOutput, PlaybackEngine};
use crate::synth::{Synthesizer, VoicevoxClient};

/// A speak request before voice resolution. Unset fields fall back to the
/// character's profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub style_id: Option<StyleId>,
    #[serde(default)]
    pub voice_params: Option<VoiceParams>,
    #[serde(default)]
    pub no_dedup: bool,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn style_id(mut self, style_id: StyleId) -> Self {
        self.style_id = Some(style_id);
        self
    }

    pub fn voice_params(mut self, params: VoiceParams) -> Self {
        self.voice_params = Some(params);
        self
    }

    pub fn no_dedup(mut self, no_dedup: bool) -> Self {
        self.no_dedup = no_dedup;
        self
    }
}

pub struct SpeechService {
    ctx: Arc<SpeechContext>,
    voices: Arc<dyn VoiceResolver>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechService {
    /// Build the service without starting the worker.
    pub fn new(
        config: &SpeechConfig,
        synthesizer: Arc<dyn Synthesizer>,
        output: Box<dyn AudioOutput>,
        voices: Arc<dyn VoiceResolver>,
    ) -> Self {
        let ctx = SpeechContext {
            queue: SpeechQueue::new(config.max_queue_size),
            engine: PlaybackEngine::new(output, config.block_size),
            synthesizer,
            dedup_enabled: config.dedup_enabled,
            wait_poll: config.wait_poll(),
        };
        Self {
            ctx: Arc::new(ctx),
            voices,
            worker: Mutex::new(None),
        }
    }

    /// Build the VOICEVOX client, output backend, and voice table described
    /// by `config`.
    pub fn from_config(config: &SpeechConfig) -> Result<Self, SynthesisError> {
        let synthesizer = VoicevoxClient::new(&config.synthesis_url, config.request_timeout())?;
        let output: Box<dyn AudioOutput> = if config.is_headless() {
            Box::new(NullOutput::new())
        } else {
            Box::new(CpalOutput::new(config.output_device.clone()))
        };
        let voices = VoiceTable::new(config.voices.clone());
        Ok(Self::new(
            config,
            Arc::new(synthesizer),
            output,
            Arc::new(voices),
        ))
    }

    /// Spawn the worker thread. Calling it again is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }
        *worker = Some(worker::spawn(Arc::clone(&self.ctx))?);
        info!(
            max_queue_size = self.ctx.queue.capacity(),
            dedup = self.ctx.dedup_enabled,
            "Speech worker started"
        );
        Ok(())
    }

    /// Resolve the request's voice into a queue item.
    pub fn resolve(&self, request: SpeakRequest) -> SpeakItem {
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_VOICE)
            .to_string();
        let voice = self
            .voices
            .resolve(&name)
            .with_overrides(request.style_id, request.voice_params.as_ref());

        SpeakItem::new(name, request.text, voice.style_id)
            .with_params(voice.voice_params)
            .with_no_dedup(request.no_dedup)
    }

    /// Queue a request. False if the text is blank or the queue is full.
    pub fn enqueue(&self, request: SpeakRequest) -> bool {
        let item = self.resolve(request);
        self.enqueue_item(item)
    }

    /// Queue an already-resolved item.
    pub fn enqueue_item(&self, item: SpeakItem) -> bool {
        let name = item.name.clone();
        let ok = self.ctx.queue.push(item);
        if ok {
            debug!(%name, queued = self.ctx.queue.len(), "Speech item queued");
        } else {
            warn!(%name, "Speech item rejected (empty text or queue full)");
        }
        ok
    }

    /// Stop what is audible, drop the backlog, and queue `request` so it is
    /// the next thing spoken.
    pub fn enqueue_interrupt(&self, request: SpeakRequest) -> bool {
        let item = self.resolve(request);
        let name = item.name.clone();
        let engine = &self.ctx.engine;
        let (ok, dropped) = self.ctx.queue.replace_all(item, || {
            engine.stop();
        });
        info!(%name, dropped, accepted = ok, "Interrupt requested");
        ok
    }

    /// Silence current playback. Queued items are kept.
    pub fn stop_current(&self) {
        self.ctx.engine.stop();
    }

    /// Drop pending items without touching current playback.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.ctx.queue.clear();
        if dropped > 0 {
            info!(dropped, "Speech queue cleared");
        }
        dropped
    }

    pub fn queue_len(&self) -> usize {
        self.ctx.queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.ctx.engine.is_playing()
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.ctx.engine
    }

    /// Speaker listing from the synthesis service.
    pub async fn speakers(&self) -> Result<serde_json::Value, SynthesisError> {
        self.ctx.synthesizer.speakers().await
    }

    /// Close the queue, stop playback, join the worker, and release the
    /// output stream.
    ///
    /// Synthesis requests cannot be cancelled, so if the worker is waiting
    /// on one this blocks until it returns, up to `request_timeout_secs`.
    pub fn shutdown(&self) {
        self.ctx.queue.close();
        self.ctx.engine.stop();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Speech worker panicked");
            }
            info!("Speech worker stopped");
        }
        self.ctx.engine.close();
    }
}

impl Drop for SpeechService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthFuture;

    struct NeverSynth;

    impl Synthesizer for NeverSynth {
        fn synthesize(&self, _: &str, _: StyleId, _: &VoiceParams) -> SynthFuture<'_, Vec<u8>> {
            Box::pin(async { Err(SynthesisError::InvalidResponse("offline".into())) })
        }

        fn speakers(&self) -> SynthFuture<'_, serde_json::Value> {
            Box::pin(async { Ok(serde_json::json!([{"name": "test"}])) })
        }

        fn name(&self) -> String {
            "never".into()
        }
    }

    fn service(max_queue_size: usize) -> SpeechService {
        let config = SpeechConfig {
            max_queue_size,
            ..SpeechConfig::default()
        };
        SpeechService::new(
            &config,
            Arc::new(NeverSynth),
            Box::new(NullOutput::new()),
            Arc::new(VoiceTable::default()),
        )
    }

    #[test]
    fn test_resolve_defaults_and_overrides() {
        let svc = service(10);
        let item = svc.resolve(SpeakRequest::new("こんにちは。"));
        assert_eq!(item.name, "default");
        assert_eq!(item.style_id, 2);
        assert_eq!(item.voice_params["volumeScale"], 1.0);

        let item = svc.resolve(
            SpeakRequest::new("hi")
                .name("  ")
                .style_id(5)
                .voice_params(VoiceParams::from([("speedScale".to_string(), 1.5)]))
                .no_dedup(true),
        );
        assert_eq!(item.name, "default");
        assert_eq!(item.style_id, 5);
        assert_eq!(item.voice_params["speedScale"], 1.5);
        assert!(item.no_dedup);
    }

    #[test]
    fn test_enqueue_rejects_blank() {
        let svc = service(10);
        assert!(!svc.enqueue(SpeakRequest::new("   ")));
        assert_eq!(svc.queue_len(), 0);
    }

    #[test]
    fn test_enqueue_beyond_capacity_without_worker() {
        let svc = service(100);
        for i in 0..100 {
            assert!(svc.enqueue(SpeakRequest::new(format!("line {i}"))));
        }
        assert!(!svc.enqueue(SpeakRequest::new("one too many")));
        assert_eq!(svc.queue_len(), 100);
    }

    #[test]
    fn test_zero_max_queue_size_accepts_everything() {
        let svc = service(0);
        for i in 0..200 {
            assert!(svc.enqueue(SpeakRequest::new(format!("line {i}"))));
        }
        assert_eq!(svc.queue_len(), 200);
    }

    #[test]
    fn test_interrupt_leaves_only_new_item() {
        let svc = service(10);
        svc.enqueue(SpeakRequest::new("a"));
        svc.enqueue(SpeakRequest::new("b"));
        assert!(svc.enqueue_interrupt(SpeakRequest::new("c")));
        assert_eq!(svc.queue_len(), 1);
    }

    #[test]
    fn test_clear_and_stop_are_idempotent() {
        let svc = service(10);
        svc.enqueue(SpeakRequest::new("a"));
        assert_eq!(svc.clear_queue(), 1);
        assert_eq!(svc.clear_queue(), 0);
        svc.stop_current();
        svc.stop_current();
        assert!(!svc.is_playing());
    }

    #[test]
    fn test_start_twice_and_shutdown() {
        let svc = service(10);
        svc.start().unwrap();
        svc.start().unwrap();
        svc.shutdown();
        assert!(!svc.enqueue(SpeakRequest::new("after shutdown")));
    }

    #[tokio::test]
    async fn test_speakers_passthrough() {
        let svc = service(10);
        let speakers = svc.speakers().await.unwrap();
        assert_eq!(speakers[0]["name"], "test");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: SpeakRequest = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(req.text, "hi");
        assert!(req.name.is_none() && req.style_id.is_none() && !req.no_dedup);
    }
}
