//! The single sequential consumer: dequeue, dedup, synthesize, play, wait.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use super::dedup::Deduplicator;
use super::item::SpeakItem;
use super::queue::SpeechQueue;
use crate::playback::PlaybackEngine;
use crate::synth::Synthesizer;

/// Everything the worker and the producer API share.
pub(crate) struct SpeechContext {
    pub(crate) queue: SpeechQueue,
    pub(crate) engine: PlaybackEngine,
    pub(crate) synthesizer: Arc<dyn Synthesizer>,
    pub(crate) dedup_enabled: bool,
    /// Longest sleep between shutdown checks while waiting on playback.
    pub(crate) wait_poll: Duration,
}

/// How one dequeued item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Same as the last fully played utterance.
    Skipped,
    /// Played to the end; now the last spoken key.
    Completed,
    /// Cut off by `stop`, a newer `play`, or shutdown.
    Interrupted,
    /// Synthesis or playback setup failed; item dropped.
    Failed,
}

pub(crate) fn spawn(ctx: Arc<SpeechContext>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("speech-worker".into())
        .spawn(move || run(&ctx))
}

fn run(ctx: &SpeechContext) {
    // Synthesis clients are async; the worker drives them on its own
    // single-threaded runtime.
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build speech worker runtime: {}", e);
            return;
        }
    };

    let mut dedup = Deduplicator::new(ctx.dedup_enabled);
    info!(synthesizer = %ctx.synthesizer.name(), "Speech worker running");

    while let Some(item) = ctx.queue.pop() {
        let outcome = speak_item(ctx, &rt, &mut dedup, item);
        debug!(?outcome, "Speech item finished");
    }

    info!("Speech worker exiting");
}

pub(crate) fn speak_item(
    ctx: &SpeechContext,
    rt: &Runtime,
    dedup: &mut Deduplicator,
    item: SpeakItem,
) -> Outcome {
    info!(
        name = %item.name,
        style_id = item.style_id,
        text = %item.text,
        "Dequeued speech item"
    );

    let key = item.dedup_key();
    if dedup.is_repeat(&item, &key) {
        info!(name = %item.name, "Dedup skipped (same text and voice)");
        return Outcome::Skipped;
    }

    let audio = match rt.block_on(ctx.synthesizer.synthesize(
        &item.text,
        item.style_id,
        &item.voice_params,
    )) {
        Ok(audio) => audio,
        Err(e) => {
            error!(name = %item.name, error = %e, "Synthesis failed, dropping item");
            return Outcome::Failed;
        }
    };

    if ctx.queue.is_closed() {
        return Outcome::Interrupted;
    }

    // A result that arrives after an interrupt still plays: synthesis is
    // not cancellable, only playback is.
    let token = match ctx.engine.play(&audio) {
        Ok(token) => token,
        Err(e) => {
            error!(name = %item.name, error = %e, "Playback failed, dropping item");
            return Outcome::Failed;
        }
    };

    while !ctx.engine.wait(Some(ctx.wait_poll)) {
        if ctx.queue.is_closed() {
            warn!("Shutdown during playback, stopping audio");
            ctx.engine.stop();
            break;
        }
    }

    if ctx.engine.completed(token) {
        dedup.record(key);
        Outcome::Completed
    } else {
        info!(name = %item.name, %token, "Playback interrupted");
        Outcome::Interrupted
    }
}
