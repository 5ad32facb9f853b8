//! Playback engine: one output stream for the process lifetime, hard
//! interruption by token.
//!
//! The stream is opened lazily on the first `play` and only rebuilt when a
//! buffer arrives with a different sample rate or channel count. Buffers
//! the device cannot take as-is are converted to its format first. Between
//! utterances it keeps running and renders silence; interrupting means
//! swapping the active buffer out, never tearing the device down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::convert::convert_buffer;
use super::decode::decode_audio;
use super::output::{ActiveStream, AudioOutput};
use super::state::{PlaybackBuffer, PlaybackToken, Renderer, SharedPlayback, StreamFormat};
use crate::error::PlaybackError;

/// The open stream and the buffer format it was opened for.
struct OpenStream {
    requested: StreamFormat,
    stream: Box<dyn ActiveStream>,
}

pub struct PlaybackEngine {
    shared: Arc<SharedPlayback>,
    output: Box<dyn AudioOutput>,
    block_size: u32,
    stream: Mutex<Option<OpenStream>>,
    closed: AtomicBool,
}

impl PlaybackEngine {
    /// Create an engine on top of `output`. No stream is opened until the
    /// first `play`.
    pub fn new(output: Box<dyn AudioOutput>, block_size: u32) -> Self {
        Self {
            shared: Arc::new(SharedPlayback::new()),
            output,
            block_size: block_size.max(1),
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Decode `audio` and make it the only audible buffer.
    ///
    /// Returns as soon as the buffer is installed; playback continues on
    /// the audio callback thread. Whatever was playing before is cut off
    /// within one callback period.
    pub fn play(&self, audio: &[u8]) -> Result<PlaybackToken, PlaybackError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlaybackError::Closed);
        }
        let buffer = decode_audio(audio)?;
        self.play_buffer(buffer)
    }

    /// Install an already-decoded buffer.
    pub fn play_buffer(&self, buffer: PlaybackBuffer) -> Result<PlaybackToken, PlaybackError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlaybackError::Closed);
        }
        let requested = buffer.format();
        let mut slot = self.lock_stream();

        let target = match slot.as_ref() {
            Some(open) if open.requested == requested => open.stream.format(),
            _ => match self.output.supported_format(requested) {
                Ok(format) => format,
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            },
        };
        let buffer = convert_buffer(buffer, target);
        let frames = buffer.frames();
        let token = self.shared.install(Arc::new(buffer));
        debug!(
            %token,
            frames,
            sample_rate = target.sample_rate,
            channels = target.channels,
            "Playback started"
        );

        if let Err(e) = self.ensure_stream(&mut slot, requested, target) {
            self.shared.abandon(token);
            return Err(e);
        }
        Ok(token)
    }

    /// Silence output immediately. Idempotent.
    pub fn stop(&self) -> PlaybackToken {
        let token = self.shared.cancel();
        debug!(%token, "Playback stopped");
        token
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_active()
    }

    /// Block until playback finishes (naturally or by interruption) or the
    /// timeout elapses. Returns whether playback is finished.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.shared.wait_finished(timeout)
    }

    /// Play and block until finished.
    pub fn play_and_wait(&self, audio: &[u8]) -> Result<PlaybackToken, PlaybackError> {
        let token = self.play(audio)?;
        self.wait(None);
        Ok(token)
    }

    /// Whether `token`'s audio ran to the end without being interrupted.
    pub fn completed(&self, token: PlaybackToken) -> bool {
        self.shared.completed(token)
    }

    /// The highest token minted so far.
    pub fn current_token(&self) -> PlaybackToken {
        self.shared.current_token()
    }

    /// Format of the open stream, if any.
    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.lock_stream().as_ref().map(|open| open.stream.format())
    }

    /// Stop playback and tear down the output stream. Later `play` calls
    /// fail with [`PlaybackError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();
        if self.lock_stream().take().is_some() {
            info!("Audio output stream closed");
        }
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<OpenStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reuse the open stream when it already runs at `target`, otherwise
    /// rebuild it.
    fn ensure_stream(
        &self,
        slot: &mut Option<OpenStream>,
        requested: StreamFormat,
        target: StreamFormat,
    ) -> Result<(), PlaybackError> {
        if let Some(open) = slot.as_mut() {
            let current = open.stream.format();
            if current == target {
                open.requested = requested;
                return Ok(());
            }
            info!(
                from_rate = current.sample_rate,
                from_channels = current.channels,
                to_rate = target.sample_rate,
                to_channels = target.channels,
                "Reconfiguring audio output stream"
            );
        }
        // The old stream must be gone before its replacement starts.
        slot.take();

        let renderer = Renderer::new(Arc::clone(&self.shared), target);
        let stream = self.output.open(target, self.block_size, renderer)?;
        if requested != target {
            info!(
                source_rate = requested.sample_rate,
                source_channels = requested.channels,
                device_rate = target.sample_rate,
                device_channels = target.channels,
                "Converting playback audio to device format"
            );
        }
        *slot = Some(OpenStream { requested, stream });
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::playback::decode::tests::wav_bytes;

    /// Output whose callback is driven by hand.
    #[derive(Clone, Default)]
    struct ManualOutput {
        renderer: Arc<Mutex<Option<Renderer>>>,
        opens: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        /// Fixed device format; `None` accepts whatever is requested.
        device_format: Arc<Mutex<Option<StreamFormat>>>,
        no_device: Arc<AtomicBool>,
    }

    struct ManualStream {
        format: StreamFormat,
        renderer: Arc<Mutex<Option<Renderer>>>,
    }

    impl ActiveStream for ManualStream {
        fn format(&self) -> StreamFormat {
            self.format
        }
    }

    impl Drop for ManualStream {
        fn drop(&mut self) {
            self.renderer.lock().unwrap().take();
        }
    }

    impl AudioOutput for ManualOutput {
        fn open(
            &self,
            format: StreamFormat,
            _block_size: u32,
            renderer: Renderer,
        ) -> Result<Box<dyn ActiveStream>, PlaybackError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PlaybackError::OutputStream("device unplugged".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            *self.renderer.lock().unwrap() = Some(renderer);
            Ok(Box::new(ManualStream {
                format,
                renderer: Arc::clone(&self.renderer),
            }))
        }

        fn supported_format(&self, requested: StreamFormat) -> Result<StreamFormat, PlaybackError> {
            if self.no_device.load(Ordering::SeqCst) {
                return Err(PlaybackError::NoOutputDevice);
            }
            Ok(self.device_format.lock().unwrap().unwrap_or(requested))
        }
    }

    impl ManualOutput {
        /// Run one callback period of `frames` frames.
        fn pump(&self, frames: usize) -> Vec<f32> {
            let guard = self.renderer.lock().unwrap();
            let renderer = guard.as_ref().expect("stream open");
            let mut out = vec![f32::NAN; frames * usize::from(renderer.format().channels)];
            renderer.render(&mut out);
            out
        }
    }

    fn engine() -> (PlaybackEngine, ManualOutput) {
        let output = ManualOutput::default();
        (PlaybackEngine::new(Box::new(output.clone()), 4), output)
    }

    fn mono(value: f32, frames: usize) -> PlaybackBuffer {
        PlaybackBuffer::new(
            vec![value; frames],
            StreamFormat {
                sample_rate: 8000,
                channels: 1,
            },
        )
    }

    #[test]
    fn test_play_runs_to_completion() {
        let (engine, output) = engine();
        let token = engine.play_buffer(mono(0.5, 6)).unwrap();
        assert!(engine.is_playing());
        assert!(!engine.wait(Some(Duration::ZERO)));

        assert_eq!(output.pump(4), vec![0.5; 4]);
        assert!(engine.is_playing());

        // Final partial block is padded with silence and finishes.
        assert_eq!(output.pump(4), vec![0.5, 0.5, 0.0, 0.0]);
        assert!(!engine.is_playing());
        assert!(engine.wait(Some(Duration::ZERO)));
        assert!(engine.completed(token));

        // The stream keeps running and emits silence.
        assert_eq!(output.pump(4), vec![0.0; 4]);
    }

    #[test]
    fn test_stop_silences_next_period() {
        let (engine, output) = engine();
        let token = engine.play_buffer(mono(0.5, 100)).unwrap();
        output.pump(4);

        engine.stop();
        assert!(!engine.is_playing());
        assert!(engine.wait(Some(Duration::ZERO)));
        assert_eq!(output.pump(4), vec![0.0; 4]);
        assert!(!engine.completed(token));
    }

    #[test]
    fn test_new_play_replaces_current_audio() {
        let (engine, output) = engine();
        let first = engine.play_buffer(mono(0.25, 100)).unwrap();
        output.pump(4);
        let second = engine.play_buffer(mono(-0.5, 8)).unwrap();

        assert_eq!(output.pump(4), vec![-0.5; 4]);
        assert_eq!(output.pump(4), vec![-0.5; 4]);
        assert!(!engine.completed(first));
        assert!(engine.completed(second));
        // Same format: the stream was reused.
        assert_eq!(output.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (engine, _output) = engine();
        engine.stop();
        engine.stop();
        assert!(!engine.is_playing());
        assert!(engine.wait(Some(Duration::ZERO)));
        assert!(engine.stream_format().is_none());
    }

    #[test]
    fn test_tokens_are_monotonic_with_one_active() {
        let (engine, _output) = engine();
        let mut last = engine.current_token();
        for i in 0..10 {
            let token = if i % 3 == 0 {
                engine.stop()
            } else {
                engine.play_buffer(mono(0.1, 16)).unwrap()
            };
            assert!(token > last);
            assert_eq!(engine.current_token(), token);
            last = token;
        }
    }

    #[test]
    fn test_format_change_rebuilds_stream() {
        let (engine, output) = engine();
        engine.play_buffer(mono(0.1, 4)).unwrap();
        let stereo = PlaybackBuffer::new(
            vec![0.2; 8],
            StreamFormat {
                sample_rate: 8000,
                channels: 2,
            },
        );
        engine.play_buffer(stereo).unwrap();

        assert_eq!(output.opens.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stream_format().unwrap().channels, 2);
        assert_eq!(output.pump(2), vec![0.2; 4]);
    }

    #[test]
    fn test_open_failure_returns_to_idle() {
        let (engine, output) = engine();
        output.fail.store(true, Ordering::SeqCst);

        let err = engine.play_buffer(mono(0.1, 16)).unwrap_err();
        assert!(matches!(err, PlaybackError::OutputStream(_)));
        assert!(!engine.is_playing());
        assert!(engine.wait(Some(Duration::ZERO)));
    }

    #[test]
    fn test_play_decodes_wav_bytes() {
        let (engine, output) = engine();
        let token = engine.play(&wav_bytes(8000, 1, &[16_384; 3])).unwrap();
        let block = output.pump(4);
        assert!((block[0] - 0.5).abs() < 1e-3);
        assert_eq!(block[3], 0.0);
        assert!(engine.completed(token));
    }

    #[test]
    fn test_bad_audio_leaves_current_playback_alone() {
        let (engine, _output) = engine();
        engine.play_buffer(mono(0.1, 16)).unwrap();
        assert!(engine.play(b"junk").is_err());
        assert!(engine.is_playing());
    }

    #[test]
    fn test_wait_wakes_on_stop_from_other_thread() {
        let (engine, _output) = engine();
        let engine = Arc::new(engine);
        engine.play_buffer(mono(0.1, 1000)).unwrap();

        let stopper = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                engine.stop();
            })
        };
        assert!(engine.wait(Some(Duration::from_secs(5))));
        stopper.join().unwrap();
    }

    #[test]
    fn test_close_rejects_further_play() {
        let (engine, output) = engine();
        engine.play_buffer(mono(0.1, 16)).unwrap();
        engine.close();
        assert!(!engine.is_playing());
        assert!(output.renderer.lock().unwrap().is_none());
        assert!(matches!(
            engine.play_buffer(mono(0.1, 16)),
            Err(PlaybackError::Closed)
        ));
    }

    #[test]
    fn test_converts_to_device_format() {
        let (engine, output) = engine();
        let device = StreamFormat {
            sample_rate: 16_000,
            channels: 2,
        };
        *output.device_format.lock().unwrap() = Some(device);

        // 2 frames at 8 kHz mono become 4 stereo frames at 16 kHz.
        let token = engine.play_buffer(mono(0.5, 2)).unwrap();
        assert_eq!(engine.stream_format(), Some(device));
        assert_eq!(output.pump(4), vec![0.5; 8]);
        assert!(engine.completed(token));

        // Same source format again: the converted stream is reused.
        engine.play_buffer(mono(0.25, 2)).unwrap();
        assert_eq!(output.pump(1), vec![0.25; 2]);
        assert_eq!(output.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_sources_share_device_stream() {
        let (engine, output) = engine();
        *output.device_format.lock().unwrap() = Some(StreamFormat {
            sample_rate: 48_000,
            channels: 2,
        });
        engine.play_buffer(mono(0.1, 8)).unwrap();
        let stereo_24k = PlaybackBuffer::new(
            vec![0.2; 8],
            StreamFormat {
                sample_rate: 24_000,
                channels: 2,
            },
        );
        engine.play_buffer(stereo_24k).unwrap();
        assert_eq!(output.opens.load(Ordering::SeqCst), 1);
        assert_eq!(output.pump(2), vec![0.2; 4]);
    }

    #[test]
    fn test_missing_device_returns_to_idle() {
        let (engine, output) = engine();
        engine.play_buffer(mono(0.1, 16)).unwrap();
        output.no_device.store(true, Ordering::SeqCst);

        let stereo = PlaybackBuffer::new(
            vec![0.2; 8],
            StreamFormat {
                sample_rate: 8000,
                channels: 2,
            },
        );
        let err = engine.play_buffer(stereo).unwrap_err();
        assert!(matches!(err, PlaybackError::NoOutputDevice));
        assert!(!engine.is_playing());
        assert!(engine.wait(Some(Duration::ZERO)));
    }
}
