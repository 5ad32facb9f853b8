//! Token-versioned playback state shared with the audio callback.
//!
//! The callback path is split into three steps so that the lock is never
//! held while samples are written:
//!
//! 1. `snapshot` — take the lock, clone the active buffer handle, release.
//! 2. `copy_frames` — pure copy from the buffer into the device block.
//! 3. `advance` — re-take the lock, move the position forward or finish,
//!    but only if the token captured in step 1 is still current.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Monotonic version stamp minted by every `play` and `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackToken(u64);

impl PlaybackToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sample rate and channel count of a buffer or an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decoded interleaved f32 PCM, `frames × channels`.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    format: StreamFormat,
}

impl PlaybackBuffer {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, format: StreamFormat) -> Self {
        let channels = usize::from(format.channels.max(1));
        samples.truncate(samples.len() - samples.len() % channels);
        Self { samples, format }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        usize::from(self.format.channels.max(1))
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.format.sample_rate))
    }
}

/// Copy frames starting at `position` into `out`, zero-filling whatever the
/// buffer cannot supply. Returns the number of frames copied.
pub(crate) fn copy_frames(buffer: &PlaybackBuffer, position: usize, out: &mut [f32]) -> usize {
    let channels = buffer.channels();
    let requested = out.len() / channels;
    let available = buffer.frames().saturating_sub(position);
    let frames = requested.min(available);

    let start = position * channels;
    let len = frames * channels;
    out[..len].copy_from_slice(&buffer.samples[start..start + len]);
    out[len..].fill(0.0);
    frames
}

#[derive(Debug, Default)]
struct PlaybackState {
    token: u64,
    buffer: Option<Arc<PlaybackBuffer>>,
    position: usize,
    active: bool,
    finished: bool,
    /// Token of the most recent natural completion (0 = none).
    completed: u64,
}

impl PlaybackState {
    fn reset(&mut self) {
        self.active = false;
        self.buffer = None;
        self.position = 0;
        self.finished = true;
    }
}

/// What the callback needs from the shared state for one block.
pub(crate) struct Snapshot {
    pub(crate) token: PlaybackToken,
    pub(crate) buffer: Arc<PlaybackBuffer>,
    pub(crate) position: usize,
}

/// State shared between the engine, its callers, and the audio callback.
#[derive(Debug)]
pub(crate) struct SharedPlayback {
    state: Mutex<PlaybackState>,
    done: Condvar,
}

impl SharedPlayback {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PlaybackState {
                finished: true,
                ..PlaybackState::default()
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a token and make `buffer` the only active audio.
    pub(crate) fn install(&self, buffer: Arc<PlaybackBuffer>) -> PlaybackToken {
        let mut st = self.lock();
        st.token += 1;
        let token = st.token;
        if buffer.frames() == 0 {
            st.reset();
            st.completed = token;
            drop(st);
            self.done.notify_all();
        } else {
            st.buffer = Some(buffer);
            st.position = 0;
            st.active = true;
            st.finished = false;
        }
        PlaybackToken(token)
    }

    /// Mint a token and go idle. Any callback holding an older token is stale.
    pub(crate) fn cancel(&self) -> PlaybackToken {
        let mut st = self.lock();
        st.token += 1;
        st.reset();
        let token = st.token;
        drop(st);
        self.done.notify_all();
        PlaybackToken(token)
    }

    /// Go idle without minting, but only if `token` is still current.
    /// Used when the stream for a freshly installed buffer could not open.
    pub(crate) fn abandon(&self, token: PlaybackToken) {
        let mut st = self.lock();
        if st.token != token.0 {
            return;
        }
        st.reset();
        drop(st);
        self.done.notify_all();
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lock().active
    }

    pub(crate) fn current_token(&self) -> PlaybackToken {
        PlaybackToken(self.lock().token)
    }

    pub(crate) fn completed(&self, token: PlaybackToken) -> bool {
        token.0 != 0 && self.lock().completed == token.0
    }

    /// Block until the finished signal is set. Returns the signal's value.
    pub(crate) fn wait_finished(&self, timeout: Option<Duration>) -> bool {
        let guard = self.lock();
        match timeout {
            None => {
                let _guard = self
                    .done
                    .wait_while(guard, |st| !st.finished)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (guard, _) = self
                    .done
                    .wait_timeout_while(guard, timeout, |st| !st.finished)
                    .unwrap_or_else(PoisonError::into_inner);
                guard.finished
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Option<Snapshot> {
        let st = self.lock();
        if !st.active {
            return None;
        }
        let buffer = st.buffer.as_ref().map(Arc::clone)?;
        Some(Snapshot {
            token: PlaybackToken(st.token),
            buffer,
            position: st.position,
        })
    }

    /// Record progress for `token`. A stale token changes nothing.
    pub(crate) fn advance(&self, token: PlaybackToken, position: usize, done: bool) {
        let mut st = self.lock();
        if st.token != token.0 {
            return;
        }
        if done {
            st.reset();
            st.completed = token.0;
            drop(st);
            self.done.notify_all();
        } else {
            st.position = position;
        }
    }
}

/// Audio callback body bound to one open stream.
///
/// Output backends call [`Renderer::render`] once per device period. It
/// always fills the whole block: active audio when the current token has a
/// buffer in this stream's format, silence otherwise.
#[derive(Clone)]
pub struct Renderer {
    shared: Arc<SharedPlayback>,
    format: StreamFormat,
}

impl Renderer {
    pub(crate) fn new(shared: Arc<SharedPlayback>, format: StreamFormat) -> Self {
        Self { shared, format }
    }

    /// Format of the stream this renderer feeds.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Fill one interleaved output block.
    pub fn render(&self, out: &mut [f32]) {
        let Some(snap) = self.shared.snapshot() else {
            out.fill(0.0);
            return;
        };
        // The stream is being rebuilt for a different format.
        if snap.buffer.format() != self.format {
            out.fill(0.0);
            return;
        }

        let written = copy_frames(&snap.buffer, snap.position, out);
        let end = snap.position + written;
        self.shared
            .advance(snap.token, end, end >= snap.buffer.frames());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO: StreamFormat = StreamFormat {
        sample_rate: 8000,
        channels: 1,
    };

    fn buffer(values: &[f32]) -> Arc<PlaybackBuffer> {
        Arc::new(PlaybackBuffer::new(values.to_vec(), MONO))
    }

    #[test]
    fn test_buffer_drops_partial_frame() {
        let format = StreamFormat {
            sample_rate: 8000,
            channels: 2,
        };
        let buf = PlaybackBuffer::new(vec![0.1, 0.2, 0.3], format);
        assert_eq!(buf.frames(), 1);
        assert_eq!(buf.samples(), &[0.1, 0.2]);
    }

    #[test]
    fn test_copy_frames_pads_with_silence() {
        let buf = PlaybackBuffer::new(vec![0.5, 0.5, 0.5], MONO);
        let mut out = [1.0f32; 4];
        let copied = copy_frames(&buf, 1, &mut out);
        assert_eq!(copied, 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_copy_frames_past_end() {
        let buf = PlaybackBuffer::new(vec![0.5; 2], MONO);
        let mut out = [1.0f32; 2];
        assert_eq!(copy_frames(&buf, 5, &mut out), 0);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_install_and_cancel_mint_tokens() {
        let shared = SharedPlayback::new();
        let t1 = shared.install(buffer(&[0.1; 4]));
        assert!(shared.is_active());
        let t2 = shared.cancel();
        assert!(t2 > t1);
        assert!(!shared.is_active());
        assert!(shared.wait_finished(Some(Duration::ZERO)));
        assert_eq!(shared.current_token(), t2);
    }

    #[test]
    fn test_stale_advance_is_ignored() {
        let shared = SharedPlayback::new();
        let old = shared.install(buffer(&[0.1; 8]));
        let new = shared.install(buffer(&[0.2; 8]));

        // A callback that snapshotted `old` finishes its block late.
        shared.advance(old, 8, true);

        assert!(shared.is_active());
        assert!(!shared.completed(old));
        let snap = shared.snapshot().unwrap();
        assert_eq!(snap.token, new);
        assert_eq!(snap.position, 0);
    }

    #[test]
    fn test_empty_buffer_completes_immediately() {
        let shared = SharedPlayback::new();
        let token = shared.install(buffer(&[]));
        assert!(!shared.is_active());
        assert!(shared.completed(token));
        assert!(shared.wait_finished(None));
    }

    #[test]
    fn test_abandon_only_affects_current_token() {
        let shared = SharedPlayback::new();
        let first = shared.install(buffer(&[0.1; 4]));
        let _second = shared.install(buffer(&[0.2; 4]));
        shared.abandon(first);
        assert!(shared.is_active());
    }

    #[test]
    fn test_renderer_format_mismatch_is_silent() {
        let shared = Arc::new(SharedPlayback::new());
        shared.install(buffer(&[0.7; 16]));
        let stereo = StreamFormat {
            sample_rate: 8000,
            channels: 2,
        };
        let renderer = Renderer::new(Arc::clone(&shared), stereo);

        let mut out = [1.0f32; 8];
        renderer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(shared.snapshot().unwrap().position, 0);
    }
}
