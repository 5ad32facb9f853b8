//! Audio output backends.
//!
//! An [`AudioOutput`] opens one running stream that calls a [`Renderer`]
//! every period. The returned [`ActiveStream`] keeps the stream alive and
//! tears it down when dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use tracing::{debug, error, info, warn};

use super::state::{Renderer, StreamFormat};
use crate::error::PlaybackError;

/// Something that can open a callback-driven output stream.
pub trait AudioOutput: Send + Sync {
    /// Open and start a stream. `renderer` must be called once per period
    /// with a block of `block_size × channels` samples (or whatever block
    /// the device hands out).
    fn open(
        &self,
        format: StreamFormat,
        block_size: u32,
        renderer: Renderer,
    ) -> Result<Box<dyn ActiveStream>, PlaybackError>;

    /// Format the output will actually run at when `requested` is wanted.
    /// Buffers are converted to it before they are installed.
    fn supported_format(&self, requested: StreamFormat) -> Result<StreamFormat, PlaybackError> {
        Ok(requested)
    }
}

/// A running output stream. Dropping it stops the stream.
pub trait ActiveStream: Send {
    fn format(&self) -> StreamFormat;
}

// ── cpal ────────────────────────────────────────────────────────────

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Sound card output through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// `None` uses the system default output device.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

/// Find the named output device, falling back to the default.
fn resolve_device(device_name: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let found = host
            .output_devices()
            .map_err(|e| {
                PlaybackError::OutputStream(format!("Failed to enumerate output devices: {}", e))
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        match found {
            Some(dev) => {
                info!(device = %name, "Using configured output device");
                return Ok(dev);
            }
            None => warn!(
                device = %name,
                "Configured output device not found, falling back to default"
            ),
        }
    }

    host.default_output_device()
        .ok_or(PlaybackError::NoOutputDevice)
}

/// `cpal::Stream` is `!Send` on some platforms because of internal raw
/// pointers. We only keep it alive and drop it; the callback runs on cpal's
/// own thread.
struct SendStream(cpal::Stream);

// SAFETY: the stream is never accessed after creation except to drop it.
unsafe impl Send for SendStream {}

struct CpalStream {
    _stream: SendStream,
    format: StreamFormat,
}

impl ActiveStream for CpalStream {
    fn format(&self) -> StreamFormat {
        self.format
    }
}

/// Device-side stream parameters chosen for a requested format.
struct DeviceConfig {
    format: StreamFormat,
    sample_format: cpal::SampleFormat,
}

/// Use the requested rate and channel count when the device takes them as
/// f32, otherwise fall back to the device's default config.
fn pick_config(device: &cpal::Device, requested: StreamFormat) -> Result<DeviceConfig, PlaybackError> {
    let rate = cpal::SampleRate(requested.sample_rate);
    let exact = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| {
                c.channels() == requested.channels
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && rate <= c.max_sample_rate()
            })
        })
        .unwrap_or(false);
    if exact {
        return Ok(DeviceConfig {
            format: requested,
            sample_format: cpal::SampleFormat::F32,
        });
    }

    let default = device.default_output_config().map_err(|e| {
        PlaybackError::OutputStream(format!("Failed to get default output config: {}", e))
    })?;
    let format = StreamFormat {
        sample_rate: default.sample_rate().0,
        channels: default.channels(),
    };
    debug!(
        requested_rate = requested.sample_rate,
        requested_channels = requested.channels,
        device_rate = format.sample_rate,
        device_channels = format.channels,
        sample_format = ?default.sample_format(),
        "Requested format unsupported, using device default"
    );
    Ok(DeviceConfig {
        format,
        sample_format: default.sample_format(),
    })
}

/// The renderer always works in f32; other device sample types get a
/// converted copy of each block.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Renderer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut block: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            if block.len() != data.len() {
                block.resize(data.len(), 0.0);
            }
            renderer.render(&mut block);
            for (out, &s) in data.iter_mut().zip(block.iter()) {
                *out = T::from_sample(s);
            }
        },
        move |err| {
            error!("Audio output stream error: {}", err);
        },
        None,
    )
}

fn build_for_format(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    renderer: Renderer,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, renderer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, renderer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, renderer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, renderer),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

impl AudioOutput for CpalOutput {
    fn supported_format(&self, requested: StreamFormat) -> Result<StreamFormat, PlaybackError> {
        let device = resolve_device(self.device_name.as_deref())?;
        Ok(pick_config(&device, requested)?.format)
    }

    fn open(
        &self,
        format: StreamFormat,
        block_size: u32,
        renderer: Renderer,
    ) -> Result<Box<dyn ActiveStream>, PlaybackError> {
        let device = resolve_device(self.device_name.as_deref())?;
        let dev_name = device.name().unwrap_or_else(|_| "unknown".into());

        let picked = pick_config(&device, format)?;
        if picked.format != format {
            // Device default changed since the buffer was converted.
            return Err(PlaybackError::OutputStream(format!(
                "'{}' no longer accepts {} Hz, {} ch",
                dev_name, format.sample_rate, format.channels
            )));
        }

        let mut config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(block_size.max(1)),
        };

        let stream = match build_for_format(&device, &config, picked.sample_format, renderer.clone()) {
            Ok(s) => s,
            Err(e) => {
                // Some backends reject fixed period sizes; latency then
                // follows the device default.
                warn!(
                    device = %dev_name,
                    block_size,
                    "Fixed block size rejected ({}), using device default",
                    e
                );
                config.buffer_size = cpal::BufferSize::Default;
                build_for_format(&device, &config, picked.sample_format, renderer).map_err(|e| {
                    PlaybackError::OutputStream(format!(
                        "Failed to build output stream on '{}' ({} Hz, {} ch, {:?}): {}",
                        dev_name, format.sample_rate, format.channels, picked.sample_format, e
                    ))
                })?
            }
        };

        stream
            .play()
            .map_err(|e| PlaybackError::OutputStream(format!("Failed to start output stream: {}", e)))?;

        info!(
            device = %dev_name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            sample_format = ?picked.sample_format,
            block_size,
            "Audio output stream started"
        );

        Ok(Box::new(CpalStream {
            _stream: SendStream(stream),
            format,
        }))
    }
}

// ── Headless ────────────────────────────────────────────────────────

/// Shared sink that receives every block a [`NullOutput`] renders.
pub type SampleTap = Arc<Mutex<Vec<f32>>>;

/// Headless output: renders blocks on its own thread at the real-time
/// period and throws them away (or copies them into a [`SampleTap`]).
#[derive(Debug, Clone, Default)]
pub struct NullOutput {
    tap: Option<SampleTap>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tap(tap: SampleTap) -> Self {
        Self { tap: Some(tap) }
    }
}

struct NullStream {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    format: StreamFormat,
}

impl ActiveStream for NullStream {
    fn format(&self) -> StreamFormat {
        self.format
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl AudioOutput for NullOutput {
    fn open(
        &self,
        format: StreamFormat,
        block_size: u32,
        renderer: Renderer,
    ) -> Result<Box<dyn ActiveStream>, PlaybackError> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(PlaybackError::OutputStream(format!(
                "Unsupported format {} Hz, {} ch",
                format.sample_rate, format.channels
            )));
        }

        let block_size = block_size.max(1);
        let period =
            Duration::from_secs_f64(f64::from(block_size) / f64::from(format.sample_rate));
        let running = Arc::new(AtomicBool::new(true));
        let tap = self.tap.clone();

        let thread = std::thread::Builder::new()
            .name("null-output".into())
            .spawn({
                let running = Arc::clone(&running);
                move || {
                    let mut block = vec![0.0f32; block_size as usize * usize::from(format.channels)];
                    let mut next = Instant::now();
                    while running.load(Ordering::Acquire) {
                        renderer.render(&mut block);
                        if let Some(tap) = &tap {
                            tap.lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .extend_from_slice(&block);
                        }
                        next += period;
                        match next.checked_duration_since(Instant::now()) {
                            Some(wait) => std::thread::sleep(wait),
                            None => next = Instant::now(),
                        }
                    }
                }
            })
            .map_err(|e| PlaybackError::OutputStream(format!("Failed to spawn output thread: {}", e)))?;

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            block_size,
            "Headless output stream started"
        );

        Ok(Box::new(NullStream {
            running,
            thread: Some(thread),
            format,
        }))
    }
}
