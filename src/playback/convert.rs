//! Channel mapping and linear resampling to a device's stream format.

use super::state::{PlaybackBuffer, StreamFormat};

/// Convert `buffer` to `target`. A buffer already in that format is
/// returned unchanged.
pub fn convert_buffer(buffer: PlaybackBuffer, target: StreamFormat) -> PlaybackBuffer {
    let source = buffer.format();
    if source == target {
        return buffer;
    }

    let to_channels = usize::from(target.channels.max(1));
    let mapped = map_channels(buffer.samples(), buffer.channels(), to_channels);
    let samples = resample_linear(&mapped, to_channels, source.sample_rate, target.sample_rate);
    PlaybackBuffer::new(samples, target)
}

/// Mono is duplicated to every output channel, anything to mono is
/// averaged, other layouts take source channel `c % from`.
fn map_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    if to == 1 {
        return samples
            .chunks_exact(from)
            .map(|frame| frame.iter().sum::<f32>() / from as f32)
            .collect();
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for c in 0..to {
            out.push(frame[c % from]);
        }
    }
    out
}

/// Linear interpolation per channel on interleaved frames.
fn resample_linear(input: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let in_frames = input.len() / channels;
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_frames = (in_frames as f64 / ratio).floor() as usize;

    let mut output = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let next = (idx0 + 1).min(in_frames.saturating_sub(1));
        for c in 0..channels {
            let s0 = input.get(idx0 * channels + c).copied().unwrap_or(0.0);
            let s1 = input.get(next * channels + c).copied().unwrap_or(s0);
            output.push(s0 + frac * (s1 - s0));
        }
    }
    output
}
