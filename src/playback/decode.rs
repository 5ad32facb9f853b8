//! WAV / MP3 to interleaved f32 PCM decoding via Symphonia.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::state::{PlaybackBuffer, StreamFormat};
use crate::error::PlaybackError;

/// Decode synthesized audio bytes into a playback buffer.
///
/// Keeps the source channel layout (mono stays a single column) and sample
/// rate; the output stream is configured to match.
pub fn decode_audio(bytes: &[u8]) -> Result<PlaybackBuffer, PlaybackError> {
    if bytes.is_empty() {
        return Err(PlaybackError::Decode("empty audio payload".into()));
    }

    // MediaSourceStream needs an owned ('static) source.
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(if bytes.starts_with(b"RIFF") { "wav" } else { "mp3" });

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlaybackError::Decode(format!("probe failed: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| PlaybackError::Decode("no audio track".into()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut channels = params.channels.map(|c| c.count()).unwrap_or(0);
    let mut sample_rate = params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| PlaybackError::Decode(format!("decoder init failed: {}", e)))?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(PlaybackError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("Audio packet decode error (skipping): {}", e);
                continue;
            }
            Err(e) => return Err(PlaybackError::Decode(e.to_string())),
        };
        let spec = *decoded.spec();
        channels = spec.channels.count();
        sample_rate = spec.rate;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if channels == 0 || sample_rate == 0 {
        return Err(PlaybackError::Decode(
            "stream has no channel layout or sample rate".into(),
        ));
    }
    let channels = u16::try_from(channels)
        .map_err(|_| PlaybackError::Decode(format!("unsupported channel count {}", channels)))?;

    Ok(PlaybackBuffer::new(
        samples,
        StreamFormat {
            sample_rate,
            channels,
        },
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a 16-bit PCM WAV file in memory.
    pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decode_mono_wav() {
        let bytes = wav_bytes(24_000, 1, &[0, 16_384, -16_384, 0]);
        let buf = decode_audio(&bytes).unwrap();
        assert_eq!(
            buf.format(),
            StreamFormat {
                sample_rate: 24_000,
                channels: 1
            }
        );
        assert_eq!(buf.frames(), 4);
        assert!((buf.samples()[1] - 0.5).abs() < 1e-3);
        assert!((buf.samples()[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_stereo_wav_keeps_channels() {
        let bytes = wav_bytes(48_000, 2, &[100, -100, 200, -200, 300, -300]);
        let buf = decode_audio(&bytes).unwrap();
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 3);
        assert!(buf.samples()[0] > 0.0 && buf.samples()[1] < 0.0);
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode_audio(&[]), Err(PlaybackError::Decode(_))));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_audio(b"definitely not audio").unwrap_err();
        assert!(matches!(err, PlaybackError::Decode(_)));
    }
}
