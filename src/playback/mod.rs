//! Interruptible audio playback over one persistent output stream.

pub mod convert;
pub mod decode;
pub mod engine;
pub mod output;
pub mod state;

pub use convert::convert_buffer;
pub use decode::decode_audio;
pub use engine::PlaybackEngine;
pub use output::{list_output_devices, ActiveStream, AudioOutput, CpalOutput, NullOutput, SampleTap};
pub use state::{PlaybackBuffer, PlaybackToken, Renderer, StreamFormat};
