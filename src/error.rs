//! Error types for playback and synthesis.

/// Errors raised by the playback engine.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// Audio bytes could not be decoded to PCM.
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    /// No output device is available.
    #[error("No audio output device available")]
    NoOutputDevice,

    /// Building, configuring, or starting the output stream failed.
    #[error("Failed to open audio output stream: {0}")]
    OutputStream(String),

    /// The engine was closed and will not play anything else.
    #[error("Playback engine is closed")]
    Closed,
}

/// Errors raised by a synthesis client.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// Transport failure (connect, timeout, body read).
    #[error("Synthesis request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Synthesis service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered with something we could not interpret.
    #[error("Invalid synthesis response: {0}")]
    InvalidResponse(String),
}
