//! Configuration reading and data directory paths.

pub mod paths;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::speech::voices::{default_voices, VoiceProfile};
use paths::get_data_dir;

/// Device name that selects the headless clocked output.
pub const NULL_OUTPUT_DEVICE: &str = "null";

/// speech_config.json shape. Every field falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Base URL of the VOICEVOX-compatible synthesis engine.
    pub synthesis_url: String,
    pub request_timeout_secs: u64,
    /// Pending item limit; 0 disables the limit.
    pub max_queue_size: usize,
    pub dedup_enabled: bool,
    /// Output callback period in frames. Bounds interrupt latency to
    /// `block_size / sample_rate`.
    pub block_size: u32,
    /// Upper bound on how long the worker sleeps between shutdown checks
    /// while waiting for playback.
    pub wait_poll_ms: u64,
    /// Output device name; `None` is the system default, `"null"` is headless.
    pub output_device: Option<String>,
    pub voices: BTreeMap<String, VoiceProfile>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            synthesis_url: "http://127.0.0.1:50021".to_string(),
            request_timeout_secs: 30,
            max_queue_size: 100,
            dedup_enabled: true,
            block_size: 240,
            wait_poll_ms: 10,
            output_device: None,
            voices: default_voices(),
        }
    }
}

impl SpeechConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms.max(1))
    }

    /// Whether the headless output was requested instead of a sound card.
    pub fn is_headless(&self) -> bool {
        self.output_device.as_deref() == Some(NULL_OUTPUT_DEVICE)
    }
}

/// Read speech_config.json from the data directory.
pub fn read_speech_config() -> SpeechConfig {
    read_speech_config_from(&get_config_path())
}

/// Read a config file from an explicit path, falling back to defaults.
pub fn read_speech_config_from(path: &Path) -> SpeechConfig {
    let mut config: SpeechConfig = read_json_file(path).unwrap_or_default();
    // A file that lists only character voices still needs the base profile.
    if !config.voices.contains_key("default") {
        config.voices.extend(default_voices());
    }
    config
}

/// Path to speech_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("speech_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
