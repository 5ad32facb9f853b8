//! JSON-line protocol between the daemon and its controlling process.
//!
//! Events use `{"event": "<name>", "data": {...}}` (daemon -> controller).
//! Commands use `{"command": "<name>", ...}` (controller -> daemon).

pub mod bridge;

use serde::{Deserialize, Serialize};

use speech_queue::speech::{StyleId, VoiceParams};

// ---------------------------------------------------------------------------
// Events: daemon -> controller (stdout)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum SpeechEvent {
    Starting {},
    Ready { synthesis_url: String },
    Accepted {},
    Rejected { reason: String },
    Status { playing: bool, queued: usize },
    Speakers { speakers: serde_json::Value },
    OutputDevices { output: Vec<String> },
    Pong {},
    Error { message: String },
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: controller -> daemon (stdin)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum SpeechCommand {
    Speak {
        #[serde(default)]
        text: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        style_id: Option<StyleId>,
        #[serde(default)]
        voice_params: Option<VoiceParams>,
        /// Cut off current audio and drop the backlog first.
        #[serde(default)]
        interrupt: bool,
        #[serde(default)]
        no_dedup: bool,
    },
    Stop {},
    Clear {},
    Status {},
    ListSpeakers {},
    ListOutputDevices {},
    Ping {},
    Shutdown {},
}
