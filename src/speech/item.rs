//! Speak requests and their dedup identity.

use std::collections::BTreeMap;

/// Synthesis style (VOICEVOX "speaker") id.
pub type StyleId = u32;

/// Voice parameter overrides, kept sorted by key.
pub type VoiceParams = BTreeMap<String, f64>;

/// One utterance waiting to be spoken. Text is already cleaned upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakItem {
    pub name: String,
    pub text: String,
    pub style_id: StyleId,
    pub voice_params: VoiceParams,
    /// Speak even if identical to the last fully played utterance.
    pub no_dedup: bool,
}

impl SpeakItem {
    pub fn new(name: impl Into<String>, text: impl Into<String>, style_id: StyleId) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            style_id,
            voice_params: VoiceParams::new(),
            no_dedup: false,
        }
    }

    pub fn with_params(mut self, voice_params: VoiceParams) -> Self {
        self.voice_params = voice_params;
        self
    }

    pub fn with_no_dedup(mut self, no_dedup: bool) -> Self {
        self.no_dedup = no_dedup;
        self
    }

    /// Whether there is anything to say.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            text: self.text.clone(),
            style_id: self.style_id,
            voice_params: self
                .voice_params
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

/// `(text, style_id, sorted params)`. Equal keys mean the same utterance.
/// The speaker name is deliberately not part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupKey {
    text: String,
    style_id: StyleId,
    voice_params: Vec<(String, f64)>,
}
