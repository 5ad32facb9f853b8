//! Character name → (style id, voice params) resolution.
//!
//! Profiles are held in memory; loading and saving them is the caller's
//! business. Every named profile is layered over `default`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::item::{StyleId, VoiceParams};

/// Name of the profile every other profile inherits from.
pub const DEFAULT_VOICE: &str = "default";

const FALLBACK_STYLE_ID: StyleId = 2;

/// One entry of the voice table. Missing fields inherit from `default`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    #[serde(default)]
    pub style_id: Option<StyleId>,
    #[serde(default)]
    pub voice_params: VoiceParams,
}

/// Fully resolved voice for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVoice {
    pub style_id: StyleId,
    pub voice_params: VoiceParams,
}

impl ResolvedVoice {
    /// Apply per-request overrides: an explicit style wins, explicit params
    /// replace resolved params key by key.
    pub fn with_overrides(mut self, style_id: Option<StyleId>, params: Option<&VoiceParams>) -> Self {
        if let Some(style_id) = style_id {
            self.style_id = style_id;
        }
        if let Some(params) = params {
            self.voice_params
                .extend(params.iter().map(|(k, v)| (k.clone(), *v)));
        }
        self
    }
}

/// Resolves a character name to its voice.
pub trait VoiceResolver: Send + Sync {
    fn resolve(&self, name: &str) -> ResolvedVoice;
}

/// The built-in `default` profile.
pub fn default_voices() -> BTreeMap<String, VoiceProfile> {
    let params = VoiceParams::from([
        ("speedScale".to_string(), 1.0),
        ("pitchScale".to_string(), 0.0),
        ("intonationScale".to_string(), 1.0),
        ("volumeScale".to_string(), 1.0),
    ]);
    BTreeMap::from([(
        DEFAULT_VOICE.to_string(),
        VoiceProfile {
            style_id: Some(FALLBACK_STYLE_ID),
            voice_params: params,
        },
    )])
}

/// In-memory voice table.
#[derive(Debug, Clone)]
pub struct VoiceTable {
    profiles: BTreeMap<String, VoiceProfile>,
}

impl VoiceTable {
    pub fn new(mut profiles: BTreeMap<String, VoiceProfile>) -> Self {
        if !profiles.contains_key(DEFAULT_VOICE) {
            profiles.extend(default_voices());
        }
        Self { profiles }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

impl Default for VoiceTable {
    fn default() -> Self {
        Self::new(default_voices())
    }
}

impl VoiceResolver for VoiceTable {
    fn resolve(&self, name: &str) -> ResolvedVoice {
        let base = self.profiles.get(DEFAULT_VOICE);
        let specific = self.profiles.get(name.trim());

        let style_id = specific
            .and_then(|p| p.style_id)
            .or_else(|| base.and_then(|p| p.style_id))
            .unwrap_or(FALLBACK_STYLE_ID);

        let mut voice_params = base.map(|p| p.voice_params.clone()).unwrap_or_default();
        if let Some(p) = specific {
            voice_params.extend(p.voice_params.iter().map(|(k, v)| (k.clone(), *v)));
        }

        ResolvedVoice {
            style_id,
            voice_params,
        }
    }
}
