//! VOICEVOX engine client.
//!
//! Synthesis is two calls:
//! 1. `POST /audio_query?text=..&speaker=<style>` returns a JSON query.
//! 2. `POST /synthesis?speaker=<style>` with that JSON returns WAV bytes.
//!
//! Voice parameter overrides (`speedScale`, `pitchScale`, ...) are patched
//! into the query between the two calls.

use std::time::Duration;

use tracing::{debug, info};

use super::{SynthFuture, Synthesizer};
use crate::error::SynthesisError;
use crate::speech::{StyleId, VoiceParams};

pub struct VoicevoxClient {
    base_url: String,
    client: reqwest::Client,
}

impl VoicevoxClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// `POST /audio_query`.
    pub async fn audio_query(
        &self,
        text: &str,
        style_id: StyleId,
    ) -> Result<serde_json::Value, SynthesisError> {
        let resp = self
            .client
            .post(self.url("/audio_query"))
            .query(&[("text", text.to_string()), ("speaker", style_id.to_string())])
            .send()
            .await?;
        let bytes = check_status(resp).await?.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SynthesisError::InvalidResponse(format!("audio_query: {}", e)))
    }

    /// `POST /synthesis`. Returns WAV bytes.
    pub async fn synthesis(
        &self,
        query: &serde_json::Value,
        style_id: StyleId,
    ) -> Result<Vec<u8>, SynthesisError> {
        let resp = self
            .client
            .post(self.url("/synthesis"))
            .query(&[("speaker", style_id.to_string())])
            .json(query)
            .send()
            .await?;
        let bytes = check_status(resp).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// `GET /speakers`.
    pub async fn get_speakers(&self) -> Result<serde_json::Value, SynthesisError> {
        let resp = self.client.get(self.url("/speakers")).send().await?;
        let bytes = check_status(resp).await?.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SynthesisError::InvalidResponse(format!("speakers: {}", e)))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SynthesisError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SynthesisError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Patch overrides into an audio query. Keys the query does not already
/// have are ignored. Returns how many keys were replaced.
pub(crate) fn apply_overrides(query: &mut serde_json::Value, overrides: &VoiceParams) -> usize {
    let Some(obj) = query.as_object_mut() else {
        return 0;
    };
    let mut replaced = 0;
    for (key, value) in overrides {
        if let Some(slot) = obj.get_mut(key) {
            *slot = serde_json::json!(value);
            replaced += 1;
        }
    }
    replaced
}

impl Synthesizer for VoicevoxClient {
    fn synthesize(
        &self,
        text: &str,
        style_id: StyleId,
        overrides: &VoiceParams,
    ) -> SynthFuture<'_, Vec<u8>> {
        let text = text.to_string();
        let overrides = overrides.clone();
        Box::pin(async move {
            info!(style_id, text_len = text.len(), "VOICEVOX synthesis request");

            let mut query = self.audio_query(&text, style_id).await?;
            let replaced = apply_overrides(&mut query, &overrides);
            debug!(replaced, requested = overrides.len(), "Applied voice overrides");

            let wav = self.synthesis(&query, style_id).await?;
            info!(bytes = wav.len(), "VOICEVOX synthesis complete");
            Ok(wav)
        })
    }

    fn speakers(&self) -> SynthFuture<'_, serde_json::Value> {
        Box::pin(self.get_speakers())
    }

    fn name(&self) -> String {
        format!("VOICEVOX ({})", self.base_url)
    }
}
