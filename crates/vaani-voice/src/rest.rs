//! Minimal `generateContent` client shared by speech synthesis and document extraction.

use crate::error::{VoiceError, VoiceResult};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use vaani_core::KeyProvider;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<crate::protocol::ServerPart>,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> impl Iterator<Item = &crate::protocol::ServerPart> + '_ {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|c| c.parts.iter())
    }

    /// Base64 payload of the first inline-data part of the first candidate.
    pub fn first_inline_data(&self) -> Option<&str> {
        self.first_parts()
            .find_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
    }

    /// Text of the first text part of the first candidate.
    pub fn first_text(&self) -> Option<&str> {
        self.first_parts().find_map(|p| p.text.as_deref())
    }
}

#[derive(Clone)]
pub struct GeminiRest {
    client: reqwest::Client,
    base_url: String,
    keys: Arc<dyn KeyProvider>,
}

impl GeminiRest {
    pub fn new(base_url: impl Into<String>, keys: Arc<dyn KeyProvider>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            keys,
        })
    }

    /// POST `{base}/models/{model}:generateContent`. Fails with `MissingKey` before any request.
    pub async fn generate(&self, model: &str, body: &Value) -> VoiceResult<GenerateContentResponse> {
        let key = self.keys.api_key().ok_or(VoiceError::MissingKey)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model.trim_start_matches("models/")
        );
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Transport(format!("generateContent error {}: {}", status, body)));
        }
        Ok(res.json::<GenerateContentResponse>().await?)
    }
}
