//! Speech synthesis for reading the form back.

use crate::error::{VoiceError, VoiceResult};
use crate::rest::GeminiRest;
use async_trait::async_trait;
use serde_json::json;
use vaani_core::{FormData, FormField};

/// Backend that turns text into base64 PCM16 audio (24 kHz mono).
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// `Ok(None)` means the backend produced no audio; nothing is played.
    async fn synthesize(&self, text: &str) -> VoiceResult<Option<String>>;
}

/// Placeholder backend: never produces audio.
#[derive(Debug, Default)]
pub struct PlaceholderSpeech;

#[async_trait]
impl SpeechBackend for PlaceholderSpeech {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Option<String>> {
        Ok(None)
    }
}

/// Gemini TTS via `generateContent` with the AUDIO response modality.
#[derive(Clone)]
pub struct GeminiSpeech {
    rest: GeminiRest,
    model: String,
    voice_name: String,
}

impl GeminiSpeech {
    pub fn new(rest: GeminiRest, model: impl Into<String>, voice_name: impl Into<String>) -> Self {
        Self {
            rest,
            model: model.into(),
            voice_name: voice_name.into(),
        }
    }
}

#[async_trait]
impl SpeechBackend for GeminiSpeech {
    async fn synthesize(&self, text: &str) -> VoiceResult<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let body = json!({
            "contents": [{"parts": [{"text": text}]}],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": self.voice_name}}
                }
            }
        });
        let res = self
            .rest
            .generate(&self.model, &body)
            .await
            .map_err(|e| match e {
                VoiceError::MissingKey => e,
                other => VoiceError::Tts(other.to_string()),
            })?;
        Ok(res.first_inline_data().map(String::from))
    }
}

/// Hindi prompt asking the speech model to read the collected values.
pub fn read_back_prompt(form: &FormData) -> String {
    let body = FormField::ALL
        .iter()
        .map(|f| format!("{}: {}", f.hindi_label(), form.get(*f).trim()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("कृपया यह जानकारी स्पष्ट रूप से पढ़ें। {}", body)
}
