//! One-shot extraction of form fields from a document photo.

use crate::error::{VoiceError, VoiceResult};
use crate::rest::GeminiRest;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use vaani_core::FormData;

const EXTRACTION_INSTRUCTION: &str = "\
इस दस्तावेज़ से व्यक्ति का पूरा नाम, जन्म तिथि और शहर निकालें। \
Extract the person's full name, date of birth and city from this document. \
Return JSON with keys fullName, dob and city. Use an empty string for anything not present.";

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, image: &[u8], mime_type: &str) -> VoiceResult<FormData>;
}

/// Placeholder extractor: always fails, so the form is never touched.
#[derive(Debug, Default)]
pub struct PlaceholderExtractor;

#[async_trait]
impl DocumentExtractor for PlaceholderExtractor {
    async fn extract(&self, _image: &[u8], _mime_type: &str) -> VoiceResult<FormData> {
        Err(VoiceError::Extraction("no document extractor configured".to_string()))
    }
}

#[derive(Clone)]
pub struct GeminiExtractor {
    rest: GeminiRest,
    model: String,
}

impl GeminiExtractor {
    pub fn new(rest: GeminiRest, model: impl Into<String>) -> Self {
        Self {
            rest,
            model: model.into(),
        }
    }
}

#[async_trait]
impl DocumentExtractor for GeminiExtractor {
    async fn extract(&self, image: &[u8], mime_type: &str) -> VoiceResult<FormData> {
        let body = json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": mime_type, "data": B64.encode(image)}},
                    {"text": EXTRACTION_INSTRUCTION}
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "fullName": {"type": "STRING"},
                        "dob": {"type": "STRING"},
                        "city": {"type": "STRING"}
                    }
                }
            }
        });
        let res = self.rest.generate(&self.model, &body).await?;
        let text = res
            .first_text()
            .ok_or_else(|| VoiceError::Extraction("response has no text".to_string()))?;
        parse_extraction(text)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Extracted {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    dob: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// Parse the model's JSON answer. Missing or null keys become empty strings.
pub fn parse_extraction(text: &str) -> VoiceResult<FormData> {
    let extracted: Extracted = serde_json::from_str(text.trim())
        .map_err(|e| VoiceError::Extraction(format!("malformed extraction response: {}", e)))?;
    Ok(FormData::new(
        extracted.full_name.unwrap_or_default(),
        extracted.dob.unwrap_or_default(),
        extracted.city.unwrap_or_default(),
    ))
}
