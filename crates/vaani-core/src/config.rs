//! Vaani configuration.
//!
//! [`VaaniConfig`] is built with the `config` crate: struct defaults, then an optional
//! TOML file (`config/vaani.toml`, or the path in `VAANI_CONFIG`), then `VAANI__*`
//! environment overrides (e.g. `VAANI__BIND_ADDR=0.0.0.0:8080`).
//!
//! [`UserConfig`] holds the per-user API key in `user_config.toml`, so a key entered
//! through the gateway survives restarts without touching `.env`.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/vaani.toml";

/// Runtime configuration for the gateway, the live session and the remote models.
///
/// | Key | Default | Description |
/// |-----|---------|-------------|
/// | bind_addr | 127.0.0.1:8080 | Gateway listen address. |
/// | storage_path | ./data/vaani_store | Sled directory for drafts and submissions. |
/// | log_dir | ./data/logs | Daily rolling log files. |
/// | live_url | Gemini BidiGenerateContent | WebSocket endpoint of the conversational model. |
/// | api_base_url | Gemini v1beta REST | Base URL for speech synthesis and document extraction. |
/// | input_sample_rate | 16000 | Microphone capture rate (Hz). |
/// | output_sample_rate | 24000 | Rate of audio returned by the models (Hz). |
/// | capture_block_size | 4096 | Samples per microphone block sent upstream. |
/// | autosave_debounce_ms | 1000 | Quiet period before a changed draft is saved. |
/// | max_document_bytes | 20 MiB | Largest accepted document photo upload. |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaaniConfig {
    pub bind_addr: String,
    pub storage_path: String,
    pub log_dir: String,
    pub live_url: String,
    pub api_base_url: String,
    pub live_model: String,
    pub speech_model: String,
    pub extraction_model: String,
    /// Prebuilt voice used for both live replies and read-back.
    pub voice_name: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_block_size: usize,
    pub autosave_debounce_ms: u64,
    pub max_document_bytes: usize,
    /// Assistant phrases (matched case-insensitively) that close the conversation once the form is complete.
    pub closing_phrases: Vec<String>,
}

impl Default for VaaniConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            storage_path: "./data/vaani_store".to_string(),
            log_dir: "./data/logs".to_string(),
            live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            live_model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            extraction_model: "gemini-2.5-flash".to_string(),
            voice_name: "Kore".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            capture_block_size: 4096,
            autosave_debounce_ms: 1000,
            max_document_bytes: 20 * 1024 * 1024,
            closing_phrases: vec![
                "form jama ho gaya".to_string(),
                "फॉर्म जमा हो गया".to_string(),
                "फ़ॉर्म जमा हो गया".to_string(),
            ],
        }
    }
}

impl VaaniConfig {
    /// Load from `VAANI_CONFIG` (or `config/vaani.toml`) and `VAANI__*` env overrides.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var("VAANI_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> CoreResult<Self> {
        let mut builder = config::Config::builder();
        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        }
        let built = builder
            .add_source(
                config::Environment::with_prefix("VAANI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(built.try_deserialize()?)
    }
}

/// User-specific settings stored in `user_config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    /// Gemini API key entered by the user.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl UserConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from("user_config.toml")
    }

    /// Load from `path`; a missing file yields defaults (and is not created until saved).
    pub fn load_from_path(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to_path(&self, path: &Path) -> CoreResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// API key with fallback to `GEMINI_API_KEY` then `VAANI_API_KEY`.
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("VAANI_API_KEY").ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
