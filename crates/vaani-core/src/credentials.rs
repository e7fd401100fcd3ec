//! Credential capability: is there an API key, and how to ask for one.
//!
//! Every remote call consults a [`KeyProvider`] first; without a key the call is
//! never attempted.

use crate::config::UserConfig;
use crate::error::CoreResult;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};

pub trait KeyProvider: Send + Sync {
    /// Current API key, if any.
    fn api_key(&self) -> Option<String>;

    fn has_key(&self) -> bool {
        self.api_key().is_some()
    }

    /// Ask the user to select or enter a key. Non-blocking; the key arrives later.
    fn prompt_for_key(&self);
}

/// Key resolved from `user_config.toml`, falling back to `GEMINI_API_KEY` / `VAANI_API_KEY`.
pub struct UserKeyStore {
    path: PathBuf,
    config: RwLock<UserConfig>,
    prompt_pending: AtomicBool,
}

impl UserKeyStore {
    pub fn open(path: PathBuf) -> CoreResult<Self> {
        let config = UserConfig::load_from_path(&path)?;
        Ok(Self {
            path,
            config: RwLock::new(config),
            prompt_pending: AtomicBool::new(false),
        })
    }

    pub fn open_default() -> CoreResult<Self> {
        Self::open(UserConfig::default_path())
    }

    /// Store a new key and persist it. Clears any pending prompt.
    pub fn set_key(&self, key: &str) -> CoreResult<()> {
        let snapshot = {
            let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
            cfg.api_key = Some(key.trim().to_string());
            cfg.clone()
        };
        snapshot.save_to_path(&self.path)?;
        self.prompt_pending.store(false, Ordering::SeqCst);
        info!("🔑 API key updated ({})", self.path.display());
        Ok(())
    }

    pub fn prompt_pending(&self) -> bool {
        self.prompt_pending.load(Ordering::SeqCst)
    }
}

impl KeyProvider for UserKeyStore {
    fn api_key(&self) -> Option<String> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get_api_key()
    }

    fn prompt_for_key(&self) {
        self.prompt_pending.store(true, Ordering::SeqCst);
        warn!(
            "🔑 API key required: POST /api/v1/config/api-key or set GEMINI_API_KEY ({} not usable)",
            self.path.display()
        );
    }
}

/// Fixed key, for CLIs and tests. `None` behaves as "no key configured".
#[derive(Debug, Default)]
pub struct StaticKeyProvider {
    key: Option<String>,
    prompted: AtomicBool,
}

impl StaticKeyProvider {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: key.map(String::from),
            prompted: AtomicBool::new(false),
        }
    }

    pub fn was_prompted(&self) -> bool {
        self.prompted.load(Ordering::SeqCst)
    }
}

impl KeyProvider for StaticKeyProvider {
    fn api_key(&self) -> Option<String> {
        self.key.clone().filter(|k| !k.trim().is_empty())
    }

    fn prompt_for_key(&self) {
        self.prompted.store(true, Ordering::SeqCst);
    }
}
