//! Error types shared by the Vaani core crate.

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by configuration, credentials and the form store.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("User config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("User config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Unknown form field: {0}")]
    UnknownField(String),

    #[error("Form is incomplete")]
    IncompleteForm,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
