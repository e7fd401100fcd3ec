//! Vaani core: the form model, transcripts, configuration, credentials and persistence.
//!
//! Shared by the voice session (`vaani-voice`) and the HTTP gateway.

pub mod config;
pub mod credentials;
pub mod error;
pub mod form;
pub mod store;
pub mod transcript;

pub use config::{UserConfig, VaaniConfig};
pub use credentials::{KeyProvider, StaticKeyProvider, UserKeyStore};
pub use error::{CoreError, CoreResult};
pub use form::{FormData, FormField};
pub use store::{FormStore, SledStore, Submission};
pub use transcript::{now_ms, Role, TranscriptionRecord};
