//! vaani-gateway: HTTP + SSE front for the live form session.
//!
//! The browser (or any client) sends intents as small JSON requests and follows the
//! session through `GET /api/v1/session/stream`. Drafts are autosaved; completed forms
//! are stored as submissions.

pub mod autosave;
pub mod error;
pub mod routes;

use std::sync::Arc;
use vaani_core::{FormStore, UserKeyStore};
use vaani_voice::SessionHandle;

pub use autosave::spawn_autosave;
pub use error::{ApiResult, GatewayError};
pub use routes::build_app;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub store: Arc<dyn FormStore>,
    pub keys: Arc<UserKeyStore>,
    /// Body limit for `POST /api/v1/document`.
    pub max_document_bytes: usize,
}
