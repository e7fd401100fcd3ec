//! Gateway errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Session unavailable: {0}")]
    Session(#[from] vaani_voice::VoiceError),

    #[error("Store error: {0}")]
    Core(#[from] vaani_core::CoreError),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Core(vaani_core::CoreError::IncompleteForm) => StatusCode::CONFLICT,
            GatewayError::Core(vaani_core::CoreError::UnknownField(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Session(_) | GatewayError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "vaani::gateway", error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, GatewayError>;
