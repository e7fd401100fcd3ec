//! `/api/v1` routes.

use crate::error::{ApiResult, GatewayError};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use vaani_core::{FormData, FormField, KeyProvider, Submission};
use vaani_voice::{SessionEvent, SessionView};

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/session", get(session_view))
        .route("/api/v1/session/stream", get(session_stream))
        .route("/api/v1/session/start", post(start))
        .route("/api/v1/session/stop", post(stop))
        .route("/api/v1/session/mute", post(toggle_mute))
        .route("/api/v1/session/interrupt", post(interrupt))
        .route("/api/v1/session/reset", post(reset))
        .route("/api/v1/session/readback", post(read_back))
        .route("/api/v1/form/:field", put(set_field))
        .route(
            "/api/v1/document",
            post(upload_document).layer(DefaultBodyLimit::max(state.max_document_bytes)),
        )
        .route("/api/v1/submit", post(submit))
        .route("/api/v1/history", get(history).delete(clear_history))
        .route("/api/v1/draft", get(draft))
        .route("/api/v1/config/api-key", get(api_key_status).post(set_api_key))
        .layer(cors)
        .with_state(state)
}

/// GET /api/v1/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "vaani-gateway" }))
}

/// GET /api/v1/session – current snapshot
async fn session_view(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.snapshot())
}

/// GET /api/v1/session/stream – Server-Sent Events, one `session` event per snapshot.
async fn session_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut views = state.session.subscribe();
    let stream = stream! {
        loop {
            let view = views.borrow_and_update().clone();
            match Event::default().event("session").json_data(&view) {
                Ok(event) => yield Ok(event),
                Err(e) => tracing::warn!(target: "vaani::gateway", "SSE encode failed: {}", e),
            }
            if views.changed().await.is_err() {
                break;
            }
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn dispatch(state: &AppState, event: SessionEvent) -> ApiResult<(StatusCode, Json<Value>)> {
    state.session.send(event)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

/// POST /api/v1/session/start
async fn start(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    dispatch(&state, SessionEvent::Start)
}

/// POST /api/v1/session/stop
async fn stop(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    dispatch(&state, SessionEvent::Stop)
}

/// POST /api/v1/session/mute – toggles
async fn toggle_mute(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    dispatch(&state, SessionEvent::ToggleMute)
}

/// POST /api/v1/session/interrupt
async fn interrupt(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    dispatch(&state, SessionEvent::Interrupt)
}

/// POST /api/v1/session/reset
async fn reset(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    dispatch(&state, SessionEvent::Reset)
}

/// POST /api/v1/session/readback
async fn read_back(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    dispatch(&state, SessionEvent::ReadBack)
}

#[derive(Deserialize)]
struct SetFieldRequest {
    value: String,
}

/// PUT /api/v1/form/:field – manual edit
async fn set_field(
    State(state): State<AppState>,
    Path(field): Path<String>,
    Json(body): Json<SetFieldRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let field = field.parse::<FormField>()?;
    dispatch(
        &state,
        SessionEvent::SetField {
            field,
            value: body.value,
        },
    )
}

/// POST /api/v1/document – raw image body; `Content-Type` names the format.
async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.is_empty() {
        return Err(GatewayError::BadRequest("document body is empty".to_string()));
    }
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Content-Type is required".to_string()))?;
    dispatch(
        &state,
        SessionEvent::ExtractDocument {
            image: body.to_vec(),
            mime_type,
        },
    )
}

/// POST /api/v1/submit – store the completed form, clear the draft, reset the session.
async fn submit(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Submission>)> {
    let form = state.session.snapshot().form;
    if !form.is_complete() {
        return Err(GatewayError::Conflict("form is incomplete".to_string()));
    }
    let submission = state.store.submit_form(&form, &form.summary()).await?;
    state.store.save_draft(&FormData::default()).await?;
    state.session.send(SessionEvent::Reset)?;
    info!("📨 Submission {} stored", submission.id);
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /api/v1/history – newest first
async fn history(State(state): State<AppState>) -> ApiResult<Json<Vec<Submission>>> {
    Ok(Json(state.store.get_all_submissions().await?))
}

/// DELETE /api/v1/history – drafts and submissions
async fn clear_history(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.store.clear_database().await?;
    Ok(Json(json!({ "cleared": true })))
}

/// GET /api/v1/draft – `null` when nothing is saved
async fn draft(State(state): State<AppState>) -> ApiResult<Json<Option<FormData>>> {
    Ok(Json(state.store.get_draft().await?))
}

/// GET /api/v1/config/api-key – status only, never the key itself
async fn api_key_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "configured": state.keys.has_key(),
        "prompt_pending": state.keys.prompt_pending(),
    }))
}

#[derive(Deserialize)]
struct SetApiKeyRequest {
    api_key: String,
}

/// POST /api/v1/config/api-key
async fn set_api_key(
    State(state): State<AppState>,
    Json(body): Json<SetApiKeyRequest>,
) -> ApiResult<Json<Value>> {
    if body.api_key.trim().is_empty() {
        return Err(GatewayError::BadRequest("API key cannot be empty".to_string()));
    }
    state.keys.set_key(&body.api_key)?;
    state.session.send(SessionEvent::KeyUpdated)?;
    tracing::info!(target: "vaani::config", "User API key configured successfully");
    Ok(Json(json!({ "success": true })))
}
