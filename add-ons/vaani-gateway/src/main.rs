//! vaani-gateway binary: load config, wire the session to real devices, serve `/api/v1`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vaani_core::{FormStore, KeyProvider, SledStore, UserKeyStore, VaaniConfig};
use vaani_gateway::{build_app, spawn_autosave, AppState};
use vaani_voice::{build_device_session, SessionEvent};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vaani-gateway] .env not loaded: {} (using system environment)", e);
    }

    let config = match VaaniConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Config load failed: {}", e);
            std::process::exit(1);
        }
    };

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "vaani-gateway.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    if let Err(e) = run(config).await {
        tracing::error!("❌ Gateway stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: VaaniConfig) -> Result<(), Box<dyn std::error::Error>> {
    let keys = Arc::new(UserKeyStore::open_default()?);
    if !keys.has_key() {
        warn!("Hint: set GEMINI_API_KEY in .env or POST /api/v1/config/api-key before starting a session.");
    }

    let store: Arc<dyn FormStore> = Arc::new(SledStore::open(&config.storage_path)?);
    let (controller, session) = build_device_session(&config, keys.clone())?;
    controller.spawn();

    match store.get_draft().await {
        Ok(Some(draft)) => {
            info!("📋 Restoring saved draft: {}", draft.summary());
            session.send(SessionEvent::LoadForm(draft))?;
        }
        Ok(None) => {}
        Err(e) => warn!("Draft load failed: {}", e),
    }

    spawn_autosave(
        session.clone(),
        store.clone(),
        Duration::from_millis(config.autosave_debounce_ms),
    );

    let app = build_app(AppState {
        session,
        store,
        keys,
        max_document_bytes: config.max_document_bytes,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;
    info!("🚀 Vaani gateway listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
