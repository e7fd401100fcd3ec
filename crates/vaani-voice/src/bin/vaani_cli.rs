//! Vaani CLI — talk to the form assistant from a terminal.
//!
//! Starts a live session on the default microphone and speaker, prints each transcript
//! line and form change as it happens, and stops on Ctrl+C or once the form is ready.
//! The API key comes from `user_config.toml`, `GEMINI_API_KEY` or `VAANI_API_KEY`.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vaani_core::{KeyProvider, Role, UserKeyStore, VaaniConfig};
use vaani_voice::{build_device_session, list_input_devices, SessionEvent, SessionState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = VaaniConfig::load()?;
    let keys = Arc::new(UserKeyStore::open_default()?);
    if !keys.has_key() {
        warn!("No API key found. Set GEMINI_API_KEY in .env or user_config.toml.");
        return Ok(());
    }

    if let Ok(devices) = list_input_devices() {
        info!("🎤 Input devices: {}", devices.join(", "));
    }

    let (controller, handle) = build_device_session(&config, keys)?;
    let task = controller.spawn();
    let mut view = handle.subscribe();
    handle.send(SessionEvent::Start)?;

    info!("Speak Hindi to fill the form. Press Ctrl+C to stop.\n");
    let mut printed = 0;
    let mut last_form = view.borrow().form.clone();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                for record in snapshot.transcripts.iter().skip(printed) {
                    let who = match record.role {
                        Role::User => "आप",
                        Role::Assistant => "वाणी",
                    };
                    println!("{}: {}", who, record.text);
                }
                printed = snapshot.transcripts.len();
                if snapshot.form != last_form {
                    println!("📝 {}", snapshot.form.summary());
                    last_form = snapshot.form.clone();
                }
                match snapshot.state {
                    SessionState::ReadyToSubmit => {
                        println!("✅ फॉर्म तैयार है: {}", snapshot.form.summary());
                        break;
                    }
                    SessionState::Error(ref e) => {
                        warn!("Session error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.send(SessionEvent::Stop)?;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    task.abort();
    Ok(())
}
