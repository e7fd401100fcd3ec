//! Live session transport: one WebSocket per conversation.
//!
//! `connect` returns immediately with a [`LiveTransport`] whose `send` only queues;
//! a spawned task opens the socket, writes the setup message first, then pumps the
//! outbound queue and forwards every inbound message to the session queue as
//! `SessionEvent::Transport { session, event }`.

use crate::error::VoiceResult;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::SessionEvent;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// What the remote side did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMessage),
    Error(String),
    Closed,
}

/// Outbound half of an open conversation.
pub trait LiveTransport: Send + Sync {
    /// Queue a message. Never blocks; fails only once the connection is gone.
    fn send(&self, message: ClientMessage) -> VoiceResult<()>;

    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub api_key: String,
    pub setup: ClientMessage,
    /// Session id echoed on every event from this connection.
    pub session: u64,
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> VoiceResult<Box<dyn LiveTransport>>;
}

enum Outbound {
    Message(ClientMessage),
    Close,
}

struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl LiveTransport for ChannelTransport {
    fn send(&self, message: ClientMessage) -> VoiceResult<()> {
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| crate::error::VoiceError::Transport("connection closed".to_string()))
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Gemini Live over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    url: String,
}

impl GeminiLiveConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> VoiceResult<Box<dyn LiveTransport>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = request.session;
        tx.send(Outbound::Message(request.setup))
            .map_err(|_| crate::error::VoiceError::Transport("connection closed".to_string()))?;

        let url = format!("{}?key={}", self.url, request.api_key);
        info!("🔌 Opening live session {} ({})", session, self.url);
        tokio::spawn(run_connection(url, session, rx, events));

        Ok(Box::new(ChannelTransport { tx }))
    }
}

async fn run_connection(
    url: String,
    session: u64,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(SessionEvent::Transport { session, event });
    };

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!("❌ Live connect failed: {}", e);
            emit(TransportEvent::Error(e.to_string()));
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Message(msg)) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("Dropping unserializable message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        error!("❌ Live send failed: {}", e);
                        emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.close().await;
                    info!("🔌 Live session {} closed locally", session);
                    emit(TransportEvent::Closed);
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => forward(text.as_bytes(), &emit),
                Some(Ok(Message::Binary(bytes))) => forward(&bytes, &emit),
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(f) if f.code != CloseCode::Normal && !f.reason.is_empty() => {
                            error!("❌ Live session {} closed by server: {} ({})", session, f.reason, f.code);
                            emit(TransportEvent::Error(f.reason.to_string()));
                        }
                        _ => {
                            info!("🔌 Live session {} closed by server", session);
                            emit(TransportEvent::Closed);
                        }
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("❌ Live receive failed: {}", e);
                    emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    emit(TransportEvent::Closed);
                    break;
                }
            },
        }
    }
}

fn forward(bytes: &[u8], emit: &impl Fn(TransportEvent)) {
    match ServerMessage::parse(bytes) {
        Ok(msg) => emit(TransportEvent::Message(msg)),
        Err(e) => debug!(target: "vaani::live", "ignoring unparseable frame: {}", e),
    }
}
