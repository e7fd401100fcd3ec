//! **SessionController**: one live Hindi conversation that fills the form.
//!
//! Every input (user intents, microphone blocks, transport messages, playback
//! completions, finished background calls) is a [`SessionEvent`] on one unbounded
//! queue, drained by a single task. After each event the controller publishes a
//! [`SessionView`] on a `watch` channel for the presentation layer.
//!
//! ```text
//!   Start ──► Connecting ──setupComplete──► Listening ◄──playback drained── Speaking
//!                │                             │  ▲                            ▲
//!                │                             │  └──── interrupt / mute ──────┤
//!                │                             └────────── audio chunk ────────┘
//!                └── transport error ──► Error        closing phrase ──► ReadyToSubmit
//! ```

use crate::audio::{CaptureConfig, CpalMicSource, MicGuard, MicSource};
use crate::codec::{decode_pcm16, encode_pcm16};
use crate::error::{VoiceError, VoiceResult};
use crate::extraction::{DocumentExtractor, GeminiExtractor};
use crate::live::{ConnectRequest, GeminiLiveConnector, LiveConnector, LiveTransport, TransportEvent};
use crate::output::{NullOutput, RodioOutput};
use crate::playback::{AudioOutput, PlaybackHandle, PlaybackScheduler};
use crate::protocol::{ClientMessage, FunctionCall, InlineData, ServerContent, ServerMessage, UPDATE_FORM_FIELD};
use crate::rest::GeminiRest;
use crate::speech::{read_back_prompt, GeminiSpeech, SpeechBackend};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vaani_core::{FormData, FormField, KeyProvider, Role, TranscriptionRecord, VaaniConfig};

/// Substring of the remote error raised for an unusable API key.
pub const KEY_NOT_FOUND_ERROR: &str = "Requested entity was not found";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Speaking,
    Extracting,
    Error(String),
    /// Form complete and confirmed by the assistant; waiting for the user to submit.
    ReadyToSubmit,
}

impl SessionState {
    fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Listening | SessionState::Speaking
        )
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    // user intents
    Start,
    Stop,
    ToggleMute,
    /// Barge-in: the user wants the assistant to stop talking.
    Interrupt,
    SetField { field: FormField, value: String },
    LoadForm(FormData),
    ExtractDocument { image: Vec<u8>, mime_type: String },
    ReadBack,
    Reset,
    /// A new API key was stored; the pending credential prompt is answered.
    KeyUpdated,

    // sources
    MicBlock(Vec<f32>),
    Transport { session: u64, event: TransportEvent },
    PlaybackEnded(PlaybackHandle),
    ExtractionFinished(Result<FormData, String>),
    ReadBackReady(Result<Option<String>, String>),
}

/// Snapshot published after every handled event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub muted: bool,
    pub playing: bool,
    pub form: FormData,
    pub transcripts: Vec<TranscriptionRecord>,
    pub key_prompt_pending: bool,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub live_model: String,
    pub voice_name: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub closing_phrases: Vec<String>,
}

impl SessionSettings {
    pub fn from_config(config: &VaaniConfig) -> Self {
        Self {
            live_model: config.live_model.clone(),
            voice_name: config.voice_name.clone(),
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            closing_phrases: config.closing_phrases.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&VaaniConfig::default())
    }
}

/// Collaborators behind the controller's seams.
pub struct SessionDeps {
    pub keys: Arc<dyn KeyProvider>,
    pub connector: Arc<dyn LiveConnector>,
    pub output: Arc<dyn AudioOutput>,
    pub mic: Arc<dyn MicSource>,
    pub speech: Arc<dyn SpeechBackend>,
    pub extractor: Arc<dyn DocumentExtractor>,
}

/// The session queue. Create it first: devices need the sender before the controller exists.
pub fn session_channel() -> (
    mpsc::UnboundedSender<SessionEvent>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    mpsc::unbounded_channel()
}

/// Clonable front for the presentation layer.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub fn send(&self, event: SessionEvent) -> VoiceResult<()> {
        self.tx
            .send(event)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }
}

pub struct SessionController {
    settings: SessionSettings,
    deps: SessionDeps,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    view_tx: watch::Sender<SessionView>,

    state: SessionState,
    muted: bool,
    form: FormData,
    transcripts: Vec<TranscriptionRecord>,
    key_prompt_pending: bool,

    /// Id of the live connection whose events are accepted.
    session: Option<u64>,
    last_session: u64,
    transport: Option<Box<dyn LiveTransport>>,
    mic: Option<MicGuard>,
    scheduler: PlaybackScheduler,
    input_turn: String,
    output_turn: String,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        deps: SessionDeps,
        tx: mpsc::UnboundedSender<SessionEvent>,
        rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> (Self, SessionHandle) {
        let (view_tx, view_rx) = watch::channel(SessionView::default());
        let scheduler = PlaybackScheduler::new(deps.output.clone());
        let handle = SessionHandle {
            tx: tx.clone(),
            view: view_rx,
        };
        let controller = Self {
            settings,
            deps,
            tx,
            rx,
            view_tx,
            state: SessionState::Idle,
            muted: false,
            form: FormData::default(),
            transcripts: Vec::new(),
            key_prompt_pending: false,
            session: None,
            last_session: 0,
            transport: None,
            mic: None,
            scheduler,
            input_turn: String::new(),
            output_turn: String::new(),
        };
        (controller, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue for the life of the process.
    pub async fn run(mut self) {
        info!("🗣️ Session controller running");
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        self.teardown();
        info!("🗣️ Session controller stopped");
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start => self.start().await,
            SessionEvent::Stop => self.stop(),
            SessionEvent::ToggleMute => self.toggle_mute(),
            SessionEvent::Interrupt => self.interrupt(),
            SessionEvent::SetField { field, value } => self.form.set(field, value),
            SessionEvent::LoadForm(form) => self.form = form,
            SessionEvent::ExtractDocument { image, mime_type } => {
                self.extract_document(image, mime_type)
            }
            SessionEvent::ReadBack => self.read_back(),
            SessionEvent::Reset => self.reset(),
            SessionEvent::KeyUpdated => self.key_prompt_pending = false,
            SessionEvent::MicBlock(samples) => self.forward_mic(&samples),
            SessionEvent::Transport { session, event } => {
                if self.session == Some(session) {
                    self.on_transport(event);
                } else {
                    debug!(target: "vaani::session", "ignoring event from stale session {}", session);
                }
            }
            SessionEvent::PlaybackEnded(handle) => self.on_playback_ended(handle),
            SessionEvent::ExtractionFinished(result) => self.on_extraction_finished(result),
            SessionEvent::ReadBackReady(result) => self.on_read_back_ready(result),
        }
        self.publish();
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state.clone(),
            muted: self.muted,
            playing: !self.scheduler.is_idle(),
            form: self.form.clone(),
            transcripts: self.transcripts.clone(),
            key_prompt_pending: self.key_prompt_pending,
        }
    }

    fn publish(&self) {
        let next = self.view();
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    async fn start(&mut self) {
        if self.state == SessionState::ReadyToSubmit {
            info!("Form is ready to submit; start ignored");
            return;
        }
        if self.session.is_some() || self.state.is_live() || self.state == SessionState::Extracting {
            warn!("Start requested while a session is active ({:?}); ignored", self.state);
            return;
        }
        let Some(api_key) = self.deps.keys.api_key() else {
            self.request_key();
            self.state = SessionState::Error("API key missing".to_string());
            return;
        };
        self.key_prompt_pending = false;

        self.last_session += 1;
        let session = self.last_session;
        self.input_turn.clear();
        self.output_turn.clear();
        self.state = SessionState::Connecting;

        let request = ConnectRequest {
            api_key,
            setup: ClientMessage::setup(&self.settings.live_model, &self.settings.voice_name),
            session,
        };
        let connector = self.deps.connector.clone();
        match connector.connect(request, self.tx.clone()).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.session = Some(session);
                info!("📡 Live session {} connecting", session);
            }
            Err(e) => {
                error!("❌ Live session {} failed to connect: {}", session, e);
                self.state = SessionState::Error(e.to_string());
            }
        }
    }

    fn stop(&mut self) {
        self.teardown();
        if self.state != SessionState::ReadyToSubmit {
            self.state = SessionState::Idle;
        }
        info!("⏹️ Session stopped");
    }

    fn reset(&mut self) {
        self.teardown();
        self.transcripts.clear();
        self.input_turn.clear();
        self.output_turn.clear();
        self.form.clear();
        self.muted = false;
        self.state = SessionState::Idle;
        info!("🔄 Session reset");
    }

    /// Drop the connection, the microphone and all scheduled audio.
    fn teardown(&mut self) {
        self.close_connection();
        self.scheduler.stop_all();
    }

    fn close_connection(&mut self) {
        self.session = None;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mic) = self.mic.take() {
            mic.release();
        }
    }

    fn request_key(&mut self) {
        self.deps.keys.prompt_for_key();
        self.key_prompt_pending = true;
    }

    // ------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------

    fn forward_mic(&mut self, samples: &[f32]) {
        if !matches!(self.state, SessionState::Listening | SessionState::Speaking) {
            return;
        }
        let Some(transport) = &self.transport else {
            return;
        };
        let audio = encode_pcm16(samples, self.settings.input_sample_rate);
        if let Err(e) = transport.send(ClientMessage::audio(audio)) {
            debug!(target: "vaani::session", "mic block dropped: {}", e);
        }
    }

    fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        if self.muted {
            self.silence();
        }
        info!("🔇 Output {}", if self.muted { "muted" } else { "unmuted" });
    }

    fn interrupt(&mut self) {
        self.silence();
        info!("✋ Interrupted");
    }

    fn silence(&mut self) {
        self.scheduler.stop_all();
        if self.state == SessionState::Speaking {
            self.state = SessionState::Listening;
        }
    }

    fn play_chunk(&mut self, inline: &InlineData) {
        if self.muted {
            debug!(target: "vaani::session", "muted; dropping audio chunk");
            return;
        }
        let rate = inline.sample_rate().unwrap_or(self.settings.output_sample_rate);
        let buffer = match decode_pcm16(&inline.data, rate, 1) {
            Ok(b) => b,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                return;
            }
        };
        if let Err(e) = self.scheduler.schedule(buffer) {
            warn!("Failed to schedule audio chunk: {}", e);
            return;
        }
        if self.state == SessionState::Listening {
            self.state = SessionState::Speaking;
        }
    }

    fn on_playback_ended(&mut self, handle: PlaybackHandle) {
        if self.scheduler.on_ended(handle) && self.state == SessionState::Speaking {
            self.state = SessionState::Listening;
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Error(message) => {
                error!("❌ Live session error: {}", message);
                self.teardown();
                if message.contains(KEY_NOT_FOUND_ERROR) {
                    self.request_key();
                }
                self.state = SessionState::Error(message);
            }
            TransportEvent::Closed => {
                self.teardown();
                if self.state != SessionState::ReadyToSubmit {
                    self.state = SessionState::Idle;
                }
                info!("🔌 Live session closed");
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if message.setup_complete.is_some() {
            self.on_setup_complete();
        }
        if let Some(content) = message.server_content {
            self.on_server_content(content);
        }
        if let Some(tool_call) = message.tool_call {
            for call in tool_call.function_calls {
                self.on_function_call(call);
            }
        }
    }

    fn on_setup_complete(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        match self.deps.mic.acquire(self.tx.clone()) {
            Ok(guard) => {
                self.mic = Some(guard);
                self.state = SessionState::Listening;
                info!("🎙️ Listening");
            }
            Err(e) => {
                error!("❌ Microphone unavailable: {}", e);
                self.teardown();
                self.state = SessionState::Error(e.to_string());
            }
        }
    }

    fn on_server_content(&mut self, content: ServerContent) {
        if content.interrupted {
            self.silence();
        }
        if let Some(turn) = &content.model_turn {
            for part in &turn.parts {
                if let Some(inline) = part.inline_data.as_ref().filter(|d| d.is_audio()) {
                    self.play_chunk(inline);
                }
            }
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            self.input_turn.push_str(&text);
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            self.output_turn.push_str(&text);
        }
        if content.turn_complete {
            self.complete_turn();
        }
    }

    fn complete_turn(&mut self) {
        let input = std::mem::take(&mut self.input_turn);
        let output = std::mem::take(&mut self.output_turn);

        if !input.trim().is_empty() {
            self.transcripts
                .push(TranscriptionRecord::new(Role::User, input.trim()));
        }
        if !output.trim().is_empty() {
            self.transcripts
                .push(TranscriptionRecord::new(Role::Assistant, output.trim()));
            if self.form.is_complete() && self.is_closing(&output) {
                self.finish_conversation();
            }
        }
    }

    fn is_closing(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.settings
            .closing_phrases
            .iter()
            .any(|p| text.contains(&p.to_lowercase()))
    }

    /// Conversation is over: stop listening, keep whatever audio is still playing.
    fn finish_conversation(&mut self) {
        self.close_connection();
        self.state = SessionState::ReadyToSubmit;
        info!("✅ Form complete, ready to submit: {}", self.form.summary());
    }

    fn on_function_call(&mut self, call: FunctionCall) {
        let response = if call.name == UPDATE_FORM_FIELD {
            match self.apply_field_update(&call.args) {
                Ok(()) => json!({ "result": "ok" }),
                Err(message) => {
                    warn!("Rejected {} call: {}", call.name, message);
                    json!({ "error": message })
                }
            }
        } else {
            warn!("Unknown function call: {}", call.name);
            json!({ "error": format!("unknown function: {}", call.name) })
        };

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.send(ClientMessage::tool_ack(&call.id, &call.name, response)) {
                debug!(target: "vaani::session", "tool ack dropped: {}", e);
            }
        }
    }

    fn apply_field_update(&mut self, args: &Value) -> Result<(), String> {
        let name = args
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing field".to_string())?;
        let field = name.parse::<FormField>().map_err(|e| e.to_string())?;
        let value = match args.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        info!("📝 {} = {}", field, value);
        self.form.set(field, value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // One-shot remote calls
    // ------------------------------------------------------------------

    fn extract_document(&mut self, image: Vec<u8>, mime_type: String) {
        if !matches!(self.state, SessionState::Idle | SessionState::Error(_)) {
            warn!("Document extraction requested in {:?}; ignored", self.state);
            return;
        }
        if !self.deps.keys.has_key() {
            self.request_key();
            self.state = SessionState::Error("API key missing".to_string());
            return;
        }
        self.state = SessionState::Extracting;
        info!("📄 Extracting fields from document ({}, {} bytes)", mime_type, image.len());

        let extractor = self.deps.extractor.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = extractor
                .extract(&image, &mime_type)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(SessionEvent::ExtractionFinished(result));
        });
    }

    fn on_extraction_finished(&mut self, result: Result<FormData, String>) {
        if self.state != SessionState::Extracting {
            debug!(target: "vaani::session", "extraction result after state change; ignored");
            return;
        }
        match result {
            Ok(form) => {
                self.form = form;
                info!("📄 Document fields applied: {}", self.form.summary());
            }
            Err(e) => warn!("Document extraction failed: {}", e),
        }
        self.state = SessionState::Idle;
    }

    fn read_back(&mut self) {
        if !self.deps.keys.has_key() {
            warn!("Read-back needs an API key");
            self.request_key();
            return;
        }
        let text = read_back_prompt(&self.form);
        let speech = self.deps.speech.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = speech.synthesize(&text).await.map_err(|e| e.to_string());
            let _ = tx.send(SessionEvent::ReadBackReady(result));
        });
    }

    fn on_read_back_ready(&mut self, result: Result<Option<String>, String>) {
        let data = match result {
            Ok(Some(data)) => data,
            Ok(None) => {
                info!("Read-back produced no audio");
                return;
            }
            Err(e) => {
                warn!("Read-back failed: {}", e);
                return;
            }
        };
        let scheduled = decode_pcm16(&data, self.settings.output_sample_rate, 1)
            .and_then(|buffer| self.scheduler.schedule(buffer));
        match scheduled {
            Ok(chunk) => info!("🔊 Reading form back ({:.1}s)", chunk.end - chunk.start),
            Err(e) => warn!("Read-back playback failed: {}", e),
        }
    }
}

/// Wire a controller to the real devices and the Gemini endpoints from `config`.
///
/// Falls back to [`NullOutput`] when no speaker can be opened.
pub fn build_device_session(
    config: &VaaniConfig,
    keys: Arc<dyn KeyProvider>,
) -> VoiceResult<(SessionController, SessionHandle)> {
    let (tx, rx) = session_channel();
    let output: Arc<dyn AudioOutput> = match RodioOutput::new(tx.clone()) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            warn!(target: "vaani::voice", "No audio output ({}); running headless", e);
            Arc::new(NullOutput::new(tx.clone()))
        }
    };
    let mic = CpalMicSource::new(CaptureConfig {
        sample_rate: config.input_sample_rate,
        block_size: config.capture_block_size,
    });
    let rest = GeminiRest::new(config.api_base_url.clone(), keys.clone())?;
    let deps = SessionDeps {
        keys,
        connector: Arc::new(GeminiLiveConnector::new(config.live_url.clone())),
        output,
        mic: Arc::new(mic),
        speech: Arc::new(GeminiSpeech::new(
            rest.clone(),
            config.speech_model.clone(),
            config.voice_name.clone(),
        )),
        extractor: Arc::new(GeminiExtractor::new(rest, config.extraction_model.clone())),
    };
    Ok(SessionController::new(
        SessionSettings::from_config(config),
        deps,
        tx,
        rx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ModelTurn, ServerPart, ToolCall, Transcription};
    use crate::testing::{FakeConnector, FakeExtractor, FakeMic, FakeOutput, FakeSpeech, FakeWire};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use vaani_core::StaticKeyProvider;

    struct Rig {
        ctrl: SessionController,
        handle: SessionHandle,
        output: Arc<FakeOutput>,
        wire: Arc<FakeWire>,
        mic: Arc<FakeMic>,
        keys: Arc<StaticKeyProvider>,
    }

    fn rig_with(key: Option<&str>, extractor: FakeExtractor, speech_audio: Option<String>) -> Rig {
        let (tx, rx) = session_channel();
        let output = Arc::new(FakeOutput::default());
        let connector = Arc::new(FakeConnector::default());
        let wire = connector.wire.clone();
        let mic = Arc::new(FakeMic::default());
        let keys = Arc::new(StaticKeyProvider::new(key));
        let deps = SessionDeps {
            keys: keys.clone(),
            connector,
            output: output.clone(),
            mic: mic.clone(),
            speech: Arc::new(FakeSpeech {
                audio: speech_audio,
                fail: false,
            }),
            extractor: Arc::new(extractor),
        };
        let (ctrl, handle) = SessionController::new(SessionSettings::default(), deps, tx, rx);
        Rig {
            ctrl,
            handle,
            output,
            wire,
            mic,
            keys,
        }
    }

    fn rig() -> Rig {
        rig_with(
            Some("test-key"),
            FakeExtractor::returning(Ok(FormData::default())),
            None,
        )
    }

    fn audio_secs(secs: f64) -> String {
        encode_pcm16(&vec![0.0; (secs * 24000.0) as usize], 24000).data
    }

    fn content(c: ServerContent) -> ServerMessage {
        ServerMessage {
            server_content: Some(c),
            ..Default::default()
        }
    }

    fn audio_message(secs: f64) -> ServerMessage {
        content(ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![ServerPart {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: "audio/pcm;rate=24000".to_string(),
                        data: audio_secs(secs),
                    }),
                }],
            }),
            ..Default::default()
        })
    }

    fn transcript(input: Option<&str>, output: Option<&str>, turn_complete: bool) -> ServerMessage {
        content(ServerContent {
            input_transcription: input.map(|t| Transcription { text: Some(t.to_string()) }),
            output_transcription: output.map(|t| Transcription { text: Some(t.to_string()) }),
            turn_complete,
            ..Default::default()
        })
    }

    fn tool_call(id: &str, name: &str, args: Value) -> ServerMessage {
        ServerMessage {
            tool_call: Some(ToolCall {
                function_calls: vec![FunctionCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    args,
                }],
            }),
            ..Default::default()
        }
    }

    impl Rig {
        async fn send(&mut self, event: SessionEvent) {
            self.ctrl.handle(event).await;
        }

        async fn server(&mut self, message: ServerMessage) {
            let session = self.ctrl.last_session;
            self.send(SessionEvent::Transport {
                session,
                event: TransportEvent::Message(message),
            })
            .await;
        }

        async fn listening_after_start(&mut self) {
            self.server(ServerMessage {
                setup_complete: Some(json!({})),
                ..Default::default()
            })
            .await;
        }

        async fn listening(&mut self) {
            self.send(SessionEvent::Start).await;
            self.listening_after_start().await;
            assert_eq!(self.ctrl.state, SessionState::Listening);
        }

        /// Handle the next event queued by a background task.
        async fn pump_one(&mut self) {
            let event = tokio::time::timeout(Duration::from_secs(2), self.ctrl.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("queue closed");
            self.ctrl.handle(event).await;
        }
    }

    #[tokio::test]
    async fn start_without_key_errors_and_prompts() {
        let mut r = rig_with(None, FakeExtractor::returning(Ok(FormData::default())), None);
        r.send(SessionEvent::Start).await;

        assert!(matches!(r.ctrl.state, SessionState::Error(_)));
        assert!(r.keys.was_prompted());
        assert!(r.handle.snapshot().key_prompt_pending);
        assert!(r.wire.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn setup_complete_acquires_mic_and_listens() {
        let mut r = rig();
        r.send(SessionEvent::Start).await;
        assert_eq!(r.ctrl.state, SessionState::Connecting);
        assert!(matches!(r.wire.sent()[0], ClientMessage::Setup(_)));
        assert!(!r.mic.held());

        r.listening().await;
        assert!(r.mic.held());
        assert_eq!(r.handle.snapshot().state, SessionState::Listening);
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let mut r = rig();
        r.listening().await;
        r.send(SessionEvent::Start).await;
        assert_eq!(r.wire.requests.lock().unwrap().len(), 1);
        assert_eq!(r.ctrl.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn mic_blocks_are_forwarded_only_while_listening() {
        let mut r = rig();
        r.send(SessionEvent::Start).await;
        r.send(SessionEvent::MicBlock(vec![0.1; 4096])).await;
        assert_eq!(r.wire.audio_count(), 0);

        r.listening_after_start().await;
        r.send(SessionEvent::MicBlock(vec![0.1; 4096])).await;
        assert_eq!(r.wire.audio_count(), 1);
    }

    #[tokio::test]
    async fn failed_mic_send_is_swallowed() {
        let mut r = rig();
        r.listening().await;

        r.wire.fail_sends.store(true, Ordering::SeqCst);
        r.send(SessionEvent::MicBlock(vec![0.1; 4096])).await;
        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert_eq!(r.wire.audio_count(), 0);

        r.wire.fail_sends.store(false, Ordering::SeqCst);
        r.send(SessionEvent::MicBlock(vec![0.1; 4096])).await;
        assert_eq!(r.wire.audio_count(), 1);
        assert!(r.mic.held());
    }

    #[tokio::test]
    async fn key_update_clears_pending_prompt() {
        let mut r = rig_with(None, FakeExtractor::returning(Ok(FormData::default())), None);
        r.send(SessionEvent::Start).await;
        assert!(r.handle.snapshot().key_prompt_pending);

        r.send(SessionEvent::KeyUpdated).await;
        assert!(!r.handle.snapshot().key_prompt_pending);
    }

    #[tokio::test]
    async fn audio_switches_to_speaking_until_drained() {
        let mut r = rig();
        r.listening().await;
        r.server(audio_message(0.5)).await;
        r.server(audio_message(0.5)).await;
        assert_eq!(r.ctrl.state, SessionState::Speaking);
        assert!(r.handle.snapshot().playing);

        let played = r.output.played();
        r.send(SessionEvent::PlaybackEnded(played[0].0)).await;
        assert_eq!(r.ctrl.state, SessionState::Speaking);
        r.send(SessionEvent::PlaybackEnded(played[1].0)).await;
        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert!(!r.handle.snapshot().playing);
    }

    #[tokio::test]
    async fn chunks_are_scheduled_gaplessly() {
        let mut r = rig();
        r.listening().await;

        r.output.set_now(0.0);
        r.server(audio_message(2.0)).await;
        r.output.set_now(0.5);
        r.server(audio_message(1.5)).await;
        r.output.set_now(5.0);
        r.server(audio_message(1.0)).await;

        let starts: Vec<f64> = r.output.played().iter().map(|p| p.1).collect();
        assert_eq!(starts, vec![0.0, 2.0, 5.0]);
    }

    #[tokio::test]
    async fn undecodable_chunk_is_dropped() {
        let mut r = rig();
        r.listening().await;
        r.server(content(ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![ServerPart {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: "audio/pcm;rate=24000".to_string(),
                        data: "@@not base64@@".to_string(),
                    }),
                }],
            }),
            ..Default::default()
        }))
        .await;

        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert!(r.output.played().is_empty());
        assert!(!r.handle.snapshot().playing);
    }

    #[tokio::test]
    async fn playback_failure_keeps_listening() {
        let mut r = rig();
        r.listening().await;
        r.output.fail_play.store(true, Ordering::SeqCst);
        r.server(audio_message(1.0)).await;

        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert!(r.ctrl.scheduler.is_idle());
        assert!(!r.handle.snapshot().playing);

        r.output.fail_play.store(false, Ordering::SeqCst);
        r.server(audio_message(1.0)).await;
        assert_eq!(r.ctrl.state, SessionState::Speaking);
    }

    #[tokio::test]
    async fn muted_audio_is_discarded_not_replayed() {
        let mut r = rig();
        r.listening().await;
        r.send(SessionEvent::ToggleMute).await;
        r.server(audio_message(1.0)).await;
        assert!(r.output.played().is_empty());
        assert_eq!(r.ctrl.state, SessionState::Listening);

        r.send(SessionEvent::ToggleMute).await;
        assert!(r.output.played().is_empty());
        assert!(!r.handle.snapshot().muted);
    }

    #[tokio::test]
    async fn muting_while_speaking_stops_playback() {
        let mut r = rig();
        r.listening().await;
        r.server(audio_message(1.0)).await;
        r.send(SessionEvent::ToggleMute).await;

        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert_eq!(r.output.stopped().len(), 1);
        assert_eq!(r.ctrl.scheduler.cursor(), 0.0);
    }

    #[tokio::test]
    async fn barge_in_from_either_side_stops_playback() {
        let mut r = rig();
        r.listening().await;
        r.server(audio_message(1.0)).await;
        r.send(SessionEvent::Interrupt).await;
        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert!(r.ctrl.scheduler.is_idle());

        r.server(audio_message(1.0)).await;
        r.server(content(ServerContent {
            interrupted: true,
            ..Default::default()
        }))
        .await;
        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert_eq!(r.output.stopped().len(), 2);
        assert_eq!(r.ctrl.scheduler.cursor(), 0.0);
    }

    #[tokio::test]
    async fn field_update_overwrites_and_acks_once() {
        let mut r = rig();
        r.listening().await;

        r.server(tool_call("c1", UPDATE_FORM_FIELD, json!({"field": "city", "value": "Mumbai"}))).await;
        assert_eq!(r.ctrl.form.city, "Mumbai");
        assert_eq!(r.wire.tool_acks().len(), 1);

        r.server(tool_call("c2", UPDATE_FORM_FIELD, json!({"field": "city", "value": "Delhi"}))).await;
        assert_eq!(r.ctrl.form.city, "Delhi");
        let acks = r.wire.tool_acks();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[1]["functionResponses"][0]["id"], "c2");
        assert_eq!(acks[1]["functionResponses"][0]["response"]["result"], "ok");
    }

    #[tokio::test]
    async fn unknown_field_or_function_is_acked_with_error() {
        let mut r = rig();
        r.listening().await;
        r.ctrl.form.set(FormField::City, "Pune");

        r.server(tool_call("c1", UPDATE_FORM_FIELD, json!({"field": "age", "value": "30"}))).await;
        r.server(tool_call("c2", "deleteForm", json!({}))).await;

        assert_eq!(r.ctrl.form, FormData::new("", "", "Pune"));
        let acks = r.wire.tool_acks();
        assert_eq!(acks.len(), 2);
        assert!(acks[0]["functionResponses"][0]["response"]["error"].is_string());
        assert!(acks[1]["functionResponses"][0]["response"]["error"].is_string());
    }

    #[tokio::test]
    async fn turn_complete_flushes_and_clears_accumulators() {
        let mut r = rig();
        r.listening().await;
        r.server(transcript(Some("मेरा नाम "), None, false)).await;
        r.server(transcript(Some("अनीता है"), Some("धन्यवाद"), false)).await;
        r.server(transcript(None, None, true)).await;

        let records = &r.ctrl.transcripts;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].role, Role::User);
        assert_eq!(records[0].text, "मेरा नाम अनीता है");
        assert_eq!(records[1].role, Role::Assistant);
        assert!(r.ctrl.input_turn.is_empty());
        assert!(r.ctrl.output_turn.is_empty());

        // an empty turn adds nothing
        r.server(transcript(None, None, true)).await;
        assert_eq!(r.ctrl.transcripts.len(), 2);
    }

    #[tokio::test]
    async fn closing_phrase_on_complete_form_finishes() {
        let mut r = rig();
        r.listening().await;
        r.send(SessionEvent::LoadForm(FormData::new("Anita", "01/01/1990", "Pune"))).await;

        r.server(transcript(None, Some("Dhanya"), false)).await;
        r.server(transcript(None, Some("vaad, aapka form jama ho gaya hai."), true)).await;

        assert_eq!(r.ctrl.transcripts.len(), 1);
        assert_eq!(
            r.ctrl.transcripts[0].text,
            "Dhanyavaad, aapka form jama ho gaya hai."
        );
        assert_eq!(r.ctrl.state, SessionState::ReadyToSubmit);
        assert!(!r.mic.held());
        assert_eq!(r.wire.closes.load(Ordering::SeqCst), 1);

        // closing the socket afterwards keeps the form ready
        r.send(SessionEvent::Stop).await;
        assert_eq!(r.ctrl.state, SessionState::ReadyToSubmit);
        r.send(SessionEvent::Start).await;
        assert_eq!(r.wire.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closing_phrase_on_incomplete_form_keeps_listening() {
        let mut r = rig();
        r.listening().await;
        r.send(SessionEvent::SetField {
            field: FormField::FullName,
            value: "Anita".to_string(),
        })
        .await;
        r.server(transcript(None, Some("फॉर्म जमा हो गया"), true)).await;
        assert_eq!(r.ctrl.state, SessionState::Listening);
        assert!(r.mic.held());
    }

    #[tokio::test]
    async fn key_error_tears_down_and_prompts() {
        let mut r = rig();
        r.listening().await;
        r.server(audio_message(1.0)).await;

        let session = r.ctrl.last_session;
        r.send(SessionEvent::Transport {
            session,
            event: TransportEvent::Error("Requested entity was not found.".to_string()),
        })
        .await;

        assert!(matches!(r.ctrl.state, SessionState::Error(_)));
        assert!(!r.mic.held());
        assert!(r.ctrl.scheduler.is_idle());
        assert!(r.keys.was_prompted());
        assert!(r.handle.snapshot().key_prompt_pending);
    }

    #[tokio::test]
    async fn events_from_stale_sessions_are_ignored() {
        let mut r = rig();
        r.listening().await;
        r.send(SessionEvent::Stop).await;
        assert_eq!(r.ctrl.state, SessionState::Idle);

        let old = r.ctrl.last_session;
        r.send(SessionEvent::Transport {
            session: old,
            event: TransportEvent::Error("late failure".to_string()),
        })
        .await;
        assert_eq!(r.ctrl.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn remote_close_returns_to_idle() {
        let mut r = rig();
        r.listening().await;
        let session = r.ctrl.last_session;
        r.send(SessionEvent::Transport {
            session,
            event: TransportEvent::Closed,
        })
        .await;
        assert_eq!(r.ctrl.state, SessionState::Idle);
        assert!(!r.mic.held());
    }

    #[tokio::test]
    async fn mic_failure_is_an_error() {
        let mut r = rig();
        r.mic.fail.store(true, Ordering::SeqCst);
        r.send(SessionEvent::Start).await;
        r.listening_after_start().await;
        assert!(matches!(r.ctrl.state, SessionState::Error(_)));
        assert_eq!(r.wire.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn document_extraction_overwrites_fields() {
        let extracted = FormData::new("Suresh Kumar", "12/03/1985", "Lucknow");
        let mut r = rig_with(Some("k"), FakeExtractor::returning(Ok(extracted.clone())), None);
        r.ctrl.form.set(FormField::City, "Pune");

        r.send(SessionEvent::ExtractDocument {
            image: vec![1, 2, 3],
            mime_type: "image/jpeg".to_string(),
        })
        .await;
        assert_eq!(r.ctrl.state, SessionState::Extracting);

        r.pump_one().await;
        assert_eq!(r.ctrl.state, SessionState::Idle);
        assert_eq!(r.ctrl.form, extracted);
    }

    #[tokio::test]
    async fn failed_extraction_leaves_form_and_returns_to_idle() {
        let mut r = rig_with(
            Some("k"),
            FakeExtractor::returning(Err(VoiceError::Extraction("bad json".to_string()))),
            None,
        );
        r.ctrl.form.set(FormField::FullName, "Anita");
        r.send(SessionEvent::ExtractDocument {
            image: vec![0],
            mime_type: "image/png".to_string(),
        })
        .await;
        r.pump_one().await;

        assert_eq!(r.ctrl.state, SessionState::Idle);
        assert_eq!(r.ctrl.form.full_name, "Anita");
    }

    #[tokio::test]
    async fn extraction_is_refused_during_a_live_session() {
        let mut r = rig();
        r.listening().await;
        r.send(SessionEvent::ExtractDocument {
            image: vec![0],
            mime_type: "image/png".to_string(),
        })
        .await;
        assert_eq!(r.ctrl.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn read_back_plays_synthesized_audio() {
        let mut r = rig_with(
            Some("k"),
            FakeExtractor::returning(Ok(FormData::default())),
            Some(audio_secs(1.0)),
        );
        r.ctrl.form = FormData::new("Anita", "01/01/1990", "Pune");
        r.send(SessionEvent::ReadBack).await;
        r.pump_one().await;

        assert_eq!(r.output.played().len(), 1);
        assert!(r.handle.snapshot().playing);
        assert_eq!(r.ctrl.state, SessionState::Idle);

        let handle = r.output.played()[0].0;
        r.send(SessionEvent::PlaybackEnded(handle)).await;
        assert!(!r.handle.snapshot().playing);
    }

    #[tokio::test]
    async fn read_back_failures_leave_nothing_playing() {
        let mut r = rig_with(
            Some("k"),
            FakeExtractor::returning(Ok(FormData::default())),
            Some("@@not base64@@".to_string()),
        );
        r.send(SessionEvent::ReadBack).await;
        r.pump_one().await;
        assert!(r.output.played().is_empty());
        assert!(!r.handle.snapshot().playing);
        assert_eq!(r.ctrl.state, SessionState::Idle);

        r.ctrl.deps.speech = Arc::new(FakeSpeech {
            audio: None,
            fail: true,
        });
        r.send(SessionEvent::ReadBack).await;
        r.pump_one().await;
        assert!(!r.handle.snapshot().playing);
        assert_eq!(r.ctrl.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let mut r = rig();
        r.listening().await;
        r.server(tool_call("c1", UPDATE_FORM_FIELD, json!({"field": "dob", "value": "01/01/1990"}))).await;
        r.server(transcript(Some("hello"), None, true)).await;
        r.server(transcript(Some("partial"), None, false)).await;

        r.send(SessionEvent::Reset).await;
        let view = r.handle.snapshot();
        assert_eq!(view.state, SessionState::Idle);
        assert!(view.form.is_empty());
        assert!(view.transcripts.is_empty());
        assert!(r.ctrl.input_turn.is_empty());
        assert!(!r.mic.held());
    }
}
