//! In-memory doubles for the device and network seams.

use crate::audio::{MicGuard, MicSource};
use crate::codec::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use crate::extraction::DocumentExtractor;
use crate::live::{ConnectRequest, LiveConnector, LiveTransport};
use crate::playback::{AudioOutput, PlaybackHandle};
use crate::protocol::ClientMessage;
use crate::session::SessionEvent;
use crate::speech::SpeechBackend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use vaani_core::FormData;

/// Output with a hand-driven clock.
#[derive(Default)]
pub struct FakeOutput {
    now: Mutex<f64>,
    played: Mutex<Vec<(PlaybackHandle, f64, f64)>>,
    stopped: Mutex<Vec<PlaybackHandle>>,
    pub fail_play: AtomicBool,
}

impl FakeOutput {
    pub fn set_now(&self, t: f64) {
        *self.now.lock().unwrap() = t;
    }

    /// `(handle, start, duration)` per played chunk, in call order.
    pub fn played(&self) -> Vec<(PlaybackHandle, f64, f64)> {
        self.played.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackHandle> {
        self.stopped.lock().unwrap().clone()
    }
}

impl AudioOutput for FakeOutput {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    fn play(&self, handle: PlaybackHandle, buffer: AudioBuffer, start_at: f64) -> VoiceResult<()> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(VoiceError::Playback("output device lost".to_string()));
        }
        self.played
            .lock()
            .unwrap()
            .push((handle, start_at, buffer.duration_secs()));
        Ok(())
    }

    fn stop(&self, handle: PlaybackHandle) {
        self.stopped.lock().unwrap().push(handle);
    }
}

#[derive(Default)]
pub struct FakeWire {
    pub sent: Mutex<Vec<ClientMessage>>,
    pub requests: Mutex<Vec<ConnectRequest>>,
    pub closes: AtomicUsize,
    pub fail_sends: AtomicBool,
}

impl FakeWire {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn tool_acks(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::ToolResponse(r) => Some(serde_json::to_value(r).unwrap()),
                _ => None,
            })
            .collect()
    }

    pub fn audio_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, ClientMessage::RealtimeInput(_)))
            .count()
    }
}

struct FakeTransport {
    wire: Arc<FakeWire>,
}

impl LiveTransport for FakeTransport {
    fn send(&self, message: ClientMessage) -> VoiceResult<()> {
        if self.wire.fail_sends.load(Ordering::SeqCst) {
            return Err(VoiceError::Transport("socket closed".to_string()));
        }
        self.wire.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        self.wire.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub wire: Arc<FakeWire>,
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        _events: mpsc::UnboundedSender<SessionEvent>,
    ) -> VoiceResult<Box<dyn LiveTransport>> {
        self.wire.sent.lock().unwrap().push(request.setup.clone());
        self.wire.requests.lock().unwrap().push(request);
        Ok(Box::new(FakeTransport {
            wire: self.wire.clone(),
        }))
    }
}

#[derive(Default)]
pub struct FakeMic {
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub fail: AtomicBool,
}

impl FakeMic {
    pub fn held(&self) -> bool {
        self.acquired.load(Ordering::SeqCst) > self.released.load(Ordering::SeqCst)
    }
}

impl MicSource for FakeMic {
    fn acquire(&self, _events: mpsc::UnboundedSender<SessionEvent>) -> VoiceResult<MicGuard> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioDevice("no microphone".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Ok(MicGuard::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

pub struct FakeSpeech {
    pub audio: Option<String>,
    pub fail: bool,
}

#[async_trait]
impl SpeechBackend for FakeSpeech {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Option<String>> {
        if self.fail {
            return Err(VoiceError::Tts("quota exceeded".to_string()));
        }
        Ok(self.audio.clone())
    }
}

pub struct FakeExtractor {
    pub result: Mutex<Option<VoiceResult<FormData>>>,
}

impl FakeExtractor {
    pub fn returning(result: VoiceResult<FormData>) -> Self {
        Self {
            result: Mutex::new(Some(result)),
        }
    }
}

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn extract(&self, _image: &[u8], _mime_type: &str) -> VoiceResult<FormData> {
        self.result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(VoiceError::Extraction("already used".to_string())))
    }
}
