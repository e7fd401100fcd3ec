//! # Vaani Voice - live Hindi form filling
//!
//! A single live conversation with a remote model that listens, talks back and fills
//! the form through tool calls.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Session Controller                         │
//! │  ┌──────────────┐   PCM16/b64   ┌──────────────┐                 │
//! │  │   Mic In     │ ────────────► │ Live socket  │  toolCall ──► Form
//! │  │   (cpal)     │               │ (tungstenite)│                 │
//! │  └──────────────┘               └──────┬───────┘                 │
//! │                                        │ audio chunks            │
//! │  ┌──────────────┐   gapless     ┌──────▼───────┐                 │
//! │  │  Speaker     │ ◄──────────── │  Playback    │ ◄── barge-in    │
//! │  │  (rodio)     │               │  Scheduler   │     stop_all    │
//! │  └──────────────┘               └──────────────┘                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod error;
pub mod extraction;
pub mod live;
pub mod output;
pub mod playback;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod speech;

#[cfg(test)]
mod testing;

pub use audio::{list_input_devices, CaptureConfig, CpalMicSource, MicGuard, MicSource};
pub use codec::{decode_pcm16, encode_pcm16, AudioBuffer, EncodedAudio};
pub use error::{VoiceError, VoiceResult};
pub use extraction::{DocumentExtractor, GeminiExtractor, PlaceholderExtractor};
pub use live::{ConnectRequest, GeminiLiveConnector, LiveConnector, LiveTransport, TransportEvent};
pub use output::{NullOutput, RodioOutput};
pub use playback::{AudioOutput, PlaybackHandle, PlaybackScheduler, ScheduledChunk};
pub use protocol::{ClientMessage, ServerMessage};
pub use rest::GeminiRest;
pub use session::{
    build_device_session, session_channel, SessionController, SessionDeps, SessionEvent,
    SessionHandle, SessionSettings, SessionState, SessionView,
};
pub use speech::{GeminiSpeech, PlaceholderSpeech, SpeechBackend};
