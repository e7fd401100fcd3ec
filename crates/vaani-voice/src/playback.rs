//! Gapless playback scheduling for streamed audio chunks.
//!
//! Chunks arrive in bursts from the network. Each one is placed at
//! `max(cursor, now)` on the output clock so consecutive chunks play back to back
//! without overlap, and the cursor advances by the chunk's duration.

use crate::codec::AudioBuffer;
use crate::error::VoiceResult;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Opaque identity of one scheduled chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackHandle(pub u64);

impl fmt::Display for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The speaker. Implementations report the end of each chunk by sending
/// `SessionEvent::PlaybackEnded(handle)` on the session queue.
pub trait AudioOutput: Send + Sync {
    /// Output clock, in seconds.
    fn now(&self) -> f64;

    /// Start `buffer` at `start_at` on the output clock.
    fn play(&self, handle: PlaybackHandle, buffer: AudioBuffer, start_at: f64) -> VoiceResult<()>;

    /// Stop a chunk now. Unknown or finished handles are ignored.
    fn stop(&self, handle: PlaybackHandle);
}

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub handle: PlaybackHandle,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    cursor: f64,
    active: HashSet<PlaybackHandle>,
    next_handle: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            cursor: 0.0,
            active: HashSet::new(),
            next_handle: 1,
        }
    }

    /// Queue `buffer` right after everything already scheduled (or now, if idle).
    pub fn schedule(&mut self, buffer: AudioBuffer) -> VoiceResult<ScheduledChunk> {
        let handle = PlaybackHandle(self.next_handle);
        self.next_handle += 1;

        let start = self.cursor.max(self.output.now());
        let duration = buffer.duration_secs();
        self.output.play(handle, buffer, start)?;

        self.cursor = start + duration;
        self.active.insert(handle);
        debug!(target: "vaani::playback", "scheduled {} at {:.3}s for {:.3}s", handle, start, duration);
        Ok(ScheduledChunk {
            handle,
            start,
            end: self.cursor,
        })
    }

    /// A chunk finished. Returns true when it was the last active one.
    pub fn on_ended(&mut self, handle: PlaybackHandle) -> bool {
        self.active.remove(&handle) && self.active.is_empty()
    }

    /// Stop every active chunk and rewind the cursor to 0.
    pub fn stop_all(&mut self) {
        for handle in self.active.drain() {
            self.output.stop(handle);
        }
        self.cursor = 0.0;
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}
