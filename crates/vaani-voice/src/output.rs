//! Speaker output using Rodio.
//!
//! Rodio's `OutputStream` is not `Send`, so [`RodioOutput`] owns a dedicated playback
//! thread and talks to it over a channel. Each scheduled chunk gets its own `Sink`:
//! leading silence up to its start time, then the samples, wrapped so the session
//! hears `PlaybackEnded` when the last sample has been pulled.

use crate::codec::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use crate::playback::{AudioOutput, PlaybackHandle};
use crate::session::SessionEvent;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink, Source};
use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

enum Command {
    Play {
        handle: PlaybackHandle,
        buffer: AudioBuffer,
        delay: Duration,
    },
    Stop(PlaybackHandle),
}

/// Default output device.
pub struct RodioOutput {
    commands: std_mpsc::Sender<Command>,
    epoch: Instant,
}

impl RodioOutput {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> VoiceResult<Self> {
        info!("🔊 Initializing audio playback");
        let (commands, rx) = std_mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<VoiceResult<()>>(1);

        std::thread::Builder::new()
            .name("vaani-playback".to_string())
            .spawn(move || {
                let (_stream, stream_handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let mut sinks: HashMap<PlaybackHandle, Sink> = HashMap::new();

                loop {
                    match rx.recv_timeout(Duration::from_millis(250)) {
                        Ok(Command::Play {
                            handle,
                            buffer,
                            delay,
                        }) => {
                            let sink = match Sink::try_new(&stream_handle) {
                                Ok(s) => s,
                                Err(e) => {
                                    warn!("Playback sink failed for {}: {}", handle, e);
                                    let _ = events.send(SessionEvent::PlaybackEnded(handle));
                                    continue;
                                }
                            };
                            let channels = buffer.channel_count().max(1);
                            if !delay.is_zero() {
                                sink.append(
                                    rodio::source::Zero::<f32>::new(channels, buffer.sample_rate)
                                        .take_duration(delay),
                                );
                            }
                            let samples =
                                SamplesBuffer::new(channels, buffer.sample_rate, buffer.interleaved());
                            sink.append(EndNotify::new(samples, handle, events.clone()));
                            sinks.insert(handle, sink);
                        }
                        Ok(Command::Stop(handle)) => {
                            if let Some(sink) = sinks.remove(&handle) {
                                sink.stop();
                            }
                        }
                        Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                    sinks.retain(|_, sink| !sink.empty());
                }
                info!("⏹️ Playback thread stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("playback thread exited".to_string()))??;

        info!("✅ Audio playback initialized");
        Ok(Self {
            commands,
            epoch: Instant::now(),
        })
    }
}

impl AudioOutput for RodioOutput {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn play(&self, handle: PlaybackHandle, buffer: AudioBuffer, start_at: f64) -> VoiceResult<()> {
        let delay = Duration::from_secs_f64((start_at - self.now()).max(0.0));
        self.commands
            .send(Command::Play {
                handle,
                buffer,
                delay,
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))
    }

    fn stop(&self, handle: PlaybackHandle) {
        if self.commands.send(Command::Stop(handle)).is_err() {
            debug!(target: "vaani::playback", "stop {} after playback thread exit", handle);
        }
    }
}

/// No speaker: keeps the clock and reports each chunk as finished right away.
///
/// Used when no output device is available (headless servers).
pub struct NullOutput {
    events: mpsc::UnboundedSender<SessionEvent>,
    epoch: Instant,
}

impl NullOutput {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            events,
            epoch: Instant::now(),
        }
    }
}

impl AudioOutput for NullOutput {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn play(&self, handle: PlaybackHandle, _buffer: AudioBuffer, _start_at: f64) -> VoiceResult<()> {
        self.events
            .send(SessionEvent::PlaybackEnded(handle))
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }

    fn stop(&self, _handle: PlaybackHandle) {}
}

/// Passes samples through and reports `PlaybackEnded` once the inner source runs dry.
struct EndNotify<S> {
    inner: S,
    handle: PlaybackHandle,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl<S> EndNotify<S> {
    fn new(inner: S, handle: PlaybackHandle, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            inner,
            handle,
            events: Some(events),
        }
    }
}

impl<S: Source<Item = f32>> Iterator for EndNotify<S> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next();
        if sample.is_none() {
            if let Some(events) = self.events.take() {
                let _ = events.send(SessionEvent::PlaybackEnded(self.handle));
            }
        }
        sample
    }
}

impl<S: Source<Item = f32>> Source for EndNotify<S> {
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}
