//! Microphone capture using CPAL
//!
//! The cpal `Stream` is not `Send`, so each acquisition owns a dedicated thread that
//! builds the stream, plays it, and parks until the [`MicGuard`] is released.

use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionEvent;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Samples per block forwarded to the session (default: 4096)
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            block_size: 4096,
        }
    }
}

/// Holds the microphone. Releasing (or dropping) it stops the hardware stream.
pub struct MicGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl MicGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(f) = self.release.take() {
            f();
        }
    }
}

impl Drop for MicGuard {
    fn drop(&mut self) {
        self.run_release();
    }
}

/// A microphone the session can acquire while a conversation is live.
pub trait MicSource: Send + Sync {
    /// Start capturing; each full block is sent as `SessionEvent::MicBlock`.
    fn acquire(&self, events: mpsc::UnboundedSender<SessionEvent>) -> VoiceResult<MicGuard>;
}

/// Default input device, mono.
#[derive(Debug, Clone, Default)]
pub struct CpalMicSource {
    config: CaptureConfig,
}

impl CpalMicSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl MicSource for CpalMicSource {
    fn acquire(&self, events: mpsc::UnboundedSender<SessionEvent>) -> VoiceResult<MicGuard> {
        let config = self.config.clone();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<VoiceResult<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("vaani-capture".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(&config, events) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until the guard is released or dropped.
                let _ = stop_rx.recv();
                drop(stream);
                info!("🎤 Microphone released");
            })?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::AudioDevice("capture thread exited".to_string()))??;

        Ok(MicGuard::new(move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn build_capture_stream(
    config: &CaptureConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> VoiceResult<cpal::Stream> {
    info!("🎤 Initializing audio capture ({}Hz, mono)", config.sample_rate);

    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;

    info!("📱 Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let block_size = config.block_size.max(1);
    let mut block = Vec::with_capacity(block_size);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                block.push(sample);
                if block.len() >= block_size {
                    let full = std::mem::replace(&mut block, Vec::with_capacity(block_size));
                    if events.send(SessionEvent::MicBlock(full)).is_err() {
                        return;
                    }
                }
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    info!("✅ Audio capture started");
    Ok(stream)
}

/// List available input devices
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            device_names.push(name);
        }
    }

    Ok(device_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn capture_config_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.block_size, 4096);
    }

    #[test]
    fn guard_releases_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let guard = MicGuard::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        guard.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = count.clone();
        drop(MicGuard::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
