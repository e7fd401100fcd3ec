//! PCM16 <-> f32 conversion for the live audio wire format.
//!
//! Upstream audio is mono 16-bit little-endian PCM, base64 encoded and tagged
//! `audio/pcm;rate=<hz>`. Downstream audio uses the same sample format, possibly
//! interleaved across channels.

use crate::error::VoiceResult;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A base64 PCM16 payload with its mime type, as sent in `realtimeInput.audio`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedAudio {
    pub data: String,
    pub mime_type: String,
}

/// Decoded audio: one sample vector per channel, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Frame-interleaved samples, for output devices.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Encode normalized f32 samples as base64 PCM16 LE.
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> EncodedAudio {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * 32768.0).min(i16::MAX as f32);
        bytes.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    EncodedAudio {
        data: B64.encode(bytes),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode base64 PCM16 LE into per-channel f32 samples.
///
/// Trailing bytes that do not form a whole frame are dropped.
pub fn decode_pcm16(data: &str, sample_rate: u32, channels: u16) -> VoiceResult<AudioBuffer> {
    let bytes = B64.decode(data)?;
    let channel_count = channels.max(1) as usize;
    let frame_bytes = 2 * channel_count;
    let frames = bytes.len() / frame_bytes;

    let mut out = vec![Vec::with_capacity(frames); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, pair) in frame.chunks_exact(2).enumerate() {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            out[ch].push(sample as f32 / 32768.0);
        }
    }
    Ok(AudioBuffer {
        sample_rate,
        channels: out,
    })
}
