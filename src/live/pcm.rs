//! # PCM Framing
//!
//! Converts between the floating-point samples used by capture/playback devices
//! and the 16-bit little-endian PCM carried on the wire (base64-encoded).
//!
//! ## Audio Format Requirements:
//! - **Outbound**: 16kHz, mono, signed 16-bit LE, tagged `audio/pcm;rate=16000`
//! - **Inbound**: 24kHz, mono, signed 16-bit LE
//! - **Scaling**: f32 in [-1.0, 1.0] multiplied by 32768 and clamped, so the
//!   boundaries land on `i16::MAX` / `i16::MIN` instead of wrapping

use crate::live::error::LiveError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Microphone capture rate expected by the remote agent.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate of the synthesized speech sent back by the remote agent.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured block (matches the capture processor block size).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const PCM_SCALE: f32 = 32768.0;

/// Scale one float sample to a signed 16-bit sample.
///
/// Out-of-range input saturates; NaN maps to silence.
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Scale one signed 16-bit sample back to a float in [-1.0, 1.0).
pub fn i16_to_sample(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// Encode a block of float samples as 16-bit little-endian PCM bytes.
pub fn encode_block(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample_to_i16(sample));
    }
    bytes
}

/// Encode a block of float samples as base64 PCM, ready for a media chunk.
pub fn encode_base64(samples: &[f32]) -> String {
    STANDARD.encode(encode_block(samples))
}

/// Decode 16-bit little-endian PCM bytes into float samples.
///
/// ## Errors:
/// - Empty payloads carry no audio and are rejected
/// - Odd byte counts cannot be split into 16-bit samples
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, LiveError> {
    if bytes.is_empty() {
        return Err(LiveError::Decode("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(i16_to_sample(sample));
    }
    Ok(samples)
}

/// Decode a base64 PCM payload from the remote agent into float samples.
pub fn decode_base64(data: &str) -> Result<Vec<f32>, LiveError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| LiveError::Decode(format!("invalid base64: {}", e)))?;
    decode_pcm16(&bytes)
}

/// MIME type advertised for PCM at the given rate.
pub fn mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Playback duration in seconds of `sample_count` mono samples.
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}
