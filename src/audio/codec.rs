//! Pure conversions between base64 text, raw byte buffers, and PCM samples.
//!
//! The live API transports audio as base64-encoded signed 16-bit
//! little-endian PCM. Outbound capture quantizes f32 samples to i16;
//! inbound fragments are decoded back to f32 in [-1, 1] for playback.

use crate::error::{MentorError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Bytes per PCM16 sample frame (mono).
const BYTES_PER_SAMPLE: usize = 2;

/// Encode raw bytes as base64 text for transport.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 text back to raw bytes. Exact inverse of [`encode`].
///
/// # Errors
///
/// Returns a codec error if the input is not valid base64.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| MentorError::Codec(format!("invalid base64: {e}")))
}

/// Interpret a byte buffer as signed 16-bit little-endian PCM and convert
/// each sample to f32 in [-1, 1].
///
/// # Errors
///
/// Fails without producing a partial buffer when the byte length is not a
/// whole multiple of the per-sample frame size.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(MentorError::Codec(format!(
            "PCM16 buffer length {} is not a multiple of {BYTES_PER_SAMPLE}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect())
}

/// Quantize f32 samples in [-1, 1] to signed 16-bit little-endian PCM bytes.
///
/// Each sample is clamped, then scaled by 32768 when negative and 32767
/// when positive so both halves of the i16 range are used symmetrically.
#[must_use]
pub fn quantize_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        #[allow(clippy::cast_possible_truncation)]
        let q = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&q.to_le_bytes());
    }
    bytes
}
