//! Frame codec: float samples ⇄ PCM16 little-endian, bytes ⇄ base64.
//!
//! Capture and playback work in normalized `f32` samples; the wire carries
//! signed 16-bit little-endian PCM wrapped in standard base64 so it can ride
//! inside JSON text frames.

use crate::error::{LiveError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Scale factor between normalized floats and 16-bit PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// Largest multiple of 3 not above 32 KiB.
///
/// Base64 maps every 3 input bytes to 4 output characters, so encoding in
/// sub-chunks of this size concatenates to the same text as a single pass.
pub const BASE64_CHUNK_BYTES: usize = 32_766;

/// Encode normalized samples as PCM16 little-endian bytes.
///
/// Each sample is multiplied by 32768 and truncated toward zero. Values
/// outside `[-1.0, 1.0]` saturate at `i16::MIN`/`i16::MAX` (the float to
/// integer cast saturates, and NaN maps to 0); they never wrap around.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM16_SCALE) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Decode PCM16 little-endian bytes into normalized samples.
///
/// Fails when the byte count is odd.
pub fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(LiveError::audio(format!(
            "Invalid data length for PCM16: {} (must be even)",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Encode bytes as standard base64, working in bounded sub-chunks.
pub fn encode_base64(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(BASE64_CHUNK_BYTES) {
        STANDARD.encode_string(chunk, &mut out);
    }
    out
}

/// Decode standard base64 text into bytes.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded)?)
}

/// Encode samples straight to the wire text form.
pub fn samples_to_wire(samples: &[f32]) -> String {
    encode_base64(&encode_pcm16(samples))
}

/// Decode wire text straight to samples.
pub fn wire_to_samples(encoded: &str) -> Result<Vec<f32>> {
    decode_pcm16(&decode_base64(encoded)?)
}
