//! Audio format definitions, wire payloads and capture blocks.

use crate::codec;
use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};

/// Sample rate the microphone is captured and sent at.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate the remote model speaks at.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Number of samples per capture block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Complete PCM16 mono audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono).
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new mono format at the given rate.
    pub fn mono(sample_rate: u32) -> Self {
        Self { sample_rate, channels: 1 }
    }

    /// PCM16 at 24kHz (server output).
    pub fn pcm16_24khz() -> Self {
        Self::mono(PLAYBACK_SAMPLE_RATE)
    }

    /// PCM16 at 16kHz (microphone input).
    pub fn pcm16_16khz() -> Self {
        Self::mono(CAPTURE_SAMPLE_RATE)
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }

    /// Calculate duration in milliseconds for a given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }

    /// MIME type declaring this format on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Parse a MIME type such as `audio/pcm;rate=24000`.
    ///
    /// Returns `None` for non-audio types. The rate falls back to
    /// `default_rate` when the parameter is missing or unparseable.
    pub fn from_mime_type(mime_type: &str, default_rate: u32) -> Option<Self> {
        let mut params = mime_type.split(';').map(str::trim);
        let essence = params.next()?;
        if !essence.to_ascii_lowercase().starts_with("audio/") {
            return None;
        }
        let rate = params
            .filter_map(|p| p.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
            .and_then(|(_, value)| value.trim().parse::<u32>().ok())
            .filter(|rate| *rate > 0)
            .unwrap_or(default_rate);
        Some(Self::mono(rate))
    }
}

/// PCM16 audio bytes with format information.
///
/// Used both for outbound microphone audio and for inbound model speech.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw PCM16 little-endian bytes.
    pub data: Vec<u8>,
    /// Audio format of this chunk.
    pub format: AudioFormat,
}

impl AudioChunk {
    /// Create a new audio chunk.
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Create a PCM16 24kHz chunk (model output).
    pub fn pcm16_24khz(data: Vec<u8>) -> Self {
        Self::new(data, AudioFormat::pcm16_24khz())
    }

    /// Create a PCM16 16kHz chunk (microphone input).
    pub fn pcm16_16khz(data: Vec<u8>) -> Self {
        Self::new(data, AudioFormat::pcm16_16khz())
    }

    /// Encode normalized samples into a chunk.
    pub fn from_samples(samples: &[f32], format: AudioFormat) -> Self {
        Self::new(codec::encode_pcm16(samples), format)
    }

    /// Decode this chunk into normalized samples.
    pub fn to_samples(&self) -> Result<Vec<f32>> {
        codec::decode_pcm16(&self.data)
    }

    /// Number of samples per channel.
    pub fn frames(&self) -> usize {
        self.data.len() / (2 * self.format.channels.max(1) as usize)
    }

    /// Get duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.format.sample_rate as f64
    }

    /// Get duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.format.duration_ms(self.data.len())
    }

    /// Encode audio data as base64.
    pub fn to_base64(&self) -> String {
        codec::encode_base64(&self.data)
    }

    /// Decode audio data from base64.
    pub fn from_base64(encoded: &str, format: AudioFormat) -> Result<Self> {
        Ok(Self::new(codec::decode_base64(encoded)?, format))
    }

    /// Decode an inline payload tagged with a MIME type.
    pub fn from_inline(mime_type: &str, encoded: &str, default_rate: u32) -> Result<Self> {
        let format = AudioFormat::from_mime_type(mime_type, default_rate)
            .ok_or_else(|| LiveError::audio(format!("Not an audio MIME type: {mime_type}")))?;
        Self::from_base64(encoded, format)
    }
}

/// A fixed-length block of normalized microphone samples.
///
/// Produced once by capture and consumed once by the transmitter; it is
/// deliberately not `Clone`.
#[derive(Debug, PartialEq)]
pub struct AudioBlock {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBlock {
    /// Wrap captured samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Borrow the samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Capture rate of the samples.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in the block.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the block into a wire chunk.
    pub fn into_chunk(self) -> AudioChunk {
        AudioChunk::from_samples(&self.samples, AudioFormat::mono(self.sample_rate))
    }
}
