//! Configuration types consumed by the live streaming core.
//!
//! [`ProviderSettings`] comes from the settings collaborator (which provider,
//! which credential, which model); [`LiveConfig`] tunes the session itself.

use crate::audio::{AudioFormat, CAPTURE_SAMPLE_RATE, DEFAULT_BLOCK_SIZE, PLAYBACK_SAMPLE_RATE};
use crate::error::{LiveError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default voice for model speech.
pub const DEFAULT_VOICE: &str = "Puck";

/// Practice sentences used when the caller supplies no material.
pub const DEFAULT_LEARNING_MATERIAL: &str = concat!(
    "1. \"Hello, I would like to order a coffee.\"\n",
    "2. \"Could you please tell me how to get to the station?\"",
);

/// Remote model provider identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini Live.
    #[default]
    Gemini,
    /// OpenAI-compatible endpoint.
    Openai,
    /// Azure-hosted endpoint.
    Azure,
    /// Locally hosted model.
    Local,
    /// Anything else reachable at a custom endpoint.
    Custom,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Openai => write!(f, "openai"),
            Self::Azure => write!(f, "azure"),
            Self::Local => write!(f, "local"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Provider settings supplied by the settings collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Settings entry identifier.
    #[serde(default)]
    pub id: String,
    /// Which provider to talk to.
    #[serde(default)]
    pub provider: Provider,
    /// Optional endpoint override.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API credential.
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,
    /// Model identifier.
    pub model: String,
    /// Whether the model accepts audio input.
    #[serde(default = "default_true")]
    pub supports_audio_in: bool,
    /// Whether the model produces audio output.
    #[serde(default = "default_true")]
    pub supports_audio_out: bool,
    /// Latency budget reported by the settings collaborator.
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

impl ProviderSettings {
    /// Create settings for a provider with both audio capabilities declared.
    pub fn new(provider: Provider, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            provider,
            endpoint: None,
            api_key: SecretString::from(api_key.into()),
            model: model.into(),
            supports_audio_in: true,
            supports_audio_out: true,
            max_latency_ms: None,
        }
    }

    /// Set the endpoint override.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Declare audio capabilities.
    pub fn with_audio_capabilities(mut self, audio_in: bool, audio_out: bool) -> Self {
        self.supports_audio_in = audio_in;
        self.supports_audio_out = audio_out;
        self
    }

    /// Expose the API key for building a request.
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Check that the settings can drive a live audio session.
    ///
    /// There is no text-only or audio-only fallback, so both capabilities
    /// must be declared.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.expose_secret().is_empty() {
            return Err(LiveError::config("API key is required"));
        }
        if self.model.is_empty() {
            return Err(LiveError::config("Model identifier is required"));
        }
        if !self.supports_audio_in || !self.supports_audio_out {
            return Err(LiveError::config(format!(
                "Model '{}' must support audio input and output",
                self.model
            )));
        }
        Ok(())
    }
}

/// Configuration for a live coaching session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Voice for model speech.
    pub voice: String,
    /// Rate microphone audio is captured and sent at.
    pub capture_sample_rate: u32,
    /// Rate assumed for model audio that does not declare one.
    pub playback_sample_rate: u32,
    /// Samples per capture block.
    pub block_size: usize,
    /// Capacity of the queue between the capture thread and the transmitter.
    pub capture_queue_blocks: usize,
    /// Ask the server to transcribe the user's speech.
    pub input_transcription: bool,
    /// Ask the server to transcribe its own speech.
    pub output_transcription: bool,
    /// Material used when `connect` receives none.
    pub default_material: String,
    /// Delay before an `error` lifecycle state returns to `idle`.
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Characters of transcript kept for display.
    pub transcript_display_chars: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            capture_queue_blocks: 8,
            input_transcription: true,
            output_transcription: true,
            default_material: DEFAULT_LEARNING_MATERIAL.to_string(),
            retry_delay: Duration::from_secs(5),
            transcript_display_chars: 500,
        }
    }
}

impl LiveConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Set the capture block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the default learning material.
    pub fn with_default_material(mut self, material: impl Into<String>) -> Self {
        self.default_material = material.into();
        self
    }

    /// Set the error-to-idle delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enable or disable server-side transcription.
    pub fn with_transcription(mut self, input: bool, output: bool) -> Self {
        self.input_transcription = input;
        self.output_transcription = output;
        self
    }

    /// Format of outbound microphone audio.
    pub fn capture_format(&self) -> AudioFormat {
        AudioFormat::mono(self.capture_sample_rate)
    }

    /// Default format of inbound model audio.
    pub fn playback_format(&self) -> AudioFormat {
        AudioFormat::mono(self.playback_sample_rate)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(LiveError::config("block_size must be greater than zero"));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(LiveError::config("sample rates must be greater than zero"));
        }
        if self.capture_queue_blocks == 0 {
            return Err(LiveError::config("capture_queue_blocks must be greater than zero"));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
