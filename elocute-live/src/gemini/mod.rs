//! Gemini Live API provider.
//!
//! Connects to Google's websocket-based Live API:
//!
//! - Input audio: 16kHz mono PCM
//! - Output audio: 24kHz mono PCM
//!
//! # Example
//!
//! ```rust,ignore
//! use elocute_live::gemini::{GeminiConnector, DEFAULT_MODEL};
//! use elocute_live::{COACH_PERSONA, LiveClient, Provider, ProviderSettings};
//!
//! let client = LiveClient::builder()
//!     .settings(ProviderSettings::new(Provider::Gemini, api_key, DEFAULT_MODEL))
//!     .connector(Arc::new(GeminiConnector))
//!     .backend(backend)
//!     .build()?;
//! client.connect(COACH_PERSONA, None).await?;
//! ```

mod transport;

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::transport::{BoxedTransport, TransportConnector};
use async_trait::async_trait;
use std::sync::Arc;

pub use transport::GeminiLiveTransport;

/// Gemini Live API WebSocket URL.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model for Gemini Live.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Available prebuilt voices (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Opens [`GeminiLiveTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiConnector;

#[async_trait]
impl TransportConnector for GeminiConnector {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn open(&self, settings: &ProviderSettings) -> Result<BoxedTransport> {
        let transport = GeminiLiveTransport::connect(settings).await?;
        Ok(Arc::new(transport))
    }
}
