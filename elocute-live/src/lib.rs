//! # elocute-live
//!
//! Real-time audio streaming core for a spoken pronunciation coach.
//!
//! The crate streams microphone audio to a remote conversational speech model
//! over a persistent session and plays the model's speech back gaplessly,
//! while a small state machine tells the UI whose turn it is.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────────────────────────────┐
//!                 │              CoachSession              │
//!                 │ idle/connecting/listening/speaking/... │
//!                 └───────────────────┬────────────────────┘
//!                                     │ start / stop
//!                 ┌───────────────────▼────────────────────┐
//!   mic ─────────▶│               LiveClient               │◀────────▶ LiveTransport
//!  (Capture)      │ setup gate · demux · event dispatch    │          (Gemini Live)
//!   speaker ◀─────│          PlaybackScheduler             │
//!                 └────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Frame codec**: float samples ⇄ 16-bit little-endian PCM ⇄ base64
//! - **Capture**: fixed 4096-sample blocks at 16 kHz, dropped until setup completes
//! - **Playback**: back-to-back scheduling at 24 kHz, however bursty delivery is
//! - **Protocol**: setup handshake, ordered inbound events, mid-session close
//! - **Lifecycle**: one observable state with user-facing status text
//!
//! Cargo features: `gemini` (websocket transport), `desktop-audio` (cpal devices).
//!
//! ## Example
//!
//! ```rust,ignore
//! use elocute_live::desktop::CpalBackend;
//! use elocute_live::gemini::{GeminiConnector, DEFAULT_MODEL};
//! use elocute_live::{CoachSession, LiveConfig, Provider, ProviderSettings};
//! use std::sync::Arc;
//!
//! let settings = ProviderSettings::new(Provider::Gemini, api_key, DEFAULT_MODEL);
//! let session = CoachSession::new(
//!     settings,
//!     LiveConfig::default(),
//!     Arc::new(GeminiConnector),
//!     Arc::new(CpalBackend::new()),
//! );
//!
//! session.start(Some("1. \"Good morning.\"")).await?;
//! let mut state = session.subscribe();
//! while state.changed().await.is_ok() {
//!     println!("{}", state.borrow().status_text());
//! }
//! ```

pub mod audio;
pub mod capture;
pub mod client;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod persona;
pub mod playback;
pub mod protocol;
pub mod transcript;
pub mod transport;

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "desktop-audio")]
pub mod desktop;

pub use audio::{AudioBlock, AudioChunk, AudioFormat};
pub use capture::{BlockAccumulator, CapturePipeline};
pub use client::{
    ChannelEventHandler, LiveClient, LiveClientBuilder, LiveEvent, LiveEventHandler,
    NoOpEventHandler, SendOutcome,
};
pub use config::{LiveConfig, Provider, ProviderSettings};
pub use device::{AudioBackend, BoxedBackend, InputStream, OutputTimeline};
pub use error::{LiveError, Result};
pub use lifecycle::{CoachSession, LifecycleState};
pub use persona::{COACH_PERSONA, PracticeSentence, format_material};
pub use playback::{PlaybackBuffer, PlaybackScheduler, ScheduledSpan};
pub use protocol::{ClientMessage, ServerEvent, SetupPayload};
pub use transcript::Transcript;
pub use transport::{BoxedConnector, BoxedTransport, LiveTransport, TransportConnector};
