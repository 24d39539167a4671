//! Error types for the live streaming core.

use thiserror::Error;

/// Result type for live streaming operations.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur while capturing, streaming or playing back audio.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Microphone or output device unavailable or access denied.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Session open or handshake failure.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed or unparseable inbound message.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// `connect` was called while a session is still open.
    #[error("A live session is already open")]
    SessionAlreadyOpen,

    /// A second microphone capture was requested while one is running.
    #[error("Microphone capture is already active")]
    CaptureAlreadyActive,

    /// The operation needs an open session.
    #[error("Session not connected")]
    NotConnected,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio payload could not be interpreted.
    #[error("Audio format error: {0}")]
    AudioFormatError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Transport text encoding could not be decoded.
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

impl LiveError {
    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormatError(msg.into())
    }

    /// Whether this error should put the lifecycle into its `error` state
    /// (device or connection failures surfaced to the caller).
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceError(_)
                | Self::ConnectionError(_)
                | Self::ConfigError(_)
                | Self::CaptureAlreadyActive
                | Self::SessionAlreadyOpen
        )
    }
}
