//! Session transport abstraction.
//!
//! The live driver never talks to a socket directly. It asks a
//! [`TransportConnector`] for a [`LiveTransport`], sends typed
//! [`ClientMessage`]s through it and pulls raw inbound text frames out of it.
//! The websocket implementation lives in [`crate::gemini`]; tests use an
//! in-memory double.

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::protocol::ClientMessage;
use async_trait::async_trait;
use std::sync::Arc;

/// An open, bidirectional connection to the remote model.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Identifier for log correlation.
    fn session_id(&self) -> &str;

    /// Send one client message.
    async fn send(&self, message: &ClientMessage) -> Result<()>;

    /// Receive the next inbound text frame.
    ///
    /// Returns `None` once the connection is closed.
    async fn next_message(&self) -> Option<Result<String>>;

    /// Close the connection.
    async fn close(&self) -> Result<()>;
}

/// A shared transport handle.
pub type BoxedTransport = Arc<dyn LiveTransport>;

/// A factory for opening transports.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Provider name for logging (e.g., "gemini").
    fn provider(&self) -> &str;

    /// Open a connection using the given provider settings.
    async fn open(&self, settings: &ProviderSettings) -> Result<BoxedTransport>;
}

/// A shared connector type.
pub type BoxedConnector = Arc<dyn TransportConnector>;
