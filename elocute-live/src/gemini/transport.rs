use crate::config::ProviderSettings;
use crate::error::{LiveError, Result};
use crate::protocol::ClientMessage;
use crate::transport::LiveTransport;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::GEMINI_LIVE_URL;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// Gemini Live websocket transport.
pub struct GeminiLiveTransport {
    session_id: String,
    connected: Arc<AtomicBool>,
    sender: Arc<Mutex<WsSink>>,
    receiver: Arc<Mutex<WsSource>>,
}

impl GeminiLiveTransport {
    /// Open a websocket to the Gemini Live endpoint.
    pub async fn connect(settings: &ProviderSettings) -> Result<Self> {
        // Both rustls backends may be compiled in; pin one before the first handshake.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let url = live_url(settings)?;
        let request = url.as_str().into_client_request().map_err(|e| {
            LiveError::connection(format!("Failed to create client request: {}", e))
        })?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| LiveError::connection(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = stream.split();
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(%session_id, model = %settings.model, "Gemini Live websocket open");

        Ok(Self {
            session_id,
            connected: Arc::new(AtomicBool::new(true)),
            sender: Arc::new(Mutex::new(sink)),
            receiver: Arc::new(Mutex::new(source)),
        })
    }

    /// Whether the socket is still believed to be open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Build the websocket URL, keeping the API key in the query string.
pub(crate) fn live_url(settings: &ProviderSettings) -> Result<url::Url> {
    let base = settings.endpoint.as_deref().unwrap_or(GEMINI_LIVE_URL);
    url::Url::parse_with_params(base, &[("key", settings.api_key())])
        .map_err(|e| LiveError::config(format!("Invalid live endpoint '{}': {}", base, e)))
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(LiveError::NotConnected);
        }
        let msg = message.to_json()?;
        if message.is_setup() {
            tracing::debug!(raw_setup = %msg, "Raw setup message");
        }

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(msg.into()))
            .await
            .map_err(|e| LiveError::connection(format!("Send error: {}", e)))
    }

    async fn next_message(&self) -> Option<Result<String>> {
        let mut receiver = self.receiver.lock().await;

        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    // The server sends JSON as binary frames as well.
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        LiveError::protocol(format!("Invalid UTF-8 in binary message: {}", e))
                    }));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        session_id = %self.session_id,
                        ?frame,
                        "Server closed the connection"
                    );
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Some(Err(LiveError::connection(format!("Receive error: {}", e))));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| LiveError::connection(format!("Close error: {}", e)))
    }
}

impl std::fmt::Debug for GeminiLiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveTransport")
            .field("session_id", &self.session_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
