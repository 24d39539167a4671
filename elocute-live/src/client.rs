//! The live session driver.
//!
//! [`LiveClient`] owns one session with the remote model together with the
//! microphone capture and the playback scheduler that belong to it:
//!
//! ```text
//!  mic ─▶ CapturePipeline ─▶ queue ─▶ forwarder ─▶ codec ─▶ LiveTransport ─▶ model
//!                                                   (gated on setup-complete)
//!  model ─▶ LiveTransport ─▶ receive loop ─▶ demux ─┬▶ PlaybackScheduler ─▶ speaker
//!                                                   └▶ LiveEventHandler
//! ```
//!
//! Inbound events reach the handler strictly in arrival order: within one
//! server message the interrupt comes first, then each content part (audio is
//! scheduled for playback before `on_audio` fires), then transcriptions, then
//! turn-complete.

use crate::audio::{AudioBlock, AudioChunk};
use crate::capture::CapturePipeline;
use crate::config::{LiveConfig, ProviderSettings};
use crate::device::BoxedBackend;
use crate::error::{LiveError, Result};
use crate::persona;
use crate::playback::PlaybackScheduler;
use crate::protocol::{self, ClientMessage, ServerEvent, SetupPayload};
use crate::transport::{BoxedConnector, BoxedTransport};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Observer for session events.
///
/// Called from the receive task, one event at a time, in arrival order.
#[async_trait]
pub trait LiveEventHandler: Send + Sync {
    /// The setup handshake was accepted; outbound audio is now sent.
    async fn on_setup_complete(&self) {}

    /// The model's turn was interrupted.
    async fn on_interrupt(&self) {}

    /// A chunk of model speech arrived and was scheduled for playback.
    async fn on_audio(&self, _chunk: &AudioChunk) {}

    /// A text fragment (model text part or transcription of model speech).
    async fn on_text(&self, _text: &str) {}

    /// A transcription fragment of the user's speech.
    async fn on_input_transcription(&self, _text: &str) {}

    /// The model yielded the floor.
    async fn on_turn_complete(&self) {}

    /// The server closed the session; local resources are already released.
    async fn on_closed(&self) {}
}

/// Default no-op event handler.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventHandler;

#[async_trait]
impl LiveEventHandler for NoOpEventHandler {}

/// Session events as plain values, for consumers that prefer a queue.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// See [`LiveEventHandler::on_setup_complete`].
    SetupComplete,
    /// See [`LiveEventHandler::on_interrupt`].
    Interrupted,
    /// See [`LiveEventHandler::on_audio`].
    Audio(AudioChunk),
    /// See [`LiveEventHandler::on_text`].
    Text(String),
    /// See [`LiveEventHandler::on_input_transcription`].
    InputTranscription(String),
    /// See [`LiveEventHandler::on_turn_complete`].
    TurnComplete,
    /// See [`LiveEventHandler::on_closed`].
    Closed,
}

/// Forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<LiveEvent>,
}

impl ChannelEventHandler {
    /// Create a handler and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: LiveEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl LiveEventHandler for ChannelEventHandler {
    async fn on_setup_complete(&self) {
        self.emit(LiveEvent::SetupComplete);
    }

    async fn on_interrupt(&self) {
        self.emit(LiveEvent::Interrupted);
    }

    async fn on_audio(&self, chunk: &AudioChunk) {
        self.emit(LiveEvent::Audio(chunk.clone()));
    }

    async fn on_text(&self, text: &str) {
        self.emit(LiveEvent::Text(text.to_string()));
    }

    async fn on_input_transcription(&self, text: &str) {
        self.emit(LiveEvent::InputTranscription(text.to_string()));
    }

    async fn on_turn_complete(&self) {
        self.emit(LiveEvent::TurnComplete);
    }

    async fn on_closed(&self) {
        self.emit(LiveEvent::Closed);
    }
}

/// Result of an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport.
    Sent,
    /// Dropped because no session is open or setup has not completed.
    Suppressed,
}

/// Builder for [`LiveClient`].
pub struct LiveClientBuilder {
    settings: Option<ProviderSettings>,
    config: LiveConfig,
    connector: Option<BoxedConnector>,
    backend: Option<BoxedBackend>,
    handler: Option<Arc<dyn LiveEventHandler>>,
}

impl Default for LiveClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            settings: None,
            config: LiveConfig::default(),
            connector: None,
            backend: None,
            handler: None,
        }
    }

    /// Set the provider settings.
    pub fn settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: LiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the transport connector.
    pub fn connector(mut self, connector: BoxedConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the audio device backend.
    pub fn backend(mut self, backend: BoxedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn LiveEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the client (does not connect yet).
    pub fn build(self) -> Result<LiveClient> {
        let settings =
            self.settings.ok_or_else(|| LiveError::config("Provider settings are required"))?;
        let connector =
            self.connector.ok_or_else(|| LiveError::config("Transport connector is required"))?;
        let backend = self.backend.ok_or_else(|| LiveError::config("Audio backend is required"))?;
        self.config.validate()?;

        let capture = CapturePipeline::new(
            backend.clone(),
            self.config.block_size,
            self.config.capture_sample_rate,
        );

        Ok(LiveClient {
            inner: Arc::new(ClientInner {
                settings,
                config: self.config,
                connector,
                backend,
                handler: self.handler.unwrap_or_else(|| Arc::new(NoOpEventHandler)),
                session_open: AtomicBool::new(false),
                setup_complete: Arc::new(AtomicBool::new(false)),
                transport: RwLock::new(None),
                playback: Mutex::new(None),
                capture,
                receiver_task: Mutex::new(None),
                forwarder_task: Mutex::new(None),
            }),
        })
    }
}

/// Drives one live session with the remote model.
///
/// At most one session, one microphone stream and one output device are held
/// at a time. [`disconnect`](Self::disconnect) releases all three and may be
/// called from any state.
pub struct LiveClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    settings: ProviderSettings,
    config: LiveConfig,
    connector: BoxedConnector,
    backend: BoxedBackend,
    handler: Arc<dyn LiveEventHandler>,
    session_open: AtomicBool,
    setup_complete: Arc<AtomicBool>,
    transport: RwLock<Option<BoxedTransport>>,
    playback: Mutex<Option<PlaybackScheduler>>,
    capture: CapturePipeline,
    receiver_task: Mutex<Option<JoinHandle<()>>>,
    forwarder_task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveClient {
    /// Create a new builder.
    pub fn builder() -> LiveClientBuilder {
        LiveClientBuilder::new()
    }

    /// Open a session and send the setup handshake.
    ///
    /// `system_context` is the persona instruction; `learning_material` is
    /// embedded into it, or the configured default when absent. Outbound
    /// audio stays suppressed until the server acknowledges the setup.
    pub async fn connect(
        &self,
        system_context: &str,
        learning_material: Option<&str>,
    ) -> Result<()> {
        let inner = &self.inner;
        inner.settings.validate()?;

        if inner
            .session_open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LiveError::SessionAlreadyOpen);
        }

        match inner.open_session(system_context, learning_material).await {
            Ok(transport) => {
                let task = tokio::spawn(receive_loop(inner.clone(), transport));
                *inner.receiver_task.lock() = Some(task);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Live session connect failed");
                inner.release().await;
                Err(e)
            }
        }
    }

    /// Open the microphone and stream its blocks into the session.
    ///
    /// Blocks captured before setup completes are dropped, not queued.
    pub async fn start_audio_input(&self) -> Result<()> {
        let inner = &self.inner;
        let (tx, mut rx) = mpsc::channel::<AudioBlock>(inner.config.capture_queue_blocks);
        let setup_complete = inner.setup_complete.clone();

        inner.capture.start(Box::new(move |block| {
            if !setup_complete.load(Ordering::SeqCst) {
                return;
            }
            match tx.try_send(block) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("Transmit queue full, dropping block")
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }))?;

        let forwarder_inner = inner.clone();
        let task = tokio::spawn(async move {
            while let Some(block) = rx.recv().await {
                if let Err(e) = forwarder_inner.send_audio_block(block).await {
                    tracing::warn!(error = %e, "Could not send audio chunk");
                }
            }
        });
        if let Some(previous) = inner.forwarder_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop the microphone without closing the session.
    pub fn stop_audio_input(&self) {
        self.inner.capture.stop();
        if let Some(task) = self.inner.forwarder_task.lock().take() {
            task.abort();
        }
    }

    /// Send one block of microphone audio.
    pub async fn send_audio_chunk(&self, block: AudioBlock) -> Result<SendOutcome> {
        self.inner.send_audio_block(block).await
    }

    /// Send a text message to the model.
    pub async fn send_text(&self, text: &str) -> Result<SendOutcome> {
        let Some(transport) = self.inner.gated_transport() else {
            return Ok(SendOutcome::Suppressed);
        };
        transport.send(&ClientMessage::text(text)).await?;
        Ok(SendOutcome::Sent)
    }

    /// Process one raw inbound frame as if it came from the transport.
    pub async fn handle_server_message(&self, raw: &str) {
        self.inner.handle_server_message(raw).await;
    }

    /// Close the session, stop the microphone and release the output device.
    ///
    /// Close errors are swallowed. Safe to call repeatedly and before
    /// [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        if let Some(task) = self.inner.receiver_task.lock().take() {
            task.abort();
        }
        self.inner.release().await;
    }

    /// Whether the server has acknowledged the setup.
    pub fn is_setup_complete(&self) -> bool {
        self.inner.setup_complete.load(Ordering::SeqCst)
    }

    /// Whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.read().is_some()
    }

    /// Whether the microphone is open.
    pub fn is_capturing(&self) -> bool {
        self.inner.capture.is_active()
    }

    /// Whether an output device is held.
    pub fn has_output(&self) -> bool {
        self.inner.playback.lock().is_some()
    }

    /// Time the next inbound chunk would start at on the output clock.
    pub fn next_start_time(&self) -> Option<f64> {
        self.inner.playback.lock().as_ref().map(PlaybackScheduler::next_start_time)
    }

    /// Session configuration.
    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        let inner = &self.inner;
        if let Some(task) = inner.receiver_task.lock().take() {
            task.abort();
        }
        inner.release_local();
        let transport = inner.transport.write().take();
        if let Some(transport) = transport {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = transport.close().await;
                });
            }
        }
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("connected", &self.is_connected())
            .field("setup_complete", &self.is_setup_complete())
            .field("capturing", &self.is_capturing())
            .finish()
    }
}

impl ClientInner {
    async fn open_session(
        &self,
        system_context: &str,
        learning_material: Option<&str>,
    ) -> Result<BoxedTransport> {
        let output = self.backend.open_output()?;
        *self.playback.lock() = Some(PlaybackScheduler::new(output));

        tracing::info!(
            provider = self.connector.provider(),
            model = %self.settings.model,
            "Connecting live session"
        );
        let transport = self.connector.open(&self.settings).await?;

        let instruction = persona::system_instruction(
            system_context,
            learning_material,
            &self.config.default_material,
        );
        let setup = SetupPayload::new(self.settings.model.clone(), instruction, &self.config.voice)
            .with_transcription(self.config.input_transcription, self.config.output_transcription);

        tracing::info!(session_id = transport.session_id(), "Sending setup message");
        if let Err(e) = transport.send(&ClientMessage::setup(setup)).await {
            let _ = transport.close().await;
            return Err(match e {
                LiveError::ConnectionError(_) => e,
                other => LiveError::connection(format!("Setup handshake failed: {other}")),
            });
        }

        *self.transport.write() = Some(transport.clone());
        Ok(transport)
    }

    fn gated_transport(&self) -> Option<BoxedTransport> {
        if !self.setup_complete.load(Ordering::SeqCst) {
            return None;
        }
        self.transport.read().clone()
    }

    async fn send_audio_block(&self, block: AudioBlock) -> Result<SendOutcome> {
        let Some(transport) = self.gated_transport() else {
            return Ok(SendOutcome::Suppressed);
        };
        let chunk = block.into_chunk();
        let message = ClientMessage::audio(chunk.format.mime_type(), chunk.to_base64());
        transport.send(&message).await?;
        Ok(SendOutcome::Sent)
    }

    async fn handle_server_message(&self, raw: &str) {
        let events = match protocol::demux(raw, self.config.playback_sample_rate) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed server message");
                return;
            }
        };

        for event in events {
            match event {
                ServerEvent::SetupComplete => {
                    self.setup_complete.store(true, Ordering::SeqCst);
                    tracing::info!("Live session setup complete");
                    self.handler.on_setup_complete().await;
                }
                ServerEvent::Interrupted => {
                    tracing::debug!("Model turn interrupted");
                    self.handler.on_interrupt().await;
                }
                ServerEvent::Audio(chunk) => {
                    self.schedule_playback(&chunk);
                    self.handler.on_audio(&chunk).await;
                }
                ServerEvent::Text(text) | ServerEvent::OutputTranscription(text) => {
                    self.handler.on_text(&text).await;
                }
                ServerEvent::InputTranscription(text) => {
                    self.handler.on_input_transcription(&text).await;
                }
                ServerEvent::TurnComplete => {
                    tracing::debug!("Model turn complete");
                    self.handler.on_turn_complete().await;
                }
            }
        }
    }

    fn schedule_playback(&self, chunk: &AudioChunk) {
        let mut playback = self.playback.lock();
        let Some(scheduler) = playback.as_mut() else {
            return;
        };
        if let Err(e) = scheduler.enqueue(chunk) {
            tracing::error!(error = %e, "Audio playback error");
        }
    }

    fn is_current(&self, transport: &BoxedTransport) -> bool {
        self.transport
            .read()
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(transport)))
    }

    /// Release capture and playback; no awaiting.
    fn release_local(&self) {
        self.setup_complete.store(false, Ordering::SeqCst);
        self.capture.stop();
        if let Some(task) = self.forwarder_task.lock().take() {
            task.abort();
        }
        if let Some(scheduler) = self.playback.lock().take() {
            scheduler.shutdown();
        }
    }

    /// Full teardown. The receive task handle must already be taken.
    async fn release(&self) {
        self.setup_complete.store(false, Ordering::SeqCst);
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "Ignoring error while closing session");
            }
        }
        self.release_local();
        self.session_open.store(false, Ordering::SeqCst);
    }
}

async fn receive_loop(inner: Arc<ClientInner>, transport: BoxedTransport) {
    loop {
        match transport.next_message().await {
            Some(Ok(raw)) => inner.handle_server_message(&raw).await,
            Some(Err(LiveError::ConnectionError(e))) => {
                tracing::warn!(error = %e, "Live transport failed");
                break;
            }
            Some(Err(e)) => tracing::warn!(error = %e, "Dropping unreadable server frame"),
            None => break,
        }
    }

    if !inner.is_current(&transport) {
        return;
    }
    tracing::info!(session_id = transport.session_id(), "Live session closed");
    // Detach ourselves so teardown does not abort this task mid-way.
    drop(inner.receiver_task.lock().take());
    inner.release().await;
    inner.handler.on_closed().await;
}
