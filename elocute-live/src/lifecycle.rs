//! Coaching session lifecycle.
//!
//! [`CoachSession`] owns at most one [`LiveClient`] and publishes a single
//! [`LifecycleState`] that UIs observe through a `watch` channel.
//!
//! ```text
//!   idle ──start──▶ connecting ──ok──▶ connected ──mic ok──▶ listening ⇄ speaking
//!    ▲                  │                                        │
//!    │                  └──fail──▶ error ──(retry delay)──┐      │
//!    └──────────────────────────────────────────────────────────┴── stop / closed
//! ```

use crate::audio::AudioChunk;
use crate::client::{LiveClient, LiveEventHandler, SendOutcome};
use crate::config::{LiveConfig, ProviderSettings};
use crate::device::BoxedBackend;
use crate::error::{LiveError, Result};
use crate::persona::COACH_PERSONA;
use crate::transcript::Transcript;
use crate::transport::BoxedConnector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Externally observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// The user's turn.
    Speaking,
    /// The coach is talking.
    Listening,
    Error,
}

impl LifecycleState {
    /// User-facing status line.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Idle => "Ready to practice",
            Self::Connecting => "Waking up your English coach...",
            Self::Connected => "Coach is online. Follow the guide!",
            Self::Speaking => "Your turn. Speak now.",
            Self::Listening => "AI Coach is speaking...",
            Self::Error => "Coach is resting. Retrying soon...",
        }
    }

    /// Whether a session is up.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Speaking | Self::Listening)
    }

    /// Whether [`CoachSession::start`] is accepted from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Speaking => "speaking",
            Self::Listening => "listening",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

struct Shared {
    state: watch::Sender<LifecycleState>,
    transcript: parking_lot::Mutex<Transcript>,
    // Bumped on every start/stop so stale retry timers do nothing.
    epoch: AtomicU64,
}

impl Shared {
    fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn set(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Lifecycle transition");
        }
    }

    /// Move to `next` only when currently in one of `from`.
    fn transition(&self, from: &[LifecycleState], next: LifecycleState) -> bool {
        let mut previous = None;
        let changed = self.state.send_if_modified(|state| {
            if from.contains(state) && *state != next {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        if let Some(previous) = previous {
            tracing::info!(from = %previous, to = %next, "Lifecycle transition");
        }
        changed
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Maps one client's events onto the shared state.
///
/// Events from a client whose epoch has been superseded are ignored.
struct LifecycleHandler {
    shared: Arc<Shared>,
    epoch: u64,
    forward: Option<Arc<dyn LiveEventHandler>>,
}

impl LifecycleHandler {
    fn is_current(&self) -> bool {
        self.shared.epoch.load(Ordering::SeqCst) == self.epoch
    }

    fn forward(&self) -> Option<&Arc<dyn LiveEventHandler>> {
        self.forward.as_ref().filter(|_| self.is_current())
    }
}

#[async_trait]
impl LiveEventHandler for LifecycleHandler {
    async fn on_setup_complete(&self) {
        if let Some(forward) = self.forward() {
            forward.on_setup_complete().await;
        }
    }

    async fn on_interrupt(&self) {
        if let Some(forward) = self.forward() {
            forward.on_interrupt().await;
        }
    }

    async fn on_audio(&self, chunk: &AudioChunk) {
        if !self.is_current() {
            return;
        }
        self.shared.transition(
            &[LifecycleState::Connected, LifecycleState::Speaking],
            LifecycleState::Listening,
        );
        if let Some(forward) = self.forward() {
            forward.on_audio(chunk).await;
        }
    }

    async fn on_text(&self, text: &str) {
        if !self.is_current() {
            return;
        }
        self.shared.transcript.lock().push(text);
        if let Some(forward) = self.forward() {
            forward.on_text(text).await;
        }
    }

    async fn on_input_transcription(&self, text: &str) {
        if let Some(forward) = self.forward() {
            forward.on_input_transcription(text).await;
        }
    }

    async fn on_turn_complete(&self) {
        if !self.is_current() {
            return;
        }
        self.shared.transition(
            &[LifecycleState::Connected, LifecycleState::Listening],
            LifecycleState::Speaking,
        );
        if let Some(forward) = self.forward() {
            forward.on_turn_complete().await;
        }
    }

    async fn on_closed(&self) {
        let superseded = self
            .shared
            .epoch
            .compare_exchange(self.epoch, self.epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();
        if superseded {
            tracing::debug!(epoch = self.epoch, "Ignoring close of a superseded session");
            return;
        }
        self.shared.set(LifecycleState::Idle);
        if let Some(forward) = &self.forward {
            forward.on_closed().await;
        }
    }
}

/// Runs coaching sessions and tracks their lifecycle.
pub struct CoachSession {
    settings: ProviderSettings,
    config: LiveConfig,
    connector: BoxedConnector,
    backend: BoxedBackend,
    persona: String,
    forward: Option<Arc<dyn LiveEventHandler>>,
    shared: Arc<Shared>,
    client: tokio::sync::Mutex<Option<Arc<LiveClient>>>,
}

impl CoachSession {
    /// Create an idle session controller.
    pub fn new(
        settings: ProviderSettings,
        config: LiveConfig,
        connector: BoxedConnector,
        backend: BoxedBackend,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            settings,
            config,
            connector,
            backend,
            persona: COACH_PERSONA.to_string(),
            forward: None,
            shared: Arc::new(Shared {
                state,
                transcript: parking_lot::Mutex::new(Transcript::new()),
                epoch: AtomicU64::new(0),
            }),
            client: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the coach persona.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Also deliver every session event to `handler`.
    pub fn with_event_handler(mut self, handler: Arc<dyn LiveEventHandler>) -> Self {
        self.forward = Some(handler);
        self
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.shared.current()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// Start a session: connect, then open the microphone.
    ///
    /// On failure the state becomes [`LifecycleState::Error`] and returns to
    /// idle once the configured retry delay has passed.
    pub async fn start(&self, learning_material: Option<&str>) -> Result<()> {
        let mut slot = self.client.lock().await;
        let current = self.shared.current();
        if !current.can_start() {
            return Err(LiveError::SessionAlreadyOpen);
        }
        if let Some(stale) = slot.take() {
            stale.disconnect().await;
        }

        let epoch = self.shared.next_epoch();
        self.shared.transcript.lock().clear();
        self.shared.set(LifecycleState::Connecting);

        let client = match self.build_client(epoch) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                self.fail(epoch, &e);
                return Err(e);
            }
        };

        match self.bring_up(&client, learning_material).await {
            Ok(()) => {
                *slot = Some(client);
                Ok(())
            }
            Err(e) => {
                client.disconnect().await;
                self.fail(epoch, &e);
                Err(e)
            }
        }
    }

    /// End the session and release every device. Valid from any state.
    pub async fn stop(&self) {
        let mut slot = self.client.lock().await;
        self.shared.next_epoch();
        if let Some(client) = slot.take() {
            client.disconnect().await;
        }
        self.shared.set(LifecycleState::Idle);
    }

    /// Send a typed message to the coach.
    pub async fn send_text(&self, text: &str) -> Result<SendOutcome> {
        let client = self.client.lock().await.clone();
        match client {
            Some(client) => client.send_text(text).await,
            None => Ok(SendOutcome::Suppressed),
        }
    }

    /// Coach transcript trimmed for display.
    pub fn transcript_display(&self) -> String {
        self.shared.transcript.lock().display(self.config.transcript_display_chars)
    }

    /// Full coach transcript.
    pub fn transcript(&self) -> Transcript {
        self.shared.transcript.lock().clone()
    }

    /// Clear the transcript when moving on to the next sentence.
    pub fn next_sentence(&self) {
        self.shared.transcript.lock().clear();
    }

    fn build_client(&self, epoch: u64) -> Result<LiveClient> {
        LiveClient::builder()
            .settings(self.settings.clone())
            .config(self.config.clone())
            .connector(self.connector.clone())
            .backend(self.backend.clone())
            .event_handler(Arc::new(LifecycleHandler {
                shared: self.shared.clone(),
                epoch,
                forward: self.forward.clone(),
            }))
            .build()
    }

    async fn bring_up(&self, client: &LiveClient, learning_material: Option<&str>) -> Result<()> {
        client.connect(&self.persona, learning_material).await?;
        self.shared.transition(&[LifecycleState::Connecting], LifecycleState::Connected);
        client.start_audio_input().await?;
        self.shared.transition(&[LifecycleState::Connected], LifecycleState::Listening);
        Ok(())
    }

    fn fail(&self, epoch: u64, error: &LiveError) {
        tracing::warn!(error = %error, "Coaching session failed to start");
        self.shared.set(LifecycleState::Error);

        let shared = self.shared.clone();
        let delay: Duration = self.config.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                shared.transition(&[LifecycleState::Error], LifecycleState::Idle);
            }
        });
    }
}

impl std::fmt::Debug for CoachSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoachSession")
            .field("provider", &self.settings.provider)
            .field("state", &self.state())
            .finish()
    }
}
