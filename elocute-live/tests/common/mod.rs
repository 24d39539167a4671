//! Shared doubles for integration tests: a scripted transport and a hand-driven
//! audio backend with a manually advanced output clock.

#![allow(dead_code)]

use async_trait::async_trait;
use elocute_live::device::SampleCallback;
use elocute_live::{
    AudioBackend, BoxedTransport, ClientMessage, InputStream, LiveError, LiveTransport,
    OutputTimeline, PlaybackBuffer, Provider, ProviderSettings, Result, TransportConnector,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing_subscriber::EnvFilter;

/// Ordered record of observable side effects shared across doubles.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Route library logs to the test harness; `RUST_LOG` selects the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn settings() -> ProviderSettings {
    ProviderSettings::new(Provider::Gemini, "test-key", "gemini-live-test")
}

// ── Transport ───────────────────────────────────────────────────────────

/// In-memory transport: records sends, replays frames pushed by the test.
pub struct ScriptedTransport {
    id: String,
    sent: Mutex<Vec<ClientMessage>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_sends: AtomicBool,
    close_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedTransport {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|m| serde_json::from_str(&m.to_json().unwrap()).unwrap())
            .collect()
    }

    pub fn audio_sends(&self) -> usize {
        self.sent.lock().iter().filter(|m| m.is_audio()).count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Make the next `close` wait until the returned gate is notified.
    pub fn hold_close(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.close_gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LiveError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LiveError::connection("socket reset"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn next_message(&self) -> Option<Result<String>> {
        self.inbound.lock().await.recv().await.map(Ok)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.close_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Err(LiveError::connection("close after close"))
    }
}

/// The server side of a [`ScriptedTransport`].
pub struct ServerHandle {
    pub transport: Arc<ScriptedTransport>,
    frames: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ServerHandle {
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(tx) = self.frames.lock().as_ref() {
            let _ = tx.send(frame.into());
        }
    }

    pub fn push_json(&self, frame: Value) {
        self.push(frame.to_string());
    }

    /// End the inbound stream as a server-side close would.
    pub fn hang_up(&self) {
        self.frames.lock().take();
    }
}

/// Hands out scripted transports and remembers them.
#[derive(Default)]
pub struct ScriptedConnector {
    servers: Mutex<Vec<Arc<ServerHandle>>>,
    refuse: AtomicBool,
    opens: AtomicUsize,
}

impl ScriptedConnector {
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.refuse.store(true, Ordering::SeqCst);
        connector
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn server(&self) -> Arc<ServerHandle> {
        self.servers.lock().last().cloned().expect("no transport opened yet")
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn open(&self, _settings: &ProviderSettings) -> Result<BoxedTransport> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LiveError::connection("handshake refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            id: uuid::Uuid::new_v4().to_string(),
            sent: Mutex::new(Vec::new()),
            inbound: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            close_gate: Mutex::new(None),
        });
        self.servers.lock().push(Arc::new(ServerHandle {
            transport: transport.clone(),
            frames: Mutex::new(Some(tx)),
        }));
        Ok(transport)
    }
}

// ── Audio devices ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeOutput {
    now: Mutex<f64>,
    pub scheduled: Mutex<Vec<(f64, PlaybackBuffer)>>,
    pub stops: AtomicUsize,
    pub closed: AtomicBool,
    log: Option<EventLog>,
}

impl FakeOutput {
    pub fn advance_to(&self, t: f64) {
        *self.now.lock() = t;
    }

    pub fn starts(&self) -> Vec<f64> {
        self.scheduled.lock().iter().map(|(start, _)| *start).collect()
    }
}

impl OutputTimeline for FakeOutput {
    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn schedule(&self, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if let Some(log) = &self.log {
            log.lock().push(format!("scheduled:{}", buffer.samples.len()));
        }
        self.scheduled.lock().push((start_at, buffer));
        Ok(())
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeStream(Arc<AtomicBool>);

impl InputStream for FakeStream {
    fn close(self: Box<Self>) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Microphone fed by the test and a speaker with a manual clock.
#[derive(Default)]
pub struct FakeBackend {
    mic: Mutex<Option<SampleCallback>>,
    pub mic_open: Arc<AtomicBool>,
    pub mic_opens: AtomicUsize,
    pub outputs: Mutex<Vec<Arc<FakeOutput>>>,
    pub deny_input: AtomicBool,
    pub deny_output: AtomicBool,
    log: Option<EventLog>,
}

impl FakeBackend {
    pub fn with_log(log: EventLog) -> Self {
        Self { log: Some(log), ..Default::default() }
    }

    /// Push samples as the device thread would.
    pub fn feed(&self, samples: &[f32]) {
        if let Some(cb) = self.mic.lock().as_mut() {
            cb(samples);
        }
    }

    pub fn output(&self) -> Arc<FakeOutput> {
        self.outputs.lock().last().cloned().expect("no output opened yet")
    }

    pub fn mic_is_open(&self) -> bool {
        self.mic_open.load(Ordering::SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(
        &self,
        _sample_rate: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn InputStream>> {
        if self.deny_input.load(Ordering::SeqCst) {
            return Err(LiveError::device("microphone permission denied"));
        }
        *self.mic.lock() = Some(on_samples);
        self.mic_open.store(true, Ordering::SeqCst);
        self.mic_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream(self.mic_open.clone())))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputTimeline>> {
        if self.deny_output.load(Ordering::SeqCst) {
            return Err(LiveError::device("no output device"));
        }
        let output = Arc::new(FakeOutput { log: self.log.clone(), ..Default::default() });
        self.outputs.lock().push(output.clone());
        Ok(output)
    }
}

// ── Frames ──────────────────────────────────────────────────────────────

pub fn setup_complete() -> Value {
    serde_json::json!({ "setupComplete": {} })
}

/// A server content frame with one audio part of `frames` silent samples.
pub fn audio_frame(frames: usize) -> Value {
    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD.encode(vec![0u8; frames * 2]);
    serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [ { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": data } } ]
            }
        }
    })
}

pub fn turn_complete() -> Value {
    serde_json::json!({ "serverContent": { "turnComplete": true } })
}

/// Poll `cond` until it holds, yielding to spawned tasks in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}
