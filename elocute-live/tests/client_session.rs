//! Session driver behaviour against a scripted transport and fake devices.

mod common;

use async_trait::async_trait;
use common::{
    EventLog, FakeBackend, ScriptedConnector, audio_frame, settings, setup_complete, turn_complete,
    wait_until,
};
use elocute_live::{
    AudioBlock, AudioChunk, ChannelEventHandler, LiveClient, LiveError, LiveEvent, LiveEventHandler,
    SendOutcome,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn client_with(
    connector: Arc<ScriptedConnector>,
    backend: Arc<FakeBackend>,
    handler: Arc<dyn LiveEventHandler>,
) -> LiveClient {
    common::init_logging();
    LiveClient::builder()
        .settings(settings())
        .connector(connector)
        .backend(backend)
        .event_handler(handler)
        .build()
        .unwrap()
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> LiveEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_full_exchange() {
    let connector = Arc::new(ScriptedConnector::default());
    let backend = Arc::new(FakeBackend::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(connector.clone(), backend.clone(), Arc::new(handler));

    client.connect("You are a coach.", Some("1. \"Good morning.\"")).await.unwrap();
    let server = connector.server();

    // Setup is the first frame and carries the material.
    let sent = server.transport.sent_json();
    assert_eq!(sent.len(), 1);
    let setup = &sent[0]["setup"];
    assert_eq!(setup["model"], "models/gemini-live-test");
    assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    let voice = &setup["generationConfig"]["speechConfig"]["voiceConfig"];
    assert_eq!(voice["prebuiltVoiceConfig"]["voiceName"], "Puck");
    let instruction = setup["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
    assert!(instruction.starts_with("You are a coach."));
    assert!(instruction.contains("TARGET LEARNING MATERIAL (Dynamic):\n1. \"Good morning.\""));

    client.start_audio_input().await.unwrap();
    assert!(backend.mic_is_open());

    server.push_json(setup_complete());
    assert_eq!(next_event(&mut events).await, LiveEvent::SetupComplete);
    assert!(client.is_setup_complete());

    // Two full blocks plus a partial one.
    backend.feed(&vec![0.25; 4096 * 2 + 100]);
    wait_until(|| server.transport.audio_sends() == 2).await;

    let audio = &server.transport.sent_json()[1]["realtimeInput"]["mediaChunks"][0];
    assert_eq!(audio["mimeType"], "audio/pcm;rate=16000");
    let data = audio["data"].as_str().unwrap();
    let chunk = AudioChunk::from_base64(data, elocute_live::AudioFormat::pcm16_16khz()).unwrap();
    assert_eq!(chunk.frames(), 4096);

    server.push_json(audio_frame(2400));
    server.push_json(turn_complete());

    match next_event(&mut events).await {
        LiveEvent::Audio(chunk) => assert_eq!(chunk.frames(), 2400),
        other => panic!("expected audio, got {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, LiveEvent::TurnComplete);

    let output = backend.output();
    assert_eq!(output.starts(), vec![0.0]);
    assert!((client.next_start_time().unwrap() - 0.1).abs() < 1e-9);

    client.disconnect().await;
    assert!(!backend.mic_is_open());
    assert!(output.closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_audio_suppressed_until_setup_complete() {
    let connector = Arc::new(ScriptedConnector::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(handler),
    );

    let block = || AudioBlock::new(vec![0.0; 4096], 16_000);
    assert_eq!(client.send_audio_chunk(block()).await.unwrap(), SendOutcome::Suppressed);

    client.connect("coach", None).await.unwrap();
    let server = connector.server();
    assert_eq!(client.send_audio_chunk(block()).await.unwrap(), SendOutcome::Suppressed);
    assert_eq!(client.send_text("hello").await.unwrap(), SendOutcome::Suppressed);
    assert_eq!(server.transport.sent().len(), 1);

    server.push_json(setup_complete());
    next_event(&mut events).await;

    assert_eq!(client.send_audio_chunk(block()).await.unwrap(), SendOutcome::Sent);
    assert_eq!(client.send_text("hello").await.unwrap(), SendOutcome::Sent);
    let sent = server.transport.sent_json();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2], json!({ "realtimeInput": { "text": "hello" } }));
}

#[tokio::test]
async fn test_blocks_captured_before_setup_are_dropped() {
    let connector = Arc::new(ScriptedConnector::default());
    let backend = Arc::new(FakeBackend::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(connector.clone(), backend.clone(), Arc::new(handler));

    client.connect("coach", None).await.unwrap();
    client.start_audio_input().await.unwrap();
    let server = connector.server();

    backend.feed(&vec![0.5; 4096 * 2]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.push_json(setup_complete());
    assert_eq!(next_event(&mut events).await, LiveEvent::SetupComplete);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.transport.audio_sends(), 0);

    backend.feed(&vec![0.5; 4096]);
    wait_until(|| server.transport.audio_sends() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.transport.audio_sends(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_default_material_when_none_given() {
    let connector = Arc::new(ScriptedConnector::default());
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(elocute_live::NoOpEventHandler),
    );
    client.connect("coach", None).await.unwrap();

    let sent = connector.server().transport.sent_json();
    let instruction =
        sent[0]["setup"]["systemInstruction"]["parts"][0]["text"].as_str().unwrap().to_string();
    assert!(instruction.contains("TARGET LEARNING MATERIAL (Default):"));
    assert!(instruction.contains("Hello, I would like to order a coffee."));
    client.disconnect().await;
}

struct LoggingHandler {
    log: EventLog,
}

#[async_trait]
impl LiveEventHandler for LoggingHandler {
    async fn on_interrupt(&self) {
        self.log.lock().push("interrupt".into());
    }

    async fn on_audio(&self, chunk: &AudioChunk) {
        self.log.lock().push(format!("audio:{}", chunk.frames()));
    }

    async fn on_text(&self, text: &str) {
        self.log.lock().push(format!("text:{text}"));
    }

    async fn on_input_transcription(&self, text: &str) {
        self.log.lock().push(format!("heard:{text}"));
    }

    async fn on_turn_complete(&self) {
        self.log.lock().push("turn_complete".into());
    }
}

#[tokio::test]
async fn test_interrupt_dispatched_before_audio_is_scheduled() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let connector = Arc::new(ScriptedConnector::default());
    let backend = Arc::new(FakeBackend::with_log(log.clone()));
    let client = client_with(
        connector.clone(),
        backend,
        Arc::new(LoggingHandler { log: log.clone() }),
    );

    client.connect("coach", None).await.unwrap();
    let mut frame = audio_frame(480);
    frame["serverContent"]["interrupted"] = json!(true);
    frame["serverContent"]["turnComplete"] = json!(true);
    connector.server().push_json(frame);

    wait_until(|| log.lock().len() == 4).await;
    assert_eq!(*log.lock(), vec!["interrupt", "scheduled:480", "audio:480", "turn_complete"]);
}

#[tokio::test]
async fn test_text_and_transcriptions_in_order() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let connector = Arc::new(ScriptedConnector::default());
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(LoggingHandler { log: log.clone() }),
    );
    client.connect("coach", None).await.unwrap();

    connector.server().push_json(json!({
        "serverContent": {
            "modelTurn": { "parts": [ { "text": "Repeat after me." } ] },
            "inputTranscription": { "text": "good morning" },
            "outputTranscription": { "text": "Good morning!" },
            "turnComplete": true
        }
    }));

    wait_until(|| log.lock().len() == 4).await;
    assert_eq!(
        *log.lock(),
        vec!["text:Repeat after me.", "heard:good morning", "text:Good morning!", "turn_complete"]
    );
}

#[tokio::test]
async fn test_text_turn_after_setup_yields_each_event_once() {
    let connector = Arc::new(ScriptedConnector::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(handler),
    );
    client.connect("coach", None).await.unwrap();

    client.handle_server_message(r#"{"setupComplete":true}"#).await;
    assert!(client.is_setup_complete());
    client
        .handle_server_message(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"Hello"}]}}}"#)
        .await;
    assert!(client.is_setup_complete());
    client.handle_server_message(r#"{"serverContent":{"turnComplete":true}}"#).await;
    assert!(client.is_setup_complete());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![LiveEvent::SetupComplete, LiveEvent::Text("Hello".into()), LiveEvent::TurnComplete]
    );

    client.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frames_do_not_end_session() {
    let connector = Arc::new(ScriptedConnector::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(handler),
    );
    client.connect("coach", None).await.unwrap();

    let server = connector.server();
    server.push("not json at all");
    server.push_json(json!({
        "serverContent": {
            "modelTurn": {
                "parts": [ { "inlineData": { "mimeType": "audio/pcm", "data": "%%%" } } ]
            }
        }
    }));
    server.push_json(setup_complete());

    assert_eq!(next_event(&mut events).await, LiveEvent::SetupComplete);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let connector = Arc::new(ScriptedConnector::default());
    let backend = Arc::new(FakeBackend::default());
    let client = client_with(
        connector.clone(),
        backend.clone(),
        Arc::new(elocute_live::NoOpEventHandler),
    );

    // Before any connect.
    client.disconnect().await;
    client.disconnect().await;

    client.connect("coach", None).await.unwrap();
    client.start_audio_input().await.unwrap();
    let server = connector.server();

    client.disconnect().await;
    client.disconnect().await;

    // The close error from the transport is swallowed and close happens once.
    assert_eq!(server.transport.close_calls(), 1);
    assert!(!client.is_connected());
    assert!(!client.is_capturing());
    assert!(!client.has_output());
    assert!(!backend.mic_is_open());
}

#[tokio::test]
async fn test_connect_while_open_fails() {
    let connector = Arc::new(ScriptedConnector::default());
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(elocute_live::NoOpEventHandler),
    );
    client.connect("coach", None).await.unwrap();
    assert!(matches!(client.connect("coach", None).await, Err(LiveError::SessionAlreadyOpen)));
    assert_eq!(connector.opens(), 1);

    client.disconnect().await;
    client.connect("coach", None).await.unwrap();
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn test_refused_handshake_releases_output() {
    let connector = Arc::new(ScriptedConnector::refusing());
    let backend = Arc::new(FakeBackend::default());
    let client = client_with(
        connector.clone(),
        backend.clone(),
        Arc::new(elocute_live::NoOpEventHandler),
    );

    let err = client.connect("coach", None).await.unwrap_err();
    assert!(matches!(err, LiveError::ConnectionError(_)));
    assert!(err.is_capability_failure());
    assert!(backend.output().closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!client.is_connected());

    connector.set_refuse(false);
    client.connect("coach", None).await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_missing_output_device_is_device_error() {
    let backend = Arc::new(FakeBackend::default());
    backend.deny_output.store(true, std::sync::atomic::Ordering::SeqCst);
    let connector = Arc::new(ScriptedConnector::default());
    let client = client_with(connector.clone(), backend, Arc::new(elocute_live::NoOpEventHandler));

    assert!(matches!(client.connect("coach", None).await, Err(LiveError::DeviceError(_))));
    assert_eq!(connector.opens(), 0);
}

#[tokio::test]
async fn test_provider_without_audio_is_refused() {
    let connector = Arc::new(ScriptedConnector::default());
    let client = LiveClient::builder()
        .settings(settings().with_audio_capabilities(true, false))
        .connector(connector.clone())
        .backend(Arc::new(FakeBackend::default()))
        .build()
        .unwrap();

    assert!(matches!(client.connect("coach", None).await, Err(LiveError::ConfigError(_))));
    assert_eq!(connector.opens(), 0);
}

#[tokio::test]
async fn test_second_capture_fails_closed() {
    let backend = Arc::new(FakeBackend::default());
    let client = client_with(
        Arc::new(ScriptedConnector::default()),
        backend.clone(),
        Arc::new(elocute_live::NoOpEventHandler),
    );
    client.start_audio_input().await.unwrap();
    assert!(matches!(client.start_audio_input().await, Err(LiveError::CaptureAlreadyActive)));
    assert_eq!(backend.mic_opens.load(std::sync::atomic::Ordering::SeqCst), 1);

    client.stop_audio_input();
    assert!(!backend.mic_is_open());
}

#[tokio::test]
async fn test_server_close_tears_down() {
    let connector = Arc::new(ScriptedConnector::default());
    let backend = Arc::new(FakeBackend::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(connector.clone(), backend.clone(), Arc::new(handler));

    client.connect("coach", None).await.unwrap();
    client.start_audio_input().await.unwrap();
    let server = connector.server();
    server.push_json(setup_complete());
    assert_eq!(next_event(&mut events).await, LiveEvent::SetupComplete);

    server.hang_up();
    assert_eq!(next_event(&mut events).await, LiveEvent::Closed);

    assert!(!client.is_connected());
    assert!(!client.is_setup_complete());
    assert!(!backend.mic_is_open());
    assert!(backend.output().closed.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(server.transport.close_calls(), 1);

    // A new session can be opened afterwards.
    client.connect("coach", None).await.unwrap();
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn test_send_failure_is_reported() {
    let connector = Arc::new(ScriptedConnector::default());
    let (handler, mut events) = ChannelEventHandler::new();
    let client = client_with(
        connector.clone(),
        Arc::new(FakeBackend::default()),
        Arc::new(handler),
    );
    client.connect("coach", None).await.unwrap();
    let server = connector.server();
    server.push_json(setup_complete());
    next_event(&mut events).await;

    server.transport.fail_sends();
    let result = client.send_audio_chunk(AudioBlock::new(vec![0.0; 16], 16_000)).await;
    assert!(matches!(result, Err(LiveError::ConnectionError(_))));
    assert!(client.is_connected());
}
