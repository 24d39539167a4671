//! Wire messages for the live session and the inbound demultiplexer.
//!
//! Outbound frames are typed serde structs. Inbound frames are inspected
//! structurally: a single server message may carry any combination of a
//! setup acknowledgement, an interruption, content parts, transcriptions and
//! a turn-complete marker, so [`demux`] flattens one message into an ordered
//! list of [`ServerEvent`]s.

use crate::audio::AudioChunk;
use crate::error::{LiveError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Events extracted from inbound server messages, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The setup handshake was accepted.
    SetupComplete,
    /// The model's current turn was interrupted (user barged in).
    Interrupted,
    /// A chunk of model speech.
    Audio(AudioChunk),
    /// A text fragment from the model's turn.
    Text(String),
    /// Transcription of the user's speech.
    InputTranscription(String),
    /// Transcription of the model's speech.
    OutputTranscription(String),
    /// The model yielded the floor.
    TurnComplete,
}

// ── Client messages ─────────────────────────────────────────────────────

/// A message sent from the client to the live endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<SetupPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput>,
}

impl ClientMessage {
    /// The one-time setup handshake.
    pub fn setup(setup: SetupPayload) -> Self {
        Self { setup: Some(setup), realtime_input: None }
    }

    /// A realtime audio frame carrying base64 PCM16.
    pub fn audio(mime_type: impl Into<String>, data_base64: impl Into<String>) -> Self {
        Self {
            setup: None,
            realtime_input: Some(RealtimeInput {
                media_chunks: Some(vec![MediaChunk {
                    mime_type: mime_type.into(),
                    data: data_base64.into(),
                }]),
                text: None,
            }),
        }
    }

    /// A realtime text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            setup: None,
            realtime_input: Some(RealtimeInput { media_chunks: None, text: Some(text.into()) }),
        }
    }

    /// Whether this is the setup handshake.
    pub fn is_setup(&self) -> bool {
        self.setup.is_some()
    }

    /// Whether this frame carries audio.
    pub fn is_audio(&self) -> bool {
        self.realtime_input.as_ref().is_some_and(|input| input.media_chunks.is_some())
    }

    /// Serialize to the JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Setup handshake content.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Map<String, Value>>,
}

impl SetupPayload {
    /// Build an audio-response setup with the given persona and voice.
    pub fn new(
        model: impl Into<String>,
        system_instruction: impl Into<String>,
        voice: &str,
    ) -> Self {
        Self {
            model: qualify_model(model.into()),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart { text: system_instruction.into() }],
            },
            input_audio_transcription: None,
            output_audio_transcription: None,
        }
    }

    /// Request transcription of the user's and/or the model's speech.
    pub fn with_transcription(mut self, input: bool, output: bool) -> Self {
        self.input_audio_transcription = input.then(Map::new);
        self.output_audio_transcription = output.then(Map::new);
        self
    }

    /// Fully qualified model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The system instruction text.
    pub fn system_instruction(&self) -> &str {
        self.system_instruction.parts.first().map(|p| p.text.as_str()).unwrap_or_default()
    }
}

fn qualify_model(model: String) -> String {
    if model.starts_with("models/") { model } else { format!("models/{model}") }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct TextPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    media_chunks: Option<Vec<MediaChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

// ── Server messages ─────────────────────────────────────────────────────

/// Flatten one inbound message into its events, in delivery order:
/// setup-complete, interrupted, content parts, input transcription,
/// output transcription, turn-complete.
///
/// Audio parts without a declared rate are tagged with `default_rate`.
/// A message that is not a JSON object is a protocol error; an individual
/// audio part that fails to decode is skipped so the rest of the message
/// still gets through.
pub fn demux(raw: &str, default_rate: u32) -> Result<Vec<ServerEvent>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LiveError::protocol(format!("Parse error: {e}")))?;
    let message = value
        .as_object()
        .ok_or_else(|| LiveError::protocol("Server message is not a JSON object"))?;

    let mut events = Vec::new();
    let content = message.get("serverContent");

    if message.get("setupComplete").is_some()
        || content.and_then(|c| c.get("setupComplete")).is_some()
    {
        events.push(ServerEvent::SetupComplete);
    }

    let Some(content) = content else {
        return Ok(events);
    };

    if flag(content, "interrupted") {
        events.push(ServerEvent::Interrupted);
    }

    let parts = content
        .get("modelTurn")
        .and_then(|turn| turn.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for part in parts {
        if let Some(inline) = part.get("inlineData") {
            let mime_type = inline.get("mimeType").and_then(Value::as_str).unwrap_or_default();
            if !mime_type.starts_with("audio/") {
                tracing::debug!(%mime_type, "Ignoring non-audio inline data");
                continue;
            }
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            match AudioChunk::from_inline(mime_type, data, default_rate) {
                Ok(chunk) => events.push(ServerEvent::Audio(chunk)),
                Err(e) => tracing::warn!(error = %e, "Dropping undecodable audio part"),
            }
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(ServerEvent::Text(text.to_string()));
            }
        }
    }

    if let Some(text) = transcription(content, "inputTranscription") {
        events.push(ServerEvent::InputTranscription(text));
    }
    if let Some(text) = transcription(content, "outputTranscription") {
        events.push(ServerEvent::OutputTranscription(text));
    }

    if flag(content, "turnComplete") {
        events.push(ServerEvent::TurnComplete);
    }

    Ok(events)
}

fn flag(content: &Value, key: &str) -> bool {
    content.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn transcription(content: &Value, key: &str) -> Option<String> {
    content
        .get(key)
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
