//! Wire protocol for the realtime speech service.
//!
//! Outbound events are strongly typed and serialized with a `type` tag.
//! Inbound parsing is deliberately loose: the service has renamed its
//! delta/done events across API revisions, so recognition goes through
//! alias tables instead of a closed enum.

use serde::Serialize;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::defaults;

/// Events sent to the service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPayload },
    #[serde(rename = "input_audio_buffer.append")]
    Append { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    Commit,
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponsePayload },
}

impl ClientEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload {
    pub turn_detection: TurnDetection,
    pub input_audio_format: String,
    pub input_audio_transcription: TranscriptionPayload,
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub silence_duration_ms: u32,
    pub prefix_padding_ms: u32,
    pub create_response: bool,
    pub interrupt_response: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionPayload {
    pub model: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsePayload {
    pub modalities: Vec<String>,
}

impl SessionPayload {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        SessionPayload {
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: cfg.vad_threshold,
                silence_duration_ms: cfg.vad_silence_ms,
                prefix_padding_ms: cfg.vad_prefix_padding_ms,
                create_response: true,
                interrupt_response: true,
            },
            input_audio_format: "pcm16".to_string(),
            input_audio_transcription: TranscriptionPayload {
                model: defaults::TRANSCRIPTION_MODEL.to_string(),
                language: cfg.language.clone(),
            },
            instructions: cfg.instructions(),
            modalities: cfg.text_only.then(|| vec!["text".to_string()]),
        }
    }
}

/// A recognized inbound event, canonicalized from the service's many
/// event-type spellings.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The service started generating a response.
    ResponseCreated,
    /// Incremental text for the current turn.
    TextDelta(String),
    /// The current turn is complete, possibly with full final text.
    TurnDone(Option<String>),
    /// A service-reported error message.
    ServiceError(String),
    /// Audio-modality traffic we do not consume.
    AudioOnly,
    /// Anything else; carried for debug logging.
    Unknown(String),
}

/// Event types carrying incremental text, across API revisions.
const TEXT_DELTA_TYPES: &[&str] = &[
    "response.text.delta",
    "response.output_text.delta",
    "response.delta",
    "transcript.delta",
    "response.audio_transcript.delta",
];

/// Event types marking the end of a turn.
const TURN_DONE_TYPES: &[&str] = &[
    "response.text.done",
    "response.output_text.done",
    "response.completed",
    "transcript.completed",
    "response.output_item.done",
    "response.done",
    "response.audio_transcript.done",
];

/// Field names the delta text may live under.
const DELTA_FIELDS: &[&str] = &["delta", "text", "output_text", "transcript"];

/// Field names the final text may live under.
const TEXT_FIELDS: &[&str] = &["text", "output_text", "transcript"];

fn first_string_field(value: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|f| value.get(f).and_then(Value::as_str).map(str::to_string))
}

/// Parse a raw inbound message. Returns None for malformed JSON or
/// messages without a type; unrecognized but well-formed events come back
/// as `Unknown` so debug mode can surface them.
pub fn parse_server_event(raw: &str) -> Option<ServerEvent> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let event_type = value.get("type")?.as_str()?.to_string();

    if event_type == "error" {
        let message = value
            .get("error")
            .and_then(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| e.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| raw.to_string());
        return Some(ServerEvent::ServiceError(message));
    }

    if event_type == "response.created" {
        return Some(ServerEvent::ResponseCreated);
    }

    if TEXT_DELTA_TYPES.contains(&event_type.as_str()) {
        let delta = first_string_field(&value, DELTA_FIELDS).unwrap_or_default();
        return Some(ServerEvent::TextDelta(delta));
    }

    if TURN_DONE_TYPES.contains(&event_type.as_str()) {
        return Some(ServerEvent::TurnDone(first_string_field(
            &value,
            TEXT_FIELDS,
        )));
    }

    // Checked after the alias tables: the audio_transcript events share
    // this prefix but carry text we want.
    if event_type.starts_with("response.audio") {
        return Some(ServerEvent::AudioOnly);
    }

    Some(ServerEvent::Unknown(event_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_shape() {
        let cfg = SessionConfig::default();
        let event = ClientEvent::SessionUpdate {
            session: SessionPayload::from_config(&cfg),
        };
        let json: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
        assert_eq!(
            json["session"]["input_audio_transcription"]["language"],
            "en"
        );
        assert_eq!(json["session"]["modalities"][0], "text");
    }

    #[test]
    fn append_and_commit_shapes() {
        let append = ClientEvent::Append {
            audio: "AAAA".to_string(),
        };
        assert_eq!(
            append.to_json(),
            r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#
        );
        assert_eq!(
            ClientEvent::Commit.to_json(),
            r#"{"type":"input_audio_buffer.commit"}"#
        );
    }

    #[test]
    fn response_create_requests_text() {
        let event = ClientEvent::ResponseCreate {
            response: ResponsePayload {
                modalities: vec!["text".to_string()],
            },
        };
        let json: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["type"], "response.create");
        assert_eq!(json["response"]["modalities"][0], "text");
    }

    #[test]
    fn all_delta_aliases_are_recognized() {
        for event_type in TEXT_DELTA_TYPES {
            let raw = format!(r#"{{"type":"{}","delta":"hi"}}"#, event_type);
            assert_eq!(
                parse_server_event(&raw),
                Some(ServerEvent::TextDelta("hi".to_string())),
                "alias {} not recognized",
                event_type
            );
        }
    }

    #[test]
    fn all_done_aliases_are_recognized() {
        for event_type in TURN_DONE_TYPES {
            let raw = format!(r#"{{"type":"{}","text":"done"}}"#, event_type);
            assert_eq!(
                parse_server_event(&raw),
                Some(ServerEvent::TurnDone(Some("done".to_string()))),
                "alias {} not recognized",
                event_type
            );
        }
    }

    #[test]
    fn delta_field_fallbacks() {
        let raw = r#"{"type":"response.text.delta","transcript":"via transcript"}"#;
        assert_eq!(
            parse_server_event(raw),
            Some(ServerEvent::TextDelta("via transcript".to_string()))
        );
        let raw = r#"{"type":"response.text.delta"}"#;
        assert_eq!(
            parse_server_event(raw),
            Some(ServerEvent::TextDelta(String::new()))
        );
    }

    #[test]
    fn done_without_text_field() {
        let raw = r#"{"type":"response.done"}"#;
        assert_eq!(parse_server_event(raw), Some(ServerEvent::TurnDone(None)));
    }

    #[test]
    fn audio_transcript_delta_beats_audio_prefix() {
        // Shares the "response.audio" prefix but must parse as a delta.
        let raw = r#"{"type":"response.audio_transcript.delta","delta":"x"}"#;
        assert_eq!(
            parse_server_event(raw),
            Some(ServerEvent::TextDelta("x".to_string()))
        );
        let raw = r#"{"type":"response.audio.delta","delta":"base64..."}"#;
        assert_eq!(parse_server_event(raw), Some(ServerEvent::AudioOnly));
    }

    #[test]
    fn error_message_extraction() {
        let raw = r#"{"type":"error","error":{"message":"session_expired"}}"#;
        assert_eq!(
            parse_server_event(raw),
            Some(ServerEvent::ServiceError("session_expired".to_string()))
        );
        let raw = r#"{"type":"error","error":"plain string"}"#;
        assert_eq!(
            parse_server_event(raw),
            Some(ServerEvent::ServiceError("plain string".to_string()))
        );
    }

    #[test]
    fn malformed_input_is_ignored() {
        assert_eq!(parse_server_event("not json"), None);
        assert_eq!(parse_server_event(r#"{"no_type":true}"#), None);
        assert_eq!(parse_server_event(r#"{"type":42}"#), None);
    }

    #[test]
    fn unknown_events_carry_their_type() {
        assert_eq!(
            parse_server_event(r#"{"type":"session.created"}"#),
            Some(ServerEvent::Unknown("session.created".to_string()))
        );
    }
}
