//! Shared types crossing module boundaries.

use serde::{Deserialize, Serialize};

/// A piece of transcript text produced by an active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub text: String,
    pub is_final: bool,
}

/// Events emitted on the pipeline's output channel.
///
/// The serialized form is stable and intended for forwarding to external
/// consumers (subtitles overlay, IPC clients) as line-delimited JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// In-progress transcript for the current turn; replaces any previous
    /// partial for the same turn.
    Partial { text: String },
    /// Completed turn transcript.
    Final { text: String },
    /// Lifecycle notification ("connected", "restarting_session",
    /// "pipeline_stopped").
    Info { text: String },
    /// Non-fatal error description.
    Error { text: String },
}

impl PipelineEvent {
    pub fn from_chunk(chunk: TranscriptChunk) -> Self {
        if chunk.is_final {
            PipelineEvent::Final { text: chunk.text }
        } else {
            PipelineEvent::Partial { text: chunk.text }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}
