//! livescribe - live microphone transcription and translation
//!
//! Captures audio from a local input device and streams it to a realtime
//! speech service over WebSocket, emitting throttled partial transcripts
//! and final turn text on a single event channel. Sessions reconnect with
//! backoff; expired sessions restart immediately.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
#[cfg(feature = "cpal-audio")]
pub mod pipeline;
pub mod session;
pub mod types;

// Core surface
pub use config::Config;
pub use error::{LivescribeError, Result};
pub use types::{PipelineEvent, TranscriptChunk};

#[cfg(feature = "cpal-audio")]
pub use pipeline::{Pipeline, PipelineHandle};

pub use session::StreamSession;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
