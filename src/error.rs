//! Error types for livescribe.
//!
//! Central error enum used across the crate, with conversion impls for the
//! library errors we surface directly.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LivescribeError>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum LivescribeError {
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("OPENAI_API_KEY is not set and no api_key is configured")]
    MissingCredential,

    #[error("audio device '{selector}' not found; available inputs:{}", format_device_list(.available))]
    DeviceNotFound {
        selector: String,
        available: Vec<String>,
    },

    #[error("audio capture error: {message}")]
    AudioCapture { message: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn format_device_list(names: &[String]) -> String {
    if names.is_empty() {
        return " (none)".to_string();
    }
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        out.push_str(&format!("\n  #{} {}", i, name));
    }
    out
}

/// Whether a service error message indicates the session hit its lifetime
/// limit rather than a real fault. Expired sessions are restarted
/// immediately without backoff.
pub fn is_session_expired(message: &str) -> bool {
    message.contains("session_expired") || message.contains("maximum duration")
}
