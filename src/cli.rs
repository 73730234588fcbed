//! Command-line interface for livescribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Live microphone transcription and translation
#[derive(Parser, Debug)]
#[command(
    name = "livescribe",
    version,
    about = "Live microphone transcription and translation"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (log unrecognized server events)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Audio input device: name fragment, #N, or "default"
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Source language code (e.g., en, tr, de)
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Translate speech into this language instead of transcribing verbatim
    #[arg(long, value_name = "LANG")]
    pub translate_to: Option<String>,

    /// Minimum interval between partial updates in milliseconds
    #[arg(long, value_name = "MS")]
    pub partial_emit_ms: Option<u64>,

    /// Force an audio commit after this many milliseconds without server
    /// turn closure (0 disables)
    #[arg(long, value_name = "MS")]
    pub force_commit_ms: Option<u64>,

    /// Realtime service URL override
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Emit events as line-delimited JSON instead of terminal rendering
    #[arg(long)]
    pub json: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,
}

impl Cli {
    /// Fold CLI flags into a loaded configuration.
    pub fn apply_to(&self, mut config: crate::config::Config) -> crate::config::Config {
        if let Some(device) = &self.device {
            config.audio.device = device.clone();
        }
        if let Some(language) = &self.language {
            config.session.language = language.clone();
        }
        if let Some(target) = &self.translate_to {
            config.session.translate_to = Some(target.clone());
        }
        if let Some(ms) = self.partial_emit_ms {
            config.session.partial_emit_ms = Some(ms);
        }
        if let Some(ms) = self.force_commit_ms {
            config.session.force_commit_ms = ms;
        }
        if let Some(url) = &self.url {
            config.realtime.url = url.clone();
        }
        if self.verbose {
            config.session.debug = true;
        }
        config
    }
}
