use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;

use crate::defaults;
use crate::error::{LivescribeError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: CaptureConfig,
    pub session: SessionConfig,
    pub realtime: RealtimeConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device selector: empty/"default"/"auto", "#N", or a name fragment.
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration of one capture block in milliseconds.
    pub block_ms: u32,
    /// Capacity of the frame queue in blocks; overflow drops the oldest.
    pub queue_capacity: usize,
    /// Silence on the callback for this long marks the stream as stalled.
    pub stall_timeout_ms: u64,
    /// Ceiling for the stream-reopen backoff.
    pub reopen_backoff_max_ms: u64,
}

/// Streaming session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Source language code sent to the transcription model.
    pub language: String,
    /// Target language; when set the session translates instead of
    /// transcribing verbatim.
    pub translate_to: Option<String>,
    /// Restrict responses to the text modality.
    pub text_only: bool,
    /// Minimum interval between partial emissions (ms). When unset a
    /// mode-dependent default applies.
    pub partial_emit_ms: Option<u64>,
    /// Force a buffer commit after this long without server turn closure.
    /// Zero disables the timer.
    pub force_commit_ms: u64,
    pub vad_threshold: f32,
    pub vad_silence_ms: u32,
    pub vad_prefix_padding_ms: u32,
    /// Log unrecognized server events to stderr.
    pub debug: bool,
}

/// Realtime service endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeConfig {
    pub url: String,
    /// API key; the OPENAI_API_KEY environment variable takes precedence.
    pub api_key: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            block_ms: defaults::BLOCK_MS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            stall_timeout_ms: defaults::STALL_TIMEOUT_MS,
            reopen_backoff_max_ms: defaults::REOPEN_BACKOFF_MAX_MS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: defaults::LANGUAGE.to_string(),
            translate_to: None,
            text_only: true,
            partial_emit_ms: None,
            force_commit_ms: 0,
            vad_threshold: defaults::VAD_THRESHOLD,
            vad_silence_ms: defaults::VAD_SILENCE_MS,
            vad_prefix_padding_ms: defaults::VAD_PREFIX_PADDING_MS,
            debug: false,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: defaults::REALTIME_URL.to_string(),
            api_key: None,
        }
    }
}

impl CaptureConfig {
    /// Samples per capture block.
    pub fn frames_per_block(&self) -> usize {
        (self.sample_rate as u64 * self.block_ms as u64 / 1000).max(1) as usize
    }

    pub fn reopen_backoff_max(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reopen_backoff_max_ms)
    }
}

impl SessionConfig {
    pub fn is_translate(&self) -> bool {
        self.translate_to
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Partial emission interval: the configured value, or the
    /// mode-dependent default.
    pub fn effective_partial_emit_ms(&self) -> u64 {
        self.partial_emit_ms.unwrap_or(if self.is_translate() {
            defaults::PARTIAL_EMIT_TRANSLATE_MS
        } else {
            defaults::PARTIAL_EMIT_MS
        })
    }

    /// The instruction prompt sent in session.update.
    pub fn instructions(&self) -> String {
        match self.translate_to.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(target) => format!(
                "You will hear {} speech. Translate it into {}. \
                 Output ONLY the translation of what was said. \
                 Do not add apologies, prefaces, labels, or extra words.",
                self.language, target
            ),
            None => "Transcribe ONLY what you hear. \
                 Return verbatim transcript in the original language. \
                 Do not translate, summarize, apologize, or add words."
                .to_string(),
        }
    }
}

impl RealtimeConfig {
    /// Resolve the API key: environment first, then the config file.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            return Ok(key);
        }
        self.api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .cloned()
            .ok_or(LivescribeError::MissingCredential)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Panics on invalid TOML rather than silently running misconfigured.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(LivescribeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                panic!("Failed to load config from {}: {}", path.display(), e);
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LIVESCRIBE_DEVICE → audio.device
    /// - LIVESCRIBE_LANGUAGE → session.language
    /// - LIVESCRIBE_TRANSLATE_TO → session.translate_to
    /// - LIVESCRIBE_REALTIME_URL → realtime.url
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("LIVESCRIBE_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = device;
        }

        if let Ok(language) = std::env::var("LIVESCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.session.language = language;
        }

        if let Ok(target) = std::env::var("LIVESCRIBE_TRANSLATE_TO")
            && !target.is_empty()
        {
            self.session.translate_to = Some(target);
        }

        if let Ok(url) = std::env::var("LIVESCRIBE_REALTIME_URL")
            && !url.is_empty()
        {
            self.realtime.url = url;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/livescribe/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("livescribe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_livescribe_env() {
        remove_env("LIVESCRIBE_DEVICE");
        remove_env("LIVESCRIBE_LANGUAGE");
        remove_env("LIVESCRIBE_TRANSLATE_TO");
        remove_env("LIVESCRIBE_REALTIME_URL");
        remove_env("OPENAI_API_KEY");
    }

    #[test]
    fn default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.device, "");
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.block_ms, 50);
        assert_eq!(config.audio.queue_capacity, 200);
        assert_eq!(config.audio.stall_timeout_ms, 1_500);

        assert_eq!(config.session.language, "en");
        assert_eq!(config.session.translate_to, None);
        assert!(config.session.text_only);
        assert_eq!(config.session.force_commit_ms, 0);
        assert_eq!(config.session.vad_threshold, 0.3);
        assert_eq!(config.session.vad_silence_ms, 250);
        assert_eq!(config.session.vad_prefix_padding_ms, 300);

        assert!(config.realtime.url.starts_with("wss://"));
        assert_eq!(config.realtime.api_key, None);
    }

    #[test]
    fn frames_per_block_at_defaults() {
        let audio = CaptureConfig::default();
        assert_eq!(audio.frames_per_block(), 1200);
    }

    #[test]
    fn load_from_toml_file() {
        let toml_content = r##"
            [audio]
            device = "#2"
            sample_rate = 16000
            block_ms = 100

            [session]
            language = "tr"
            translate_to = "en"
            force_commit_ms = 4000

            [realtime]
            url = "wss://example.test/v1/realtime"
        "##;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.device, "#2");
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.block_ms, 100);
        assert_eq!(config.audio.frames_per_block(), 1600);

        assert_eq!(config.session.language, "tr");
        assert_eq!(config.session.translate_to, Some("en".to_string()));
        assert_eq!(config.session.force_commit_ms, 4000);

        assert_eq!(config.realtime.url, "wss://example.test/v1/realtime");
    }

    #[test]
    fn load_partial_config_uses_defaults() {
        let toml_content = r#"
            [session]
            language = "de"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.session.language, "de");
        assert_eq!(config.audio.sample_rate, 24_000);
        assert!(config.session.text_only);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let result = Config::load(Path::new("/nonexistent/livescribe.toml"));
        assert!(matches!(result, Err(LivescribeError::Io(_))));
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/livescribe.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    #[should_panic(expected = "Failed to load config")]
    fn load_or_default_panics_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not [ valid toml").unwrap();
        let _ = Config::load_or_default(temp_file.path());
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_livescribe_env();

        set_env("LIVESCRIBE_DEVICE", "USB Mic");
        set_env("LIVESCRIBE_LANGUAGE", "tr");
        set_env("LIVESCRIBE_TRANSLATE_TO", "en");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.audio.device, "USB Mic");
        assert_eq!(config.session.language, "tr");
        assert_eq!(config.session.translate_to, Some("en".to_string()));

        clear_livescribe_env();
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_livescribe_env();

        set_env("LIVESCRIBE_LANGUAGE", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.session.language, "en");

        clear_livescribe_env();
    }

    #[test]
    fn api_key_env_beats_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_livescribe_env();

        let realtime = RealtimeConfig {
            api_key: Some("file-key".to_string()),
            ..Default::default()
        };

        set_env("OPENAI_API_KEY", "env-key");
        assert_eq!(realtime.resolve_api_key().unwrap(), "env-key");

        remove_env("OPENAI_API_KEY");
        assert_eq!(realtime.resolve_api_key().unwrap(), "file-key");

        let bare = RealtimeConfig::default();
        assert!(matches!(
            bare.resolve_api_key(),
            Err(LivescribeError::MissingCredential)
        ));

        clear_livescribe_env();
    }

    #[test]
    fn instructions_follow_mode() {
        let mut session = SessionConfig::default();
        assert!(session.instructions().contains("verbatim transcript"));
        assert!(!session.is_translate());

        session.translate_to = Some("Turkish".to_string());
        assert!(session.is_translate());
        let instr = session.instructions();
        assert!(instr.contains("Translate it into Turkish"));
        assert!(instr.contains("en speech"));

        // Whitespace-only target means transcribe mode.
        session.translate_to = Some("  ".to_string());
        assert!(!session.is_translate());
        assert!(session.instructions().contains("verbatim transcript"));
    }

    #[test]
    fn partial_emit_interval_follows_mode() {
        let mut session = SessionConfig::default();
        assert_eq!(session.effective_partial_emit_ms(), 250);

        session.translate_to = Some("en".to_string());
        assert_eq!(session.effective_partial_emit_ms(), 200);

        session.partial_emit_ms = Some(100);
        assert_eq!(session.effective_partial_emit_ms(), 100);
    }
}
