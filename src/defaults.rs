//! Default configuration constants for livescribe.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// The realtime speech service expects 24kHz 16-bit PCM input; capturing at
/// that rate avoids any resampling on our side.
pub const SAMPLE_RATE: u32 = 24_000;

/// Default number of input channels. Multi-channel input is down-mixed to
/// mono before it reaches the frame queue.
pub const CHANNELS: u16 = 1;

/// Default capture block duration in milliseconds.
///
/// 50ms blocks (1200 samples at 24kHz) keep per-message overhead low while
/// staying well under the service's turn-detection granularity.
pub const BLOCK_MS: u32 = 50;

/// Default capacity of the callback-to-consumer frame queue.
///
/// 200 blocks of 50ms is 10 seconds of audio; under sustained overflow the
/// oldest blocks are dropped so the consumer never sees stale audio.
pub const QUEUE_CAPACITY: usize = 200;

/// Default stall threshold in milliseconds.
///
/// If the capture callback has not delivered a frame for this long, the
/// hardware stream is considered dead and is reopened.
pub const STALL_TIMEOUT_MS: u64 = 1_500;

/// Initial delay before retrying a failed stream reopen.
pub const REOPEN_BACKOFF_BASE_MS: u64 = 100;

/// Default ceiling for the stream-reopen backoff.
pub const REOPEN_BACKOFF_MAX_MS: u64 = 3_000;

/// Initial delay before retrying a failed session attempt.
pub const RECONNECT_BACKOFF_BASE_SECS: u64 = 1;

/// Ceiling for the session reconnect backoff.
pub const RECONNECT_BACKOFF_MAX_SECS: u64 = 10;

/// Default minimum interval between partial transcript emissions (ms).
pub const PARTIAL_EMIT_MS: u64 = 250;

/// Partial emission interval used in translate mode (ms).
///
/// Translations read better with slightly snappier subtitle updates.
pub const PARTIAL_EMIT_TRANSLATE_MS: u64 = 200;

/// Timeout for a single frame pull from the capture queue (ms).
///
/// Short enough that the stall watchdog re-evaluates promptly when the
/// hardware goes quiet.
pub const FRAME_POLL_TIMEOUT_MS: u64 = 500;

/// Default server-side voice activity detection threshold (0.0 to 1.0).
pub const VAD_THRESHOLD: f32 = 0.3;

/// Default trailing silence before the service closes a turn (ms).
pub const VAD_SILENCE_MS: u32 = 250;

/// Default audio padding included before detected speech onset (ms).
pub const VAD_PREFIX_PADDING_MS: u32 = 300;

/// Default realtime service endpoint.
pub const REALTIME_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview";

/// Transcription model requested in the session configuration.
pub const TRANSCRIPTION_MODEL: &str = "gpt-4o-transcribe";

/// Default source language code.
pub const LANGUAGE: &str = "en";

/// Capacity of the frame bridge channel between the capture thread and the
/// session egress task.
pub const FRAME_BRIDGE_CAPACITY: usize = 32;

/// Capacity of the pipeline event channel consumed by collaborators.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
