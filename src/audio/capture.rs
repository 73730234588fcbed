//! Real audio capture using CPAL (Cross-Platform Audio Library).
//!
//! The engine owns the hardware stream and a bounded frame queue. A stall
//! watchdog in the consumer thread detects dead streams (laptop suspend,
//! device unplug, PipeWire restarts) and reopens them, escalating to a
//! fresh device resolution when reopening the same device does not help.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::mpsc;

use crate::audio::device::{self, DeviceSelector};
use crate::audio::queue::{AudioFrame, FrameProducer, FrameQueue};
use crate::config::CaptureConfig;
use crate::defaults;
use crate::error::{LivescribeError, Result};
use crate::session::backoff::Backoff;

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only accessed through the Mutex in CaptureEngine,
/// so it never crosses thread boundaries while in use.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// How a stream restart picks its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartMode {
    /// Reopen the device we already resolved.
    SameDevice,
    /// Resolve the configured selector again first. Used when reopening the
    /// same device did not cure a stall, which usually means the device
    /// index moved (unplug/replug, PipeWire restart).
    ReResolve,
}

impl RestartMode {
    fn for_consecutive_stalls(count: u32) -> Self {
        if count >= 2 {
            RestartMode::ReResolve
        } else {
            RestartMode::SameDevice
        }
    }
}

/// Captures 16-bit PCM audio and feeds fixed-size mono blocks into the
/// frame queue.
pub struct CaptureEngine {
    cfg: CaptureConfig,
    selector: DeviceSelector,
    queue: FrameQueue,
    stream: Mutex<Option<SendableStream>>,
    device_index: Mutex<Option<usize>>,
    running: AtomicBool,
    reopen_backoff: Mutex<Backoff>,
}

impl CaptureEngine {
    pub fn new(cfg: CaptureConfig) -> Self {
        let selector = DeviceSelector::parse(&cfg.device);
        let queue = FrameQueue::new(cfg.queue_capacity);
        let reopen_backoff = Backoff::new(
            Duration::from_millis(defaults::REOPEN_BACKOFF_BASE_MS),
            cfg.reopen_backoff_max(),
        );
        CaptureEngine {
            cfg,
            selector,
            queue,
            stream: Mutex::new(None),
            device_index: Mutex::new(None),
            running: AtomicBool::new(false),
            reopen_backoff: Mutex::new(reopen_backoff),
        }
    }

    /// Resolve the configured device and open the hardware stream.
    ///
    /// Resolution failures here are fatal: if the device the user asked for
    /// does not exist at startup the right response is an error listing the
    /// alternatives, not a retry loop.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let index = device::resolve(&self.selector)?;
        if let Ok(mut guard) = self.device_index.lock() {
            *guard = index;
        }
        match self.open_stream(index) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Idempotent shutdown. Drops the stream so the callback stops firing.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.stream.lock() {
            guard.take();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the stream is considered dead: running but no frame has
    /// arrived within the stall window.
    fn stalled(&self) -> bool {
        self.is_running() && self.queue.time_since_last_push() > self.cfg.stall_timeout_ms
    }

    /// Tear down and reopen the stream. On failure the reopen backoff delay
    /// is slept in place so the watchdog loop does not spin.
    fn restart(&self, mode: RestartMode) {
        if mode == RestartMode::ReResolve {
            // Keep the old index if resolution fails; the device may come
            // back under the same index.
            match device::resolve(&self.selector) {
                Ok(index) => {
                    if let Ok(mut guard) = self.device_index.lock() {
                        *guard = index;
                    }
                }
                Err(e) => {
                    eprintln!("livescribe: device re-resolution failed: {}", e);
                }
            }
        }

        if let Ok(mut guard) = self.stream.lock() {
            guard.take();
        }

        let index = self.device_index.lock().ok().and_then(|g| *g);
        match self.open_stream(index) {
            Ok(()) => {}
            Err(e) => {
                eprintln!("livescribe: stream reopen failed: {}", e);
                let delay = self
                    .reopen_backoff
                    .lock()
                    .map(|mut b| b.next_delay())
                    .unwrap_or(Duration::from_millis(defaults::REOPEN_BACKOFF_MAX_MS));
                std::thread::sleep(delay);
            }
        }
    }

    /// Build and play a stream on the device at `index`, installing it as
    /// the engine's active stream. Resets the reopen backoff and the stall
    /// watchdog on success.
    fn open_stream(&self, index: Option<usize>) -> Result<()> {
        let dev = device::open_device(index)?;
        let stream = self.build_stream(&dev)?;
        stream.play().map_err(|e| LivescribeError::AudioCapture {
            message: format!("failed to start audio stream: {}", e),
        })?;

        if let Ok(mut guard) = self.stream.lock() {
            *guard = Some(SendableStream(stream));
        }
        if let Ok(mut backoff) = self.reopen_backoff.lock() {
            backoff.reset();
        }
        self.queue.mark_alive();
        Ok(())
    }

    /// Build the input stream, preferring i16 at the configured rate and
    /// falling back to f32 with software conversion. Multi-channel input is
    /// averaged down to mono, and samples are re-blocked into fixed-size
    /// frames regardless of the callback's native buffer size.
    fn build_stream(&self, dev: &cpal::Device) -> Result<cpal::Stream> {
        let channels = self.cfg.channels.max(1);
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: self.cfg.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            eprintln!("livescribe: audio stream error: {}", err);
        };

        let frames_per_block = self.cfg.frames_per_block();
        let channels = channels as usize;

        // Try i16 first; PipeWire/PulseAudio convert transparently.
        let mut blocker = FrameBlocker::new(self.queue.producer(), channels, frames_per_block);
        if let Ok(stream) = dev.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                blocker.push_i16(data);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        // f32 fallback for devices that only expose float formats.
        let mut blocker = FrameBlocker::new(self.queue.producer(), channels, frames_per_block);
        dev.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                blocker.push_f32(data);
            },
            err_callback,
            None,
        )
        .map_err(|e| LivescribeError::AudioCapture {
            message: format!("failed to build input stream: {}", e),
        })
    }

    /// Spawn the consumer thread bridging the frame queue into an async
    /// channel, with the stall watchdog in its loop.
    ///
    /// The thread exits when the engine stops or the receiver is dropped;
    /// the engine itself keeps running in the latter case so a new session
    /// can attach a fresh source.
    pub fn frame_source(self: &Arc<Self>) -> FrameSource {
        let (tx, rx) = mpsc::channel(defaults::FRAME_BRIDGE_CAPACITY);
        let engine = Arc::clone(self);

        std::thread::spawn(move || {
            let poll_timeout = Duration::from_millis(defaults::FRAME_POLL_TIMEOUT_MS);
            let mut consecutive_stalls: u32 = 0;

            while engine.is_running() {
                // Stall check before each pull so a dead stream is noticed
                // even while old frames are still draining.
                if engine.stalled() {
                    consecutive_stalls += 1;
                    eprintln!(
                        "livescribe: capture stalled ({}ms silent), reopening stream",
                        engine.queue.time_since_last_push()
                    );
                    engine.restart(RestartMode::for_consecutive_stalls(consecutive_stalls));
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }

                if let Some(frame) = engine.queue.pop_timeout(poll_timeout) {
                    consecutive_stalls = 0;
                    if tx.blocking_send(frame).is_err() {
                        // Session side went away; leave the engine running.
                        break;
                    }
                }
            }
        });

        FrameSource { rx }
    }
}

/// Accumulates callback samples, down-mixes to mono, and emits fixed-size
/// frames into the queue.
struct FrameBlocker {
    producer: FrameProducer,
    channels: usize,
    frames_per_block: usize,
    carry: Vec<i16>,
}

impl FrameBlocker {
    fn new(producer: FrameProducer, channels: usize, frames_per_block: usize) -> Self {
        FrameBlocker {
            producer,
            channels,
            frames_per_block: frames_per_block.max(1),
            carry: Vec::with_capacity(frames_per_block.max(1) * 2),
        }
    }

    fn push_i16(&mut self, data: &[i16]) {
        if self.channels == 1 {
            self.carry.extend_from_slice(data);
        } else {
            self.carry.extend(data.chunks_exact(self.channels).map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / self.channels as i32) as i16
            }));
        }
        self.drain_blocks();
    }

    fn push_f32(&mut self, data: &[f32]) {
        if self.channels == 1 {
            self.carry.extend(
                data.iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
            );
        } else {
            self.carry.extend(data.chunks_exact(self.channels).map(|frame| {
                let sum: f32 = frame.iter().sum();
                ((sum / self.channels as f32).clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            }));
        }
        self.drain_blocks();
    }

    fn drain_blocks(&mut self) {
        while self.carry.len() >= self.frames_per_block {
            let rest = self.carry.split_off(self.frames_per_block);
            let samples = std::mem::replace(&mut self.carry, rest);
            self.producer.push(AudioFrame { samples });
        }
    }
}

/// Async handle to the capture thread's frame stream.
pub struct FrameSource {
    rx: mpsc::Receiver<AudioFrame>,
}

impl FrameSource {
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    pub fn into_receiver(self) -> mpsc::Receiver<AudioFrame> {
        self.rx
    }
}
