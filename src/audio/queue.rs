//! Bounded frame queue between the capture callback and the consumer.
//!
//! The callback side must never block, so overflow evicts the oldest frame
//! instead of waiting. A monotonic push timestamp feeds the stall watchdog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// A block of mono 16-bit PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Samples encoded as little-endian bytes, ready for base64 framing.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        if sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / sample_rate as u64
    }
}

/// Producer handle used inside the audio callback. Cloneable so a fresh
/// stream after a reopen can keep pushing into the same queue.
#[derive(Clone)]
pub struct FrameProducer {
    tx: Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
    last_push_ms: Arc<AtomicU64>,
    epoch: Instant,
}

impl FrameProducer {
    /// Push a frame, evicting the oldest one if the queue is full.
    pub fn push(&self, frame: AudioFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => self.stamp(),
            Err(TrySendError::Full(frame)) => {
                // Drop the oldest frame to make room. If a concurrent pop
                // already made room the second try_send just succeeds.
                let _ = self.rx.try_recv();
                if self.tx.try_send(frame).is_ok() {
                    self.stamp();
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Milliseconds since the last successful push (or queue creation).
    pub fn time_since_last_push(&self) -> u64 {
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_push_ms.load(Ordering::Relaxed))
    }

    /// Reset the watchdog timestamp. Called after a stream reopen so the
    /// fresh stream gets a full stall window before being judged.
    pub fn mark_alive(&self) {
        self.stamp();
    }

    fn stamp(&self) {
        self.last_push_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

/// The consumer side of the queue.
pub struct FrameQueue {
    producer: FrameProducer,
    rx: Receiver<AudioFrame>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        let producer = FrameProducer {
            tx,
            rx: rx.clone(),
            last_push_ms: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        };
        FrameQueue { producer, rx }
    }

    pub fn producer(&self) -> FrameProducer {
        self.producer.clone()
    }

    /// Blocking pop with a timeout; returns None on timeout or when all
    /// producers are gone.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn time_since_last_push(&self) -> u64 {
        self.producer.time_since_last_push()
    }

    pub fn mark_alive(&self) {
        self.producer.mark_alive();
    }
}
