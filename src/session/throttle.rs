//! Time-gated emission policies for the streaming session.
//!
//! Both the partial emission throttle and the forced commit timer take an
//! injectable clock so tests can drive them deterministically.

use std::time::{Duration, Instant};

/// Abstraction over time to enable deterministic testing.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Rate-limits partial transcript emissions within a turn.
///
/// The first delta of a turn is always emitted immediately; later deltas
/// pass only when at least `min_interval` has elapsed since the last
/// emission. Finals are never throttled.
pub struct PartialThrottle<C: Clock = SystemClock> {
    min_interval: Duration,
    last_emit: Option<Instant>,
    clock: C,
}

impl PartialThrottle<SystemClock> {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, SystemClock)
    }
}

impl<C: Clock> PartialThrottle<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        PartialThrottle {
            min_interval,
            last_emit: None,
            clock,
        }
    }

    /// Whether a partial may be emitted now. Marks the emission time when
    /// it returns true.
    pub fn should_emit(&mut self) -> bool {
        let now = self.clock.now();
        match self.last_emit {
            None => {
                self.last_emit = Some(now);
                true
            }
            Some(last) if now.duration_since(last) >= self.min_interval => {
                self.last_emit = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    /// Start of a new turn: the next delta is emitted immediately again.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

/// Forces a buffer commit when audio keeps flowing but server-side turn
/// detection never closes a turn.
///
/// Disabled when the interval is zero. Holds off while a response is in
/// flight, and only fires when uncommitted audio is actually pending.
pub struct CommitTimer<C: Clock = SystemClock> {
    interval: Option<Duration>,
    last_commit: Instant,
    pending_bytes: usize,
    clock: C,
}

impl CommitTimer<SystemClock> {
    pub fn new(interval_ms: u64) -> Self {
        Self::with_clock(interval_ms, SystemClock)
    }
}

impl<C: Clock> CommitTimer<C> {
    pub fn with_clock(interval_ms: u64, clock: C) -> Self {
        let last_commit = clock.now();
        CommitTimer {
            interval: (interval_ms > 0).then(|| Duration::from_millis(interval_ms)),
            last_commit,
            pending_bytes: 0,
            clock,
        }
    }

    /// Record audio bytes appended since the last commit.
    pub fn note_sent(&mut self, bytes: usize) {
        self.pending_bytes += bytes;
    }

    /// Whether a forced commit is due. While a response is in flight the
    /// timer is skipped without being rewound, so the commit fires on the
    /// first check after the response completes.
    pub fn should_commit(&self, in_flight: bool) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        if in_flight || self.pending_bytes == 0 {
            return false;
        }
        self.clock.now().duration_since(self.last_commit) >= interval
    }

    pub fn mark_committed(&mut self) {
        self.last_commit = self.clock.now();
        self.pending_bytes = 0;
    }
}
