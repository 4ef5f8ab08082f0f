//! Performance clock with an injectable time source.
//!
//! The scheduler and engine never read the wall clock directly. They go
//! through a [`TimeSource`], so tests can drive time by hand with
//! [`ManualTime`] and assert dispatch order deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond counter.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real time, measured from construction.
#[derive(Clone, Debug)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis().min(i64::MAX as u128) as i64
    }
}

/// Hand-driven time. Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct ManualTime {
    now: Arc<AtomicI64>,
}

impl ManualTime {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set_ms(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Elapsed-time clock for one performance run.
///
/// Reports milliseconds since the last [`start`](PerformanceClock::start);
/// a stopped clock reports 0.
#[derive(Clone)]
pub struct PerformanceClock {
    source: Arc<dyn TimeSource>,
    started_at: Option<i64>,
}

impl PerformanceClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            started_at: None,
        }
    }

    /// A clock backed by [`MonotonicTime`].
    pub fn monotonic() -> Self {
        Self::new(Arc::new(MonotonicTime::new()))
    }

    /// Start (or restart) the run at the current source time.
    pub fn start(&mut self) {
        self.started_at = Some(self.source.now_ms());
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed_ms(&self) -> i64 {
        match self.started_at {
            Some(start) => self.source.now_ms().saturating_sub(start),
            None => 0,
        }
    }
}

impl std::fmt::Debug for PerformanceClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceClock")
            .field("running", &self.is_running())
            .field("elapsed_ms", &self.elapsed_ms())
            .finish()
    }
}
