//! Tick source for envelope timestamps and wait ages.
//!
//! Abstracted so tests and simulations can drive time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Bus tick, in milliseconds.
pub type Tick = u64;

/// Monotonically non-decreasing time source.
pub trait TickSource: Send + Sync {
    /// Returns the current tick in milliseconds.
    fn now(&self) -> Tick;
}

/// Milliseconds elapsed since the source was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn now(&self) -> Tick {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven tick source.
#[derive(Debug, Default)]
pub struct ManualTicks {
    tick: AtomicU64,
}

impl ManualTicks {
    #[must_use]
    pub fn new(initial: Tick) -> Self {
        Self {
            tick: AtomicU64::new(initial),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.tick.fetch_add(ms, Ordering::SeqCst);
    }

    /// Sets the tick. Moving backwards is ignored.
    pub fn set(&self, tick: Tick) {
        self.tick.fetch_max(tick, Ordering::SeqCst);
    }
}

impl TickSource for ManualTicks {
    fn now(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }
}
