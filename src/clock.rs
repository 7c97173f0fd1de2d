//! Monotonic nanosecond clock for event timestamps
//!
//! The core consumes caller-supplied `u64` nanosecond timestamps and only
//! requires them to be monotonically non-decreasing. This module provides a
//! conforming source for embedders and tests, anchored at an arbitrary epoch
//! (the clock's construction time).

use std::time::Instant;

/// Trace format tick resolution: 100 ns per tick (10 MHz)
pub const TICKS_PER_SEC: u64 = 10_000_000;

/// Convert a nanosecond duration to trace ticks (truncating)
#[inline]
pub fn ns_to_ticks(ns: u64) -> u64 {
    ns / 100
}

/// Monotonic clock yielding nanoseconds since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since this clock was created
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
