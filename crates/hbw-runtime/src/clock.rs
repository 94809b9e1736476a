//! Monotonic clock sources.
//!
//! [`MonotonicClock`] is backed by [`Instant`] and is unaffected by wall-clock
//! changes. [`ManualClock`] is driven explicitly and exists so the watchdog
//! can be exercised deterministically.

use hbw_common::time::{duration_to_ns, TimestampNs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic nanosecond time provider.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds since the clock's epoch.
    ///
    /// Never decreases across successive calls.
    fn now_ns(&self) -> TimestampNs;
}

/// Clock backed by the OS monotonic clock.
///
/// The epoch is the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> TimestampNs {
        duration_to_ns(self.start_time.elapsed())
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_ns`.
    #[must_use]
    pub fn new(start_ns: TimestampNs) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ns),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now_ns.fetch_add(duration_to_ns(by), Ordering::AcqRel);
    }

    /// Jump to an absolute reading. Going backwards is ignored.
    pub fn set(&self, now_ns: TimestampNs) {
        self.now_ns.fetch_max(now_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ns(&self) -> TimestampNs {
        self.now_ns.load(Ordering::Acquire)
    }
}
