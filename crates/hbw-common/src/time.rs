//! Monotonic timestamp helpers.
//!
//! All timestamps are nanosecond counts since an arbitrary monotonic epoch
//! owned by the clock that produced them. Values from different clocks are
//! not comparable.

use std::time::Duration;

/// Nanoseconds since the epoch of the producing clock.
pub type TimestampNs = u64;

/// Convert a duration to whole nanoseconds, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
