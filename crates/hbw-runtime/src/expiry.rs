//! Heartbeat expiry predicate.

use hbw_common::time::TimestampNs;

/// Returns true when more than `timeout_ns` has elapsed since `last_ns`.
///
/// Elapsed time exactly equal to the timeout is not expired; only strictly
/// greater is. A `now_ns` earlier than `last_ns` (a heartbeat stored after
/// the clock was sampled) counts as zero elapsed time.
#[inline]
#[must_use]
pub fn is_heartbeat_expired(last_ns: TimestampNs, now_ns: TimestampNs, timeout_ns: u64) -> bool {
    now_ns.saturating_sub(last_ns) > timeout_ns
}
