//! Shared heartbeat store.
//!
//! A single atomic timestamp written by the producer and read by the
//! watchdog. Release stores pair with acquire loads, so a reader never sees
//! a torn value or a value older than one whose store completed before the
//! load began. No locks are involved.
//!
//! Single-writer discipline is enforced by [`heartbeat_channel`]: it hands
//! out exactly one [`HeartbeatWriter`] (not `Clone`) and a cloneable
//! [`HeartbeatReader`].

use crossbeam_utils::CachePadded;
use hbw_common::time::TimestampNs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Last-known-alive timestamp shared between the two loops.
#[derive(Debug)]
pub struct HeartbeatStore {
    /// Padded to keep the producer's stores off unrelated cache lines.
    last_heartbeat_ns: CachePadded<AtomicU64>,
}

impl HeartbeatStore {
    /// Create a store holding `initial_ns`.
    ///
    /// Pass the current clock reading so the watchdog starts with a full
    /// timeout of grace.
    #[must_use]
    pub fn new(initial_ns: TimestampNs) -> Self {
        Self {
            last_heartbeat_ns: CachePadded::new(AtomicU64::new(initial_ns)),
        }
    }

    /// Overwrite the stored timestamp (release ordering).
    #[inline]
    fn set(&self, t: TimestampNs) {
        self.last_heartbeat_ns.store(t, Ordering::Release);
    }

    /// Read the most recently stored timestamp (acquire ordering).
    #[inline]
    #[must_use]
    pub fn get(&self) -> TimestampNs {
        self.last_heartbeat_ns.load(Ordering::Acquire)
    }
}

/// Create a store initialized to `initial_ns` and split it into its single
/// writer and a reader.
#[must_use]
pub fn heartbeat_channel(initial_ns: TimestampNs) -> (HeartbeatWriter, HeartbeatReader) {
    let store = Arc::new(HeartbeatStore::new(initial_ns));
    (
        HeartbeatWriter {
            store: Arc::clone(&store),
        },
        HeartbeatReader { store },
    )
}

/// The only handle allowed to publish heartbeats.
#[derive(Debug)]
pub struct HeartbeatWriter {
    store: Arc<HeartbeatStore>,
}

impl HeartbeatWriter {
    /// Publish a heartbeat.
    #[inline]
    pub fn set(&self, t: TimestampNs) {
        self.store.set(t);
    }
}

/// Read-only handle to the heartbeat store.
#[derive(Debug, Clone)]
pub struct HeartbeatReader {
    store: Arc<HeartbeatStore>,
}

impl HeartbeatReader {
    /// Most recently published heartbeat, or the initial value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> TimestampNs {
        self.store.get()
    }
}
