//! Heartbeat producer loop.
//!
//! The producer proves liveness by storing the current clock reading into
//! the heartbeat store on a fixed period. It never reads the store.
//!
//! Fault injection replaces the store with a permanent stall, simulating a
//! hung control thread. The stall parks the thread instead of spinning, and
//! a [`StallRelease`] handle lets tests retire the stalled thread. Once
//! stalled, the producer never stores again, released or not.

use crate::clock::Clock;
use crate::heartbeat::HeartbeatWriter;
use crossbeam_utils::sync::{Parker, Unparker};
use hbw_common::time::duration_to_ns;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a producer loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// The injected stall was released. No heartbeat was stored after the
    /// stall began.
    StallReleased {
        /// Heartbeats stored before the stall.
        beats: u64,
    },
}

/// Handle that ends an injected producer stall.
///
/// Dropping it leaves the stall in place for the life of the process.
#[derive(Debug, Clone)]
pub struct StallRelease {
    released: Arc<AtomicBool>,
    unparker: Unparker,
}

impl StallRelease {
    /// Wake the stalled producer so its thread can be joined.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        self.unparker.unpark();
    }
}

/// Never-signalled wait used for fault injection.
#[derive(Debug)]
struct Stall {
    after: Duration,
    released: Arc<AtomicBool>,
    parker: Parker,
}

impl Stall {
    fn new(after: Duration) -> (Self, StallRelease) {
        let parker = Parker::new();
        let released = Arc::new(AtomicBool::new(false));
        let release = StallRelease {
            released: Arc::clone(&released),
            unparker: parker.unparker().clone(),
        };
        (
            Self {
                after,
                released,
                parker,
            },
            release,
        )
    }

    fn wait(&self) {
        // park() may return spuriously
        while !self.released.load(Ordering::Acquire) {
            self.parker.park();
        }
    }
}

/// Periodically publishes heartbeats.
pub struct ProducerLoop {
    clock: Arc<dyn Clock>,
    writer: HeartbeatWriter,
    period: Duration,
    stall: Option<Stall>,
    beats: u64,
}

impl std::fmt::Debug for ProducerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerLoop")
            .field("period", &self.period)
            .field("stall", &self.stall)
            .field("beats", &self.beats)
            .finish_non_exhaustive()
    }
}

impl ProducerLoop {
    /// Create a producer publishing every `period`.
    pub fn new(clock: Arc<dyn Clock>, writer: HeartbeatWriter, period: Duration) -> Self {
        Self {
            clock,
            writer,
            period,
            stall: None,
            beats: 0,
        }
    }

    /// Enable fault injection: after running normally for `after` (measured
    /// on the producer's clock), stall before the next store.
    ///
    /// `Duration::ZERO` stalls before the first store.
    #[must_use]
    pub fn hang_after(mut self, after: Duration) -> (Self, StallRelease) {
        let (stall, release) = Stall::new(after);
        self.stall = Some(stall);
        (self, release)
    }

    /// Heartbeats stored so far.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// Store one heartbeat.
    pub fn beat(&mut self) {
        self.writer.set(self.clock.now_ns());
        self.beats += 1;
    }

    /// Run until the process ends.
    ///
    /// Only returns if fault injection is enabled and the stall is released.
    pub fn run(mut self) -> ProducerExit {
        let started_ns = self.clock.now_ns();
        debug!(period_ms = self.period.as_millis(), "Producer loop started");

        loop {
            if let Some(stall) = &self.stall {
                let elapsed_ns = self.clock.now_ns().saturating_sub(started_ns);
                if elapsed_ns >= duration_to_ns(stall.after) {
                    warn!(beats = self.beats, "Fault injection: producer stalled");
                    stall.wait();
                    debug!("Producer stall released");
                    return ProducerExit::StallReleased { beats: self.beats };
                }
            }

            self.beat();
            thread::sleep(self.period);
        }
    }
}
