//! Heartbeat watchdog loop.
//!
//! Polls the heartbeat store on a fixed cadence and invokes the emergency
//! stop the first time the heartbeat is older than the timeout.
//!
//! If the producer stops updating at time `T`, the stop fires no later than
//! `T + timeout + poll_period` (plus scheduling jitter on the sleep).
//!
//! There is no retry and no debounce: one expired observation is final. The
//! loop moves MONITORING → STOPPED before calling the stop action, so even a
//! stop action that returns (the test probe) is never called twice, and a
//! heartbeat arriving afterwards changes nothing.

use crate::clock::Clock;
use crate::estop::{EmergencyStop, StopReport};
use crate::expiry::is_heartbeat_expired;
use crate::heartbeat::HeartbeatReader;
use hbw_common::state::MonitorState;
use hbw_common::time::duration_to_ns;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a single watchdog poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Heartbeat is fresh.
    Alive {
        /// Time since the last heartbeat at this poll.
        silence: Duration,
    },
    /// The emergency stop has fired (on this poll or an earlier one).
    Stopped(StopReport),
}

/// Watchdog enforcing a maximum silence interval on the heartbeat.
pub struct WatchdogLoop {
    clock: Arc<dyn Clock>,
    reader: HeartbeatReader,
    estop: Arc<dyn EmergencyStop>,
    timeout: Duration,
    poll_period: Duration,
    state: MonitorState,
    report: Option<StopReport>,
}

impl std::fmt::Debug for WatchdogLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogLoop")
            .field("timeout", &self.timeout)
            .field("poll_period", &self.poll_period)
            .field("state", &self.state)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl WatchdogLoop {
    /// Create a watchdog in the MONITORING state.
    pub fn new(
        clock: Arc<dyn Clock>,
        reader: HeartbeatReader,
        estop: Arc<dyn EmergencyStop>,
        timeout: Duration,
        poll_period: Duration,
    ) -> Self {
        Self {
            clock,
            reader,
            estop,
            timeout,
            poll_period,
            state: MonitorState::Monitoring,
            report: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Reason text passed to the emergency stop.
    #[must_use]
    pub fn reason(&self) -> String {
        format!(
            "Heartbeat timeout > {}",
            humantime::format_duration(self.timeout)
        )
    }

    /// Run one MONITORING iteration without sleeping.
    pub fn poll(&mut self) -> PollOutcome {
        if let Some(report) = &self.report {
            return PollOutcome::Stopped(report.clone());
        }

        let last = self.reader.get();
        let now = self.clock.now_ns();

        if !is_heartbeat_expired(last, now, duration_to_ns(self.timeout)) {
            return PollOutcome::Alive {
                silence: Duration::from_nanos(now.saturating_sub(last)),
            };
        }

        let report = StopReport {
            reason: self.reason(),
            last_heartbeat_ns: last,
            detected_at_ns: now,
            timeout_ns: duration_to_ns(self.timeout),
        };

        if let Err(e) = self.state.transition_to(MonitorState::Stopped) {
            // Unreachable while `report` is None; stop regardless.
            warn!(error = %e, "Unexpected watchdog state on expiry");
        }
        self.report = Some(report.clone());
        self.estop.trigger(&report);

        PollOutcome::Stopped(report)
    }

    /// Poll on the configured cadence until the heartbeat expires.
    ///
    /// With a process-terminating stop action this never returns. With a
    /// returning action the report is handed back once the stop has fired.
    pub fn run(mut self) -> StopReport {
        info!(
            timeout_ms = self.timeout.as_millis(),
            poll_ms = self.poll_period.as_millis(),
            "Watchdog monitoring"
        );

        loop {
            if let PollOutcome::Stopped(report) = self.poll() {
                debug!("Watchdog loop finished");
                return report;
            }
            thread::sleep(self.poll_period);
        }
    }
}
