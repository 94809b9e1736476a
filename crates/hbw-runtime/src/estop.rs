//! Emergency stop actions.
//!
//! An emergency stop writes a single `[E-STOP] <reason>` line to stderr and
//! then takes the whole process down. It is fail-stop: there is nothing to
//! undo and nothing to retry.
//!
//! - [`AbortStop`]: abort the process (SIGABRT). Production default.
//! - [`ExitStop`]: exit the process with a configured status code.
//! - [`ProbeStop`]: record the invocation and return. Tests only.

use hbw_common::config::StopAction;
use hbw_common::time::TimestampNs;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::error;

/// Prefix of the diagnostic line written on emergency stop.
pub const ESTOP_PREFIX: &str = "[E-STOP]";

/// What the watchdog observed when it decided to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Human-readable reason, e.g. `Heartbeat timeout > 500ms`.
    pub reason: String,
    /// Heartbeat value read from the store.
    pub last_heartbeat_ns: TimestampNs,
    /// Clock reading at detection.
    pub detected_at_ns: TimestampNs,
    /// Configured timeout.
    pub timeout_ns: u64,
}

impl StopReport {
    /// Time between the last heartbeat and detection.
    #[must_use]
    pub fn silence(&self) -> Duration {
        Duration::from_nanos(self.detected_at_ns.saturating_sub(self.last_heartbeat_ns))
    }

    /// The diagnostic line, without trailing newline.
    #[must_use]
    pub fn diagnostic_line(&self) -> String {
        format!("{ESTOP_PREFIX} {}", self.reason)
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (silent for {})",
            self.reason,
            humantime::format_duration(self.silence())
        )
    }
}

/// Terminal action invoked by the watchdog on heartbeat expiry.
///
/// Production implementations never return. The watchdog calls `trigger`
/// at most once per loop.
pub trait EmergencyStop: Send + Sync {
    /// Stop the process because of `report`.
    fn trigger(&self, report: &StopReport);
}

/// Log the expiry and write the diagnostic line to stderr.
fn announce(report: &StopReport) {
    error!(
        reason = %report.reason,
        last_heartbeat_ns = report.last_heartbeat_ns,
        detected_at_ns = report.detected_at_ns,
        silence_us = report.silence().as_micros(),
        "Emergency stop"
    );
    // Nothing useful can be done if stderr is gone; the stop still happens.
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", report.diagnostic_line());
    let _ = stderr.flush();
}

/// Abort the process after announcing the stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortStop;

impl EmergencyStop for AbortStop {
    fn trigger(&self, report: &StopReport) {
        announce(report);
        std::process::abort();
    }
}

/// Exit the process with `exit_code` after announcing the stop.
#[derive(Debug, Clone, Copy)]
pub struct ExitStop {
    exit_code: i32,
}

impl ExitStop {
    /// Create an exit-based stop.
    #[must_use]
    pub fn new(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

impl EmergencyStop for ExitStop {
    fn trigger(&self, report: &StopReport) {
        announce(report);
        std::process::exit(self.exit_code);
    }
}

/// Build the process-terminating stop for a configured action.
#[must_use]
pub fn stop_for_action(action: StopAction, exit_code: i32) -> Arc<dyn EmergencyStop> {
    match action {
        StopAction::Abort => Arc::new(AbortStop),
        StopAction::Exit => Arc::new(ExitStop::new(exit_code)),
    }
}

/// One recorded [`ProbeStop`] invocation.
#[derive(Debug, Clone)]
pub struct ProbeEvent {
    /// Report passed to the stop.
    pub report: StopReport,
    /// Wall time of the invocation on the test's monotonic clock.
    pub at: Instant,
}

/// Test probe that records invocations instead of terminating.
#[derive(Debug, Default)]
pub struct ProbeStop {
    events: Mutex<Vec<ProbeEvent>>,
}

impl ProbeStop {
    /// Create an empty probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the stop was triggered.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.lock().len()
    }

    /// All recorded invocations.
    #[must_use]
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.lock().clone()
    }

    /// First recorded invocation, if any.
    #[must_use]
    pub fn first(&self) -> Option<ProbeEvent> {
        self.lock().first().cloned()
    }

    /// Poll until the stop fires or `timeout` elapses.
    #[must_use]
    pub fn wait_for_trigger(&self, timeout: Duration) -> Option<ProbeEvent> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(1);

        loop {
            if let Some(event) = self.first() {
                return Some(event);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProbeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EmergencyStop for ProbeStop {
    fn trigger(&self, report: &StopReport) {
        let at = Instant::now();
        announce(report);
        self.lock().push(ProbeEvent {
            report: report.clone(),
            at,
        });
    }
}
