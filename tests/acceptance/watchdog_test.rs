//! Heartbeat timeout acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Steady state (100ms beats, 10ms polls, 500ms timeout) never stops
//! - A producer that stops at time T is stopped in (T + 500ms, T + 510ms]
//!   plus scheduling slack, with the timeout in the reason
//! - No heartbeat is stored after the stall begins
//! - A heartbeat arriving after the stop does not undo it

use super::common::{hanging_config, probe_monitor, reference_config, release_stall, SCHED_SLACK};
use hbw_common::config::MonitorConfig;
use hbw_common::state::MonitorState;
use hbw_runtime::{
    heartbeat_channel, Clock, MonotonicClock, PollOutcome, ProbeStop, ProducerExit, WatchdogLoop,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_millis(500);
const POLL: Duration = Duration::from_millis(10);

#[test]
fn test_steady_state_never_stops() {
    let (handles, probe) = probe_monitor(&reference_config());
    let first = handles.reader.get();

    assert!(
        probe.wait_for_trigger(Duration::from_millis(2000)).is_none(),
        "emergency stop fired in steady state: {:?}",
        probe.first().map(|e| e.report)
    );
    assert!(handles.reader.get() > first, "producer never published");
    assert!(!handles.watchdog.is_finished());
    assert!(!handles.producer.is_finished());
}

#[test]
fn test_hang_detected_within_one_poll() {
    let hang_after = Duration::from_millis(300);
    let (handles, probe) = probe_monitor(&hanging_config(hang_after));

    let event = probe
        .wait_for_trigger(hang_after + TIMEOUT + Duration::from_secs(2))
        .expect("hung producer was not detected");
    let report = event.report;

    // T is the last store; detection is strictly after T + timeout
    let silence = report.silence();
    assert!(silence > TIMEOUT, "stopped early: {silence:?}");
    assert!(
        silence <= TIMEOUT + POLL + SCHED_SLACK,
        "detection too late: {silence:?}"
    );
    assert!(report.reason.contains("Heartbeat timeout > 500ms"));

    // The producer ran before hanging
    assert!(report.last_heartbeat_ns > 0);

    // No further heartbeats after the stall
    thread::sleep(Duration::from_millis(150));
    assert_eq!(handles.reader.get(), report.last_heartbeat_ns);
    assert_eq!(probe.invocations(), 1);

    release_stall(&handles);
    let (exit, joined) = handles.join().expect("monitor threads should join");
    assert_eq!(joined, report);
    let ProducerExit::StallReleased { beats } = exit;
    assert!(beats >= 2, "expected ~3 beats before hanging, got {beats}");
}

#[test]
fn test_immediate_hang_detected_from_init_value() {
    let start = Instant::now();
    let (handles, probe) = probe_monitor(&hanging_config(Duration::ZERO));
    let init = handles.reader.get();

    let event = probe
        .wait_for_trigger(TIMEOUT + Duration::from_secs(2))
        .expect("hung producer was not detected");

    assert_eq!(event.report.last_heartbeat_ns, init);
    assert!(event.at.duration_since(start) > TIMEOUT);

    release_stall(&handles);
    let (exit, _) = handles.join().expect("monitor threads should join");
    assert_eq!(exit, ProducerExit::StallReleased { beats: 0 });
}

#[test]
fn test_late_heartbeat_does_not_undo_stop() {
    let clock = Arc::new(MonotonicClock::new());
    let probe = Arc::new(ProbeStop::new());
    let (writer, reader) = heartbeat_channel(clock.now_ns());
    let last = reader.get();

    let watchdog = WatchdogLoop::new(clock.clone(), reader, probe.clone(), TIMEOUT, POLL);
    let watchdog = thread::spawn(move || watchdog.run());

    let event = probe
        .wait_for_trigger(TIMEOUT + Duration::from_secs(2))
        .expect("silent heartbeat was not detected");
    assert!(event.report.silence() > TIMEOUT);

    // Producer "recovers" around last + 700ms
    let recover_at = Duration::from_millis(700);
    let since_last = Duration::from_nanos(clock.now_ns() - last);
    if let Some(wait) = recover_at.checked_sub(since_last) {
        thread::sleep(wait);
    }
    writer.set(clock.now_ns());

    let report = watchdog.join().expect("watchdog thread panicked");
    assert_eq!(report, event.report);

    thread::sleep(Duration::from_millis(50));
    let events = probe.events();
    assert_eq!(events.len(), 1, "stop fired more than once: {events:?}");
    assert_eq!(events[0].report, report);
}

#[test]
fn test_stopped_watchdog_ignores_fresh_heartbeats() {
    let clock = Arc::new(MonotonicClock::new());
    let probe = Arc::new(ProbeStop::new());
    let (writer, reader) = heartbeat_channel(clock.now_ns());
    let timeout = Duration::from_millis(20);
    let mut watchdog = WatchdogLoop::new(clock.clone(), reader, probe.clone(), timeout, POLL);

    thread::sleep(timeout + Duration::from_millis(10));
    let PollOutcome::Stopped(report) = watchdog.poll() else {
        panic!("expected expiry after {timeout:?} of silence");
    };

    writer.set(clock.now_ns());
    assert_eq!(watchdog.poll(), PollOutcome::Stopped(report));
    assert_eq!(watchdog.state(), MonitorState::Stopped);
    assert_eq!(probe.invocations(), 1);
}

#[test]
fn test_fast_ratio_latency_bound() {
    let config = MonitorConfig {
        heartbeat_timeout: Duration::from_millis(100),
        producer_period: Duration::from_millis(20),
        watchdog_period: Duration::from_millis(5),
        ..hanging_config(Duration::from_millis(100))
    };
    let (handles, probe) = probe_monitor(&config);

    let event = probe
        .wait_for_trigger(Duration::from_secs(3))
        .expect("hung producer was not detected");
    let silence = event.report.silence();
    assert!(silence > config.heartbeat_timeout);
    assert!(silence <= config.heartbeat_timeout + config.watchdog_period + SCHED_SLACK);
    assert_eq!(event.report.reason, "Heartbeat timeout > 100ms");

    release_stall(&handles);
    handles.join().expect("monitor threads should join");
}
