//! Common utilities for acceptance tests.

use hbw_common::config::MonitorConfig;
use hbw_runtime::{spawn_monitor, MonitorHandles, MonotonicClock, ProbeStop};
use std::sync::Arc;
use std::time::Duration;

/// Extra time allowed for OS scheduling on top of nominal bounds.
pub const SCHED_SLACK: Duration = Duration::from_millis(50);

/// Reference timing: 500ms timeout, 100ms producer, 10ms watchdog.
pub fn reference_config() -> MonitorConfig {
    MonitorConfig::default()
}

/// Reference timing with the producer hanging after `hang_after`.
pub fn hanging_config(hang_after: Duration) -> MonitorConfig {
    let mut config = reference_config();
    config.fault_injection.simulate_hang = true;
    config.fault_injection.hang_after = hang_after;
    config
}

/// Start a monitor whose emergency stop is a recording probe.
pub fn probe_monitor(config: &MonitorConfig) -> (MonitorHandles, Arc<ProbeStop>) {
    let probe = Arc::new(ProbeStop::new());
    let handles = spawn_monitor(config, Arc::new(MonotonicClock::new()), probe.clone())
        .expect("monitor should start");
    (handles, probe)
}

/// Release an injected stall so the producer thread can be joined.
pub fn release_stall(handles: &MonitorHandles) {
    if let Some(release) = &handles.stall_release {
        release.release();
    }
}
