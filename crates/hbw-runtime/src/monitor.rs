//! Wiring for the producer/watchdog pair.
//!
//! [`spawn_monitor`] initializes the heartbeat store from the clock, then
//! starts the producer and watchdog as two named OS threads that share
//! nothing but the store.

use crate::clock::Clock;
use crate::estop::{EmergencyStop, StopReport};
use crate::heartbeat::{heartbeat_channel, HeartbeatReader};
use crate::producer::{ProducerExit, ProducerLoop, StallRelease};
use crate::realtime::apply_thread_realtime;
use crate::watchdog::WatchdogLoop;
use hbw_common::config::{MonitorConfig, RealtimeConfig};
use hbw_common::error::{HbwError, HbwResult};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Thread name of the heartbeat producer.
pub const PRODUCER_THREAD: &str = "hbw-producer";
/// Thread name of the watchdog.
pub const WATCHDOG_THREAD: &str = "hbw-watchdog";

/// A monitor thread whose real-time setup succeeded.
#[derive(Debug)]
pub struct MonitorThread<T> {
    name: &'static str,
    handle: JoinHandle<Option<T>>,
}

impl<T> MonitorThread<T> {
    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the thread's loop has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the thread's loop returns.
    ///
    /// # Errors
    ///
    /// Returns [`HbwError::ThreadPanicked`] if the thread panicked.
    pub fn join(self) -> HbwResult<T> {
        match self.handle.join() {
            Ok(Some(value)) => Ok(value),
            // Setup failures are reported by `spawn_monitor` itself
            Ok(None) => Err(HbwError::Realtime(format!(
                "{} exited before starting",
                self.name
            ))),
            Err(_) => Err(HbwError::ThreadPanicked(self.name.into())),
        }
    }
}

/// Handles to a running producer/watchdog pair.
#[derive(Debug)]
pub struct MonitorHandles {
    /// Producer thread. Only finishes if an injected stall is released.
    pub producer: MonitorThread<ProducerExit>,
    /// Watchdog thread. Only finishes if the stop action returns.
    pub watchdog: MonitorThread<StopReport>,
    /// Present when fault injection is enabled.
    pub stall_release: Option<StallRelease>,
    /// Read access to the shared heartbeat store.
    pub reader: HeartbeatReader,
}

impl MonitorHandles {
    /// Block until both threads conclude.
    ///
    /// In production neither thread concludes; the process ends through the
    /// emergency stop while this call is blocked.
    ///
    /// # Errors
    ///
    /// Returns [`HbwError::ThreadPanicked`] if either thread panicked.
    pub fn join(self) -> HbwResult<(ProducerExit, StopReport)> {
        let exit = self.producer.join()?;
        let report = self.watchdog.join()?;
        Ok((exit, report))
    }
}

/// Start the producer and watchdog threads.
///
/// The heartbeat store is initialized to `clock.now_ns()` before either
/// thread starts. Real-time settings are applied inside each thread before
/// its loop begins. Neither loop runs until both threads are set up, so a
/// failed setup leaves nothing running.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a thread cannot be
/// spawned, or real-time setup fails with `fail_fast`.
pub fn spawn_monitor(
    config: &MonitorConfig,
    clock: Arc<dyn Clock>,
    estop: Arc<dyn EmergencyStop>,
) -> HbwResult<MonitorHandles> {
    config
        .validate()
        .map_err(|e| HbwError::Config(e.to_string()))?;

    let (writer, reader) = heartbeat_channel(clock.now_ns());

    let mut producer = ProducerLoop::new(Arc::clone(&clock), writer, config.producer_period);
    let mut stall_release = None;
    if config.fault_injection.simulate_hang {
        let (stalling, release) = producer.hang_after(config.fault_injection.hang_after);
        producer = stalling;
        stall_release = Some(release);
        info!(
            hang_after_ms = config.fault_injection.hang_after.as_millis(),
            "Fault injection enabled: producer will hang"
        );
    }

    let watchdog = WatchdogLoop::new(
        clock,
        reader.clone(),
        estop,
        config.heartbeat_timeout,
        config.watchdog_period,
    );

    let producer = spawn_rt_thread(
        PRODUCER_THREAD,
        &config.realtime,
        config.realtime.producer_priority,
        move || producer.run(),
    )?;

    // A failure here drops the parked producer, which then exits unstarted
    let watchdog = spawn_rt_thread(
        WATCHDOG_THREAD,
        &config.realtime,
        config.realtime.watchdog_priority,
        move || watchdog.run(),
    )
    .inspect_err(|e| error!(error = %e, "Watchdog failed to start"))?;

    let watchdog = watchdog.start();
    let producer = producer.start();

    info!(
        timeout_ms = config.heartbeat_timeout.as_millis(),
        producer_period_ms = config.producer_period.as_millis(),
        watchdog_period_ms = config.watchdog_period.as_millis(),
        "Monitor started"
    );

    Ok(MonitorHandles {
        producer,
        watchdog,
        stall_release,
        reader,
    })
}

/// A thread that finished its real-time setup and is parked until
/// [`PendingThread::start`]. Dropping it ends the thread without running its
/// body.
#[derive(Debug)]
struct PendingThread<T> {
    thread: MonitorThread<T>,
    go: mpsc::SyncSender<()>,
}

impl<T> PendingThread<T> {
    fn start(self) -> MonitorThread<T> {
        // Capacity 1 and a single send: never blocks
        let _ = self.go.send(());
        self.thread
    }
}

/// Spawn a named thread that applies its real-time settings and then waits
/// to be started before running `body`.
fn spawn_rt_thread<T, F>(
    name: &'static str,
    realtime: &RealtimeConfig,
    priority: u8,
    body: F,
) -> HbwResult<PendingThread<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel::<HbwResult<()>>(1);
    let (go_tx, go_rx) = mpsc::sync_channel::<()>(1);
    let realtime = realtime.clone();

    let handle = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let setup = apply_thread_realtime(&realtime, priority, name).map(|_| ());
            let set_up = setup.is_ok();
            let _ = ready_tx.send(setup);
            (set_up && go_rx.recv().is_ok()).then(body)
        })
        .map_err(|e| HbwError::Spawn {
            thread: name.into(),
            reason: e.to_string(),
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(PendingThread {
            thread: MonitorThread { name, handle },
            go: go_tx,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(HbwError::ThreadPanicked(name.into())),
    }
}
