//! Real-time scheduling and memory locking for the monitor threads.
//!
//! - Memory locking (mlockall) so neither loop page-faults mid-cycle
//! - Per-thread real-time scheduling (SCHED_FIFO/SCHED_RR)
//! - CPU affinity for the calling thread
//!
//! Permission failures degrade to warnings unless `fail_fast` is set.

use hbw_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy};
use hbw_common::error::{HbwError, HbwResult};
use tracing::{debug, info, warn};

/// Real-time settings actually applied to one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRtStatus {
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<u8>,
    /// CPUs the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Lock current and future memory pages if configured.
///
/// Returns whether memory ended up locked.
///
/// # Errors
///
/// Returns an error if locking fails and `fail_fast` is set, or fails for a
/// reason other than missing privileges.
pub fn lock_process_memory(config: &RealtimeConfig) -> HbwResult<bool> {
    if !config.enabled || !config.lock_memory {
        return Ok(false);
    }
    let locked = lock_memory()?;
    if !locked && config.fail_fast {
        return Err(HbwError::Realtime(
            "mlockall not permitted (fail_fast=true)".into(),
        ));
    }
    Ok(locked)
}

/// Apply the configured policy, `priority` and CPU affinity to the calling
/// thread.
///
/// # Errors
///
/// Returns an error if a setting fails and `fail_fast` is set, or fails for
/// a reason other than missing privileges.
pub fn apply_thread_realtime(
    config: &RealtimeConfig,
    priority: u8,
    thread: &str,
) -> HbwResult<ThreadRtStatus> {
    if !config.enabled {
        debug!(thread, "Real-time scheduling disabled");
        return Ok(ThreadRtStatus::default());
    }

    let (scheduler_policy, scheduler_priority) = set_scheduler(config.policy, priority)?;
    if scheduler_policy.is_none() && config.fail_fast {
        return Err(HbwError::Realtime(format!(
            "{thread}: real-time scheduling not permitted (fail_fast=true)"
        )));
    }

    let cpu_affinity = set_cpu_affinity(&config.cpu_affinity)?;

    let status = ThreadRtStatus {
        scheduler_policy,
        scheduler_priority,
        cpu_affinity,
    };
    info!(thread, ?status, "Thread real-time setup complete");
    Ok(status)
}

#[cfg(target_os = "linux")]
fn lock_memory() -> HbwResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked");
            Ok(true)
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!("mlockall failed with EPERM - running without CAP_IPC_LOCK");
            Ok(false)
        }
        Err(e) => Err(HbwError::Realtime(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> HbwResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Set the scheduler of the calling thread.
#[cfg(target_os = "linux")]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> HbwResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => return Ok((Some(SchedPolicy::Other), None)),
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Scheduler priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: pid 0 targets the calling thread; `param` outlives the call.
    #[allow(unsafe_code)]
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!("sched_setscheduler failed with EPERM - running without CAP_SYS_NICE");
            return Ok((None, None));
        }
        return Err(HbwError::Realtime(format!(
            "sched_setscheduler failed: {err}"
        )));
    }

    Ok((Some(policy), Some(clamped)))
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> HbwResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(
        ?policy,
        priority, "Real-time scheduling not available on this platform"
    );
    Ok((None, None))
}

/// Pin the calling thread.
#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> HbwResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = match affinity {
        CpuAffinity::None => return Ok(None),
        CpuAffinity::Single(cpu) => vec![*cpu],
        CpuAffinity::Set(cpus) => cpus.clone(),
    };

    if cpus.is_empty() {
        return Ok(None);
    }

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| HbwError::Config(format!("Invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => Ok(Some(cpus)),
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "Invalid CPU set - some CPUs may not exist");
            Ok(None)
        }
        Err(e) => Err(HbwError::Realtime(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> HbwResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}
