use thiserror::Error;

/// Watchdog error types covering configuration, startup, and state faults.
///
/// Heartbeat expiry is deliberately absent: it is never returned to a caller,
/// it is escalated straight to the emergency stop action.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HbwError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Real-time scheduling or memory locking could not be applied.
    #[error("real-time setup failed: {0}")]
    Realtime(String),

    /// A monitor thread could not be spawned.
    #[error("failed to spawn {thread} thread: {reason}")]
    Spawn {
        /// Name of the thread that failed to start.
        thread: String,
        /// OS-level reason.
        reason: String,
    },

    /// A monitor thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for watchdog operations.
pub type HbwResult<T> = Result<T, HbwError>;
