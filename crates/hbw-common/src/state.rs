//! Watchdog state machine.
//!
//! MONITORING → STOPPED is the only transition. STOPPED is terminal:
//! there is no path back to MONITORING, not even after a fresh heartbeat.

use crate::error::{HbwError, HbwResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical states of the watchdog loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    /// Polling the heartbeat store on a fixed cadence.
    #[default]
    Monitoring,
    /// Emergency stop has been invoked.
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monitoring => write!(f, "MONITORING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl MonitorState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: MonitorState) -> bool {
        matches!((self, target), (Self::Monitoring, Self::Stopped))
    }

    /// Attempt to transition to `target`, returning error if invalid.
    ///
    /// # Errors
    ///
    /// Returns [`HbwError::InvalidStateTransition`] for anything other than
    /// MONITORING → STOPPED.
    pub fn transition_to(&mut self, target: MonitorState) -> HbwResult<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(HbwError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Returns true once the emergency stop has fired.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}
