//! Scheduler lifecycle states
//!
//! ```text
//! Idle → Starting → Running ⇄ Analyzing → Stopping → Stopped
//!                      ↕          ↓ ↑
//!                  Degraded      Error (cooldown, then Running)
//! ```

use crate::error::{Result, SchedulerError};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerStatus {
    Idle,
    Starting,
    Running,
    Analyzing,
    /// Running with fewer than half the symbols or strategies healthy
    Degraded,
    /// Last cycle failed; waiting out the cooldown
    Error,
    Stopping,
    Stopped,
}

impl SchedulerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerStatus::Idle => "idle",
            SchedulerStatus::Starting => "starting",
            SchedulerStatus::Running => "running",
            SchedulerStatus::Analyzing => "analyzing",
            SchedulerStatus::Degraded => "degraded",
            SchedulerStatus::Error => "error",
            SchedulerStatus::Stopping => "stopping",
            SchedulerStatus::Stopped => "stopped",
        }
    }

    pub fn can_transition_to(&self, to: SchedulerStatus) -> bool {
        use SchedulerStatus::*;
        matches!(
            (self, to),
            (Idle, Starting)
                | (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Analyzing)
                | (Degraded, Analyzing)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Analyzing, Running)
                | (Analyzing, Degraded)
                | (Analyzing, Error)
                | (Error, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Degraded, Stopping)
                | (Analyzing, Stopping)
                | (Error, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// The cycle loop is alive in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SchedulerStatus::Running
                | SchedulerStatus::Analyzing
                | SchedulerStatus::Degraded
                | SchedulerStatus::Error
        )
    }
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status guarded by the transition table
#[derive(Debug)]
pub struct StatusCell {
    current: Mutex<SchedulerStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(SchedulerStatus::Idle),
        }
    }

    pub fn get(&self) -> SchedulerStatus {
        *self.current.lock()
    }

    pub fn transition(&self, to: SchedulerStatus) -> Result<SchedulerStatus> {
        let mut current = self.current.lock();
        let from = *current;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition { from, to });
        }
        *current = to;
        Ok(from)
    }

    /// Transition only when the current status is one of `from`.
    pub fn transition_from(&self, from: &[SchedulerStatus], to: SchedulerStatus) -> bool {
        let mut current = self.current.lock();
        if from.contains(&current) && current.can_transition_to(to) {
            *current = to;
            true
        } else {
            false
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
