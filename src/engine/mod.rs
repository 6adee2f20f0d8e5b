// src/engine/mod.rs

//! Scheduling engine.
//!
//! The [`WorkerManager`] owns the task list, the pending queue and the bounded
//! set of active tasks, and runs the polling loop. Everything that can go
//! wrong while it runs arrives as a [`Fault`] on a single channel and is
//! handled inside the loop.

pub mod faults;
pub mod manager;
pub mod observer;

use std::fmt;
use std::time::{Duration, Instant};

pub use faults::{AbortReason, Fault, FaultAction, FaultSender};
pub use manager::{RunOptions, WorkerManager, WorkerManagerConfig};
pub use observer::TaskObserver;

/// Lifecycle of a worker manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Working,
    Completed,
    Aborted,
}

impl ManagerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ManagerState::Idle => "idle",
            ManagerState::Working => "working",
            ManagerState::Completed => "completed",
            ManagerState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamps of a worker manager's run.
#[derive(Debug, Clone, Copy)]
pub struct ManagerTimes {
    pub init: Instant,
    pub started: Option<Instant>,
    pub timeout_at: Option<Instant>,
    pub ended: Option<Instant>,
}

impl ManagerTimes {
    pub fn new() -> Self {
        Self {
            init: Instant::now(),
            started: None,
            timeout_at: None,
            ended: None,
        }
    }

    /// Time spent working, measured at `now` or up to the end of the run.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let start = self.started.unwrap_or(self.init);
        self.ended.unwrap_or(now).saturating_duration_since(start)
    }
}

impl Default for ManagerTimes {
    fn default() -> Self {
        Self::new()
    }
}
