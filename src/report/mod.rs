// src/report/mod.rs

//! Progress reporting.
//!
//! The worker manager calls its (at most one) [`Reporter`] at fixed hook
//! points. The bundled [`WorkerManagerReporter`] maps each hook to a list of
//! named [`ReportFormat`]s; a format pairs a [`ReportParser`] (what to say)
//! with one or more [`ReportWriter`]s (where to say it).
//!
//! - [`format`] holds formats, writers and the minimum-interval debounce.
//! - [`parsers`] renders the built-in text layouts.
//! - [`reporter`] holds the hook → format dispatch table.

pub mod format;
pub mod parsers;
pub mod reporter;

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::engine::ManagerTimes;
use crate::errors::Result;
use crate::task::Task;

pub use format::{ReportFormat, ReportWriter, SharedBuffer};
pub use parsers::ReportParser;
pub use reporter::WorkerManagerReporter;

/// Points in the scheduler lifecycle at which the reporter is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hook {
    TaskSpawned,
    TaskFinished,
    WhileWorking,
    AfterWork,
    AfterAbort,
}

impl Hook {
    pub const ALL: [Hook; 5] = [
        Hook::TaskSpawned,
        Hook::TaskFinished,
        Hook::WhileWorking,
        Hook::AfterWork,
        Hook::AfterAbort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Hook::TaskSpawned => "task_spawned",
            Hook::TaskFinished => "task_finished",
            Hook::WhileWorking => "while_working",
            Hook::AfterWork => "after_work",
            Hook::AfterAbort => "after_abort",
        }
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Hook::ALL
            .into_iter()
            .find(|h| h.as_str() == s.trim())
            .ok_or_else(|| {
                format!(
                    "unknown reporter hook '{s}' (expected one of task_spawned, task_finished, while_working, after_work, after_abort)"
                )
            })
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task counts at the moment of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounters {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub finished: usize,
    /// Finished with a non-zero exit code.
    pub failed: usize,
}

/// Everything a report can draw on.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub counters: TaskCounters,
    pub num_workers: usize,
    pub times: &'a ManagerTimes,
    /// Every task added so far, in insertion order.
    pub tasks: &'a [Task],
    /// The task the hook is about (`task_spawned`, `task_finished`).
    pub task: Option<&'a Task>,
    pub now: Instant,
}

impl ReportContext<'_> {
    /// Fraction of work done: finished tasks plus the monitored progress of
    /// active ones, over the total.
    pub fn progress(&self) -> f64 {
        if self.counters.total == 0 {
            return 0.0;
        }
        let active: f64 = self
            .tasks
            .iter()
            .filter(|t| t.is_active())
            .filter_map(|t| t.monitor().progress())
            .sum();
        ((self.counters.finished as f64 + active) / self.counters.total as f64).clamp(0.0, 1.0)
    }
}

/// Observer invoked by the worker manager at every [`Hook`].
///
/// `force` asks the reporter to bypass any rate limiting; it is set for
/// events that are always significant (end of work, abort).
pub trait Reporter: Send {
    /// Returns whether anything was written.
    fn report(&mut self, hook: Hook, ctx: &ReportContext<'_>, force: bool) -> Result<bool>;
}
