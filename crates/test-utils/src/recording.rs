//! Observer and reporter doubles that record what the worker manager did.

use std::sync::{Arc, Mutex};

use runpool::engine::TaskObserver;
use runpool::errors::Result;
use runpool::report::{Hook, ReportContext, Reporter, TaskCounters};
use runpool::task::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Spawned(u64),
    Finished { uid: u64, exit_code: Option<i32> },
}

/// Records every spawn and finish notification.
///
/// Clone it before handing it to the manager; all clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    /// uids in spawn order.
    pub fn spawn_order(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Spawned(uid) => Some(uid),
                TaskEvent::Finished { .. } => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<(u64, Option<i32>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Finished { uid, exit_code } => Some((uid, exit_code)),
                TaskEvent::Spawned(_) => None,
            })
            .collect()
    }
}

impl TaskObserver for RecordingObserver {
    fn on_spawn(&mut self, task: &Task) {
        self.events.lock().unwrap().push(TaskEvent::Spawned(task.uid()));
    }

    fn on_finished(&mut self, task: &Task) {
        self.events.lock().unwrap().push(TaskEvent::Finished {
            uid: task.uid(),
            exit_code: task.exit_code(),
        });
    }
}

/// One reporter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportCall {
    pub hook: Hook,
    pub force: bool,
    pub counters: TaskCounters,
    pub task: Option<u64>,
}

/// Reporter that writes nothing and records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    calls: Arc<Mutex<Vec<ReportCall>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ReportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn hooks(&self) -> Vec<Hook> {
        self.calls().into_iter().map(|c| c.hook).collect()
    }

    pub fn count(&self, hook: Hook) -> usize {
        self.calls().iter().filter(|c| c.hook == hook).count()
    }

    /// Highest number of active tasks seen in any report.
    pub fn max_active(&self) -> usize {
        self.calls()
            .iter()
            .map(|c| c.counters.active)
            .max()
            .unwrap_or(0)
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, hook: Hook, ctx: &ReportContext<'_>, force: bool) -> Result<bool> {
        self.calls.lock().unwrap().push(ReportCall {
            hook,
            force,
            counters: ctx.counters,
            task: ctx.task.map(Task::uid),
        });
        Ok(true)
    }
}
