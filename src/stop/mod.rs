// src/stop/mod.rs

//! Stop conditions: named predicates over a running task.
//!
//! A condition never acts on its own. The worker manager evaluates every
//! condition against every active task, unions the matches with
//! [`collect_matches`] and sends each matched task a single SIGTERM.

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::task::Task;

pub use builtin::CompareOp;

/// Live scheduler state passed to every predicate call.
#[derive(Debug, Clone, Copy)]
pub struct LiveInfo {
    pub now: Instant,
    /// Time since `start_working` was called.
    pub run_elapsed: Duration,
    pub num_active: usize,
    pub num_finished: usize,
}

pub type Predicate = Arc<dyn Fn(&Task, &LiveInfo) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct StopCondition {
    name: String,
    description: String,
    predicate: Predicate,
}

impl StopCondition {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Task, &LiveInfo) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_fulfilled(&self, task: &Task, info: &LiveInfo) -> bool {
        (self.predicate)(task, info)
    }
}

impl fmt::Debug for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCondition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Evaluate all conditions against all tasks.
///
/// Returns each matching task uid exactly once, together with the names of
/// every condition that matched it, ordered by uid.
pub fn collect_matches<'c, 't, I>(
    conditions: &'c [StopCondition],
    tasks: I,
    info: &LiveInfo,
) -> BTreeMap<u64, Vec<&'c str>>
where
    I: IntoIterator<Item = &'t Task>,
{
    let mut matches: BTreeMap<u64, Vec<&'c str>> = BTreeMap::new();
    if conditions.is_empty() {
        return matches;
    }

    for task in tasks {
        for cond in conditions {
            if cond.is_fulfilled(task, info) {
                matches.entry(task.uid()).or_default().push(cond.name());
            }
        }
    }
    matches
}
