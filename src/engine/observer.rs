// src/engine/observer.rs

use crate::task::Task;

/// Observer notified when tasks start and finish.
///
/// Both methods default to no-ops so implementors only override what they
/// need.
pub trait TaskObserver: Send {
    fn on_spawn(&mut self, _task: &Task) {}

    fn on_finished(&mut self, _task: &Task) {}
}
