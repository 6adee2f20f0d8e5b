// src/task/monitor.rs

//! Structured progress entries emitted by tasks on stdout.
//!
//! A task may print lines such as
//!
//! ```text
//! !!map {progress: 0.42, step: 120}
//! ```
//!
//! The flow mapping after the `!!map` marker is parsed as YAML and merged into
//! the task's [`Monitor`]; later entries overwrite earlier ones.

use std::collections::BTreeMap;

use serde_yaml::Value;
use tracing::debug;

const MONITOR_PREFIX: &str = "!!map";

/// Latest monitor entries of a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Monitor {
    entries: BTreeMap<String, Value>,
    updates: usize,
}

impl Monitor {
    /// Merge a stdout line into the monitor, if it is a monitor line.
    ///
    /// Returns `true` if the line carried monitor entries.
    pub(crate) fn ingest(&mut self, line: &str) -> bool {
        let Some(rest) = line.trim_start().strip_prefix(MONITOR_PREFIX) else {
            return false;
        };

        match serde_yaml::from_str::<BTreeMap<String, Value>>(rest.trim()) {
            Ok(entries) => {
                self.entries.extend(entries);
                self.updates += 1;
                true
            }
            Err(e) => {
                debug!(line, error = %e, "malformed monitor line; keeping as plain output");
                false
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Numeric value of an entry, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(Value::as_f64)
    }

    /// The `progress` entry clamped to `[0, 1]`.
    pub fn progress(&self) -> Option<f64> {
        self.number("progress").map(|p| p.clamp(0.0, 1.0))
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// How many monitor lines have been merged so far.
    pub fn updates(&self) -> usize {
        self.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_successive_monitor_lines() {
        let mut monitor = Monitor::default();
        assert!(monitor.ingest("!!map {progress: 0.25, step: 10}"));
        assert!(monitor.ingest("!!map {progress: 0.5}"));

        assert_eq!(monitor.progress(), Some(0.5));
        assert_eq!(monitor.number("step"), Some(10.0));
        assert_eq!(monitor.updates(), 2);
    }

    #[test]
    fn ignores_plain_and_malformed_lines() {
        let mut monitor = Monitor::default();
        assert!(!monitor.ingest("step 10 done"));
        assert!(!monitor.ingest("!!map {progress: [unclosed"));
        assert_eq!(monitor.updates(), 0);
        assert!(monitor.progress().is_none());
    }

    #[test]
    fn progress_is_clamped() {
        let mut monitor = Monitor::default();
        monitor.ingest("!!map {progress: 1.7}");
        assert_eq!(monitor.progress(), Some(1.0));
    }
}
