// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How the worker manager reacts when a task exits with a non-zero code.
///
/// - `Ignore`: bookkeeping only.
/// - `Warn`: log the tail of the task's output and keep working.
/// - `Raise`: log more context, terminate all other active tasks and end the
///   run with the failing task's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonzeroExitHandling {
    Ignore,
    Warn,
    Raise,
}

impl NonzeroExitHandling {
    /// Number of trailing output lines logged for a failed task.
    pub fn context_lines(self) -> usize {
        match self {
            NonzeroExitHandling::Ignore => 0,
            NonzeroExitHandling::Warn => 5,
            NonzeroExitHandling::Raise => 20,
        }
    }
}

impl Default for NonzeroExitHandling {
    fn default() -> Self {
        NonzeroExitHandling::Ignore
    }
}

impl FromStr for NonzeroExitHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(NonzeroExitHandling::Ignore),
            "warn" => Ok(NonzeroExitHandling::Warn),
            "raise" => Ok(NonzeroExitHandling::Raise),
            other => Err(format!(
                "invalid nonzero_exit_handling: {other} (expected \"ignore\", \"warn\" or \"raise\")"
            )),
        }
    }
}

impl fmt::Display for NonzeroExitHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NonzeroExitHandling::Ignore => "ignore",
            NonzeroExitHandling::Warn => "warn",
            NonzeroExitHandling::Raise => "raise",
        };
        f.write_str(s)
    }
}
