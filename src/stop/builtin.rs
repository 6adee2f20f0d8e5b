// src/stop/builtin.rs

//! Built-in stop conditions, constructible from code or from the
//! `[[stop_condition]]` config section.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use super::StopCondition;

/// Comparison used by [`StopCondition::monitor_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CompareOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Gt => lhs > rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Ge => ">=",
            CompareOp::Gt => ">",
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" | "lt" => Ok(CompareOp::Lt),
            "<=" | "le" => Ok(CompareOp::Le),
            "==" | "eq" => Ok(CompareOp::Eq),
            "!=" | "ne" => Ok(CompareOp::Ne),
            ">=" | "ge" => Ok(CompareOp::Ge),
            ">" | "gt" => Ok(CompareOp::Gt),
            other => Err(format!(
                "invalid comparison operator '{other}' (expected one of <, <=, ==, !=, >=, >)"
            )),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl StopCondition {
    /// Matches tasks that have been running for longer than `limit`.
    pub fn timeout_wall(limit: Duration) -> Self {
        Self::new(
            "timeout_wall",
            format!("task wall time exceeds {limit:?}"),
            move |task, info| task.elapsed_at(info.now).is_some_and(|e| e > limit),
        )
    }

    /// Matches tasks where any captured output line matches `pattern`.
    pub fn output_matches(pattern: Regex) -> Self {
        let description = format!("output matches /{}/", pattern.as_str());
        Self::new("output_matches", description, move |task, _| {
            task.streams().lines().iter().any(|l| pattern.is_match(&l.text))
        })
    }

    /// Matches tasks whose latest numeric monitor entry `entry` satisfies
    /// `entry <op> value`. Tasks without that entry never match.
    pub fn monitor_entry(entry: impl Into<String>, op: CompareOp, value: f64) -> Self {
        let entry = entry.into();
        let description = format!("monitor entry `{entry}` {op} {value}");
        Self::new("monitor_entry", description, move |task, _| {
            task.monitor()
                .number(&entry)
                .is_some_and(|current| op.apply(current, value))
        })
    }

    /// Same condition under a different name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
