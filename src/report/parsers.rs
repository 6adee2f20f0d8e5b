// src/report/parsers.rs

//! Built-in report layouts.
//!
//! The exact text is not a stable interface; it is meant for humans watching
//! a run.

use std::fmt::Write as _;
use std::time::Duration;

use serde::Deserialize;

use crate::report::{Hook, ReportContext};
use crate::task::TaskStatus;

const DEFAULT_BAR_WIDTH: usize = 40;

/// Which layout a [`ReportFormat`](crate::report::ReportFormat) renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportParser {
    /// `total: 5, pending: 1, active: 2, finished: 2, failed: 0`
    TaskCounters,
    /// `[#####~~~       ]  35.0%  finished 3/10, active 2`
    ProgressBar { width: usize },
    /// Elapsed time, estimated time left, time until the total timeout.
    Times,
    /// Multi-line run summary including runtime statistics.
    Report,
    /// One line about the task a hook refers to.
    TaskEvent,
}

/// Parser names as they appear in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    TaskCounters,
    ProgressBar,
    Times,
    Report,
    TaskEvent,
}

impl ReportParser {
    pub fn from_kind(kind: ParserKind, width: Option<usize>) -> Self {
        match kind {
            ParserKind::TaskCounters => ReportParser::TaskCounters,
            ParserKind::ProgressBar => ReportParser::ProgressBar {
                width: width.unwrap_or(DEFAULT_BAR_WIDTH).max(1),
            },
            ParserKind::Times => ReportParser::Times,
            ParserKind::Report => ReportParser::Report,
            ParserKind::TaskEvent => ReportParser::TaskEvent,
        }
    }

    pub fn parse(&self, hook: Hook, ctx: &ReportContext<'_>) -> String {
        match self {
            ReportParser::TaskCounters => task_counters(ctx),
            ReportParser::ProgressBar { width } => progress_bar(ctx, *width),
            ReportParser::Times => times(ctx),
            ReportParser::Report => report(hook, ctx),
            ReportParser::TaskEvent => task_event(hook, ctx),
        }
    }
}

fn task_counters(ctx: &ReportContext<'_>) -> String {
    let c = ctx.counters;
    format!(
        "total: {}, pending: {}, active: {}, finished: {}, failed: {}",
        c.total, c.pending, c.active, c.finished, c.failed
    )
}

fn progress_bar(ctx: &ReportContext<'_>, width: usize) -> String {
    let c = ctx.counters;
    if c.total == 0 {
        return format!("[{}] no tasks", " ".repeat(width));
    }

    let done_share = c.finished as f64 / c.total as f64;
    let progress = ctx.progress();
    let done_ticks = ((done_share * width as f64).round() as usize).min(width);
    let active_ticks = (((progress * width as f64).round() as usize).min(width)).saturating_sub(done_ticks);
    let space = width - done_ticks - active_ticks;

    format!(
        "[{}{}{}] {:>5.1}%  finished {}/{}, active {}",
        "#".repeat(done_ticks),
        "~".repeat(active_ticks),
        " ".repeat(space),
        progress * 100.0,
        c.finished,
        c.total,
        c.active
    )
}

fn times(ctx: &ReportContext<'_>) -> String {
    let elapsed = ctx.times.elapsed(ctx.now);
    let progress = ctx.progress();

    let mut out = format!(
        "elapsed: {}, est. left: {}",
        fmt_duration(elapsed),
        estimate_left(elapsed, progress)
    );
    if let Some(deadline) = ctx.times.timeout_at {
        let left = deadline.saturating_duration_since(ctx.now);
        let _ = write!(out, ", timeout in: {}", fmt_duration(left));
    }
    out
}

/// Linear extrapolation of the remaining time. Estimates that do not fit in
/// a `Duration` are reported as unknown.
fn estimate_left(elapsed: Duration, progress: f64) -> String {
    if progress >= 1.0 {
        return fmt_duration(Duration::ZERO);
    }
    if progress <= 0.0 || progress.is_nan() {
        return "unknown".to_string();
    }
    let secs = elapsed.as_secs_f64() * (1.0 - progress) / progress;
    Duration::try_from_secs_f64(secs)
        .map(fmt_duration)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn report(hook: Hook, ctx: &ReportContext<'_>) -> String {
    let c = ctx.counters;
    let mut out = String::new();

    let state = match hook {
        Hook::AfterWork => "completed",
        Hook::AfterAbort => "aborted",
        _ => "working",
    };
    let _ = writeln!(out, "runpool report ({state})");
    let _ = writeln!(
        out,
        "  tasks:     total {}, finished {}, failed {}, active {}, pending {}",
        c.total, c.finished, c.failed, c.active, c.pending
    );
    let _ = writeln!(out, "  workers:   {}", ctx.num_workers);
    let _ = writeln!(out, "  elapsed:   {}", fmt_duration(ctx.times.elapsed(ctx.now)));

    let runtimes: Vec<Duration> = ctx.tasks.iter().filter_map(|t| t.runtime()).collect();
    match RuntimeStats::from_durations(&runtimes) {
        Some(stats) => {
            let _ = writeln!(
                out,
                "  runtimes:  mean {}, std {}, min {}, max {}",
                fmt_duration(stats.mean),
                fmt_duration(stats.std),
                fmt_duration(stats.min),
                fmt_duration(stats.max)
            );
        }
        None => {
            let _ = writeln!(out, "  runtimes:  n/a");
        }
    }

    let failed: Vec<String> = ctx
        .tasks
        .iter()
        .filter_map(|t| match t.status() {
            TaskStatus::Finished(code) if code != 0 => Some(format!("{t} (exit {code})")),
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "  failed:    {}", failed.join(", "));
    }

    out.trim_end().to_string()
}

fn task_event(hook: Hook, ctx: &ReportContext<'_>) -> String {
    let Some(task) = ctx.task else {
        return format!("{hook}: {}", task_counters(ctx));
    };

    match (hook, task.status()) {
        (Hook::TaskSpawned, _) => match task.pid() {
            Some(pid) => format!("spawned {task} (pid {pid})"),
            None => format!("spawned {task}"),
        },
        (_, TaskStatus::Finished(code)) => match task.runtime() {
            Some(rt) => format!("{task} finished with exit code {code} after {}", fmt_duration(rt)),
            None => format!("{task} finished with exit code {code}"),
        },
        _ => format!("{hook}: {task}"),
    }
}

/// Summary statistics over finished task runtimes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeStats {
    pub count: usize,
    pub mean: Duration,
    pub std: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl RuntimeStats {
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        let min = *durations.iter().min()?;
        let max = *durations.iter().max()?;
        let n = durations.len() as f64;
        let secs: Vec<f64> = durations.iter().map(Duration::as_secs_f64).collect();
        let mean = secs.iter().sum::<f64>() / n;
        let var = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            count: durations.len(),
            mean: Duration::from_secs_f64(mean),
            std: Duration::from_secs_f64(var.sqrt()),
            min,
            max,
        })
    }
}

/// `850ms`, `4.2s`, `2m 05s`, `1h 02m 03s`.
pub fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::engine::ManagerTimes;
    use crate::report::TaskCounters;

    fn ctx<'a>(times: &'a ManagerTimes, counters: TaskCounters) -> ReportContext<'a> {
        ReportContext {
            counters,
            num_workers: 2,
            times,
            tasks: &[],
            task: None,
            now: Instant::now(),
        }
    }

    fn counters(total: usize, active: usize, finished: usize) -> TaskCounters {
        TaskCounters {
            total,
            pending: total - active - finished,
            active,
            finished,
            failed: 0,
        }
    }

    #[test]
    fn counters_line_lists_every_counter() {
        let times = ManagerTimes::new();
        let text = ReportParser::TaskCounters.parse(Hook::WhileWorking, &ctx(&times, counters(5, 2, 2)));
        assert_eq!(text, "total: 5, pending: 1, active: 2, finished: 2, failed: 0");
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        let times = ManagerTimes::new();
        let parser = ReportParser::from_kind(ParserKind::ProgressBar, Some(10));
        let text = parser.parse(Hook::WhileWorking, &ctx(&times, counters(4, 1, 2)));
        assert!(text.starts_with("[#####     ]"), "got {text:?}");
        assert!(text.contains("50.0%"));
        assert!(text.contains("finished 2/4"));

        let empty = parser.parse(Hook::WhileWorking, &ctx(&times, TaskCounters::default()));
        assert!(empty.ends_with("no tasks"));
    }

    #[test]
    fn report_without_finished_tasks_has_no_stats() {
        let times = ManagerTimes::new();
        let text = ReportParser::Report.parse(Hook::AfterAbort, &ctx(&times, counters(3, 0, 0)));
        assert!(text.starts_with("runpool report (aborted)"));
        assert!(text.contains("runtimes:  n/a"));
        assert!(!text.contains("failed: "));
    }

    #[test]
    fn times_reports_timeout_and_unknown_eta() {
        let mut times = ManagerTimes::new();
        let now = Instant::now();
        times.started = Some(now);
        times.timeout_at = Some(now + Duration::from_secs(90));

        let text = ReportParser::Times.parse(Hook::WhileWorking, &ctx(&times, counters(2, 1, 0)));
        assert!(text.contains("est. left: unknown"), "got {text:?}");
        assert!(text.contains("timeout in: 1m"), "got {text:?}");
    }

    #[test]
    fn estimate_left_survives_tiny_progress() {
        let elapsed = Duration::from_secs(10);
        assert_eq!(estimate_left(elapsed, 1e-30), "unknown");
        assert_eq!(estimate_left(elapsed, f64::MIN_POSITIVE), "unknown");
        assert_eq!(estimate_left(elapsed, 0.5), "10.0s");
        assert_eq!(estimate_left(elapsed, 1.0), "0ms");
        assert_eq!(estimate_left(elapsed, 0.0), "unknown");
    }

    #[test]
    fn runtime_stats_over_durations() {
        let stats = RuntimeStats::from_durations(&[
            Duration::from_secs(1),
            Duration::from_secs(3),
        ])
        .unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, Duration::from_secs(2));
        assert_eq!(stats.std, Duration::from_secs(1));
        assert_eq!(stats.min, Duration::from_secs(1));
        assert_eq!(stats.max, Duration::from_secs(3));
        assert!(RuntimeStats::from_durations(&[]).is_none());
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(fmt_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(fmt_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(fmt_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(fmt_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
