// src/report/format.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use crate::errors::{Result, RunpoolError};
use crate::report::parsers::ReportParser;
use crate::report::{Hook, ReportContext};

/// In-memory sink for reports, shareable with the code that embeds the
/// scheduler.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<String>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.0.lock().ok().and_then(|g| g.last().cloned())
    }

    fn push(&self, text: &str) -> Result<()> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("report buffer lock poisoned"))?;
        guard.push(text.to_string());
        Ok(())
    }
}

/// Where a rendered report goes.
#[derive(Debug, Clone)]
pub enum ReportWriter {
    Stdout,
    Stderr,
    /// An `info` level tracing event.
    Log,
    /// Overwrite the file with the latest report.
    File(PathBuf),
    Memory(SharedBuffer),
}

impl ReportWriter {
    fn write(&self, text: &str) -> Result<()> {
        match self {
            ReportWriter::Stdout => println!("{text}"),
            ReportWriter::Stderr => eprintln!("{text}"),
            ReportWriter::Log => info!(target: "runpool::report", "{text}"),
            ReportWriter::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(path, format!("{text}\n"))?;
            }
            ReportWriter::Memory(buf) => buf.push(text)?,
        }
        Ok(())
    }
}

/// Parses `stdout`, `stderr`, `log` and `file:<path>`.
impl FromStr for ReportWriter {
    type Err = RunpoolError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("file:") {
            if path.trim().is_empty() {
                return Err(RunpoolError::ConfigError(
                    "report writer 'file:' needs a path".to_string(),
                ));
            }
            return Ok(ReportWriter::File(PathBuf::from(path.trim())));
        }
        match s {
            "stdout" => Ok(ReportWriter::Stdout),
            "stderr" => Ok(ReportWriter::Stderr),
            "log" => Ok(ReportWriter::Log),
            other => Err(RunpoolError::ConfigError(format!(
                "unknown report writer '{other}' (expected stdout, stderr, log or file:<path>)"
            ))),
        }
    }
}

/// A named (parser, writers) pair with an optional minimum report interval.
pub struct ReportFormat {
    name: String,
    parser: ReportParser,
    writers: Vec<ReportWriter>,
    min_report_intv: Option<Duration>,
    last_report: Option<Instant>,
    num_reports: usize,
}

impl ReportFormat {
    pub fn new(name: impl Into<String>, parser: ReportParser) -> Self {
        Self {
            name: name.into(),
            parser,
            writers: Vec::new(),
            min_report_intv: None,
            last_report: None,
            num_reports: 0,
        }
    }

    pub fn write_to(mut self, writer: ReportWriter) -> Self {
        self.writers.push(writer);
        self
    }

    pub fn min_report_intv(mut self, intv: Duration) -> Self {
        self.min_report_intv = Some(intv);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parser(&self) -> &ReportParser {
        &self.parser
    }

    pub fn num_reports(&self) -> usize {
        self.num_reports
    }

    fn debounced(&self, now: Instant) -> bool {
        match (self.min_report_intv, self.last_report) {
            (Some(intv), Some(last)) => now.saturating_duration_since(last) < intv,
            _ => false,
        }
    }

    /// Render and write this format unless it reported too recently.
    pub fn report(&mut self, hook: Hook, ctx: &ReportContext<'_>, force: bool) -> Result<bool> {
        if !force && self.debounced(ctx.now) {
            return Ok(false);
        }

        let text = self.parser.parse(hook, ctx);
        for writer in &self.writers {
            writer.write(&text)?;
        }
        self.last_report = Some(ctx.now);
        self.num_reports += 1;
        Ok(true)
    }
}

impl fmt::Debug for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportFormat")
            .field("name", &self.name)
            .field("parser", &self.parser)
            .field("writers", &self.writers)
            .field("min_report_intv", &self.min_report_intv)
            .finish_non_exhaustive()
    }
}
