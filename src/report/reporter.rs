// src/report/reporter.rs

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::errors::{Result, RunpoolError};
use crate::report::format::ReportFormat;
use crate::report::{Hook, ReportContext, Reporter};

/// Reporter that dispatches each hook to a list of named report formats.
///
/// Formats are registered first and then bound to hooks by name. Binding an
/// unknown name is a configuration error, so a typo can never silently turn a
/// report off.
#[derive(Debug, Default)]
pub struct WorkerManagerReporter {
    formats: BTreeMap<String, ReportFormat>,
    hooks: HashMap<Hook, Vec<String>>,
}

impl WorkerManagerReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_format(&mut self, format: ReportFormat) -> Result<()> {
        if self.formats.contains_key(format.name()) {
            return Err(RunpoolError::ConfigError(format!(
                "report format '{}' is defined twice",
                format.name()
            )));
        }
        self.formats.insert(format.name().to_string(), format);
        Ok(())
    }

    /// Report `format` whenever `hook` fires.
    pub fn bind(&mut self, hook: Hook, format: &str) -> Result<()> {
        if !self.formats.contains_key(format) {
            return Err(RunpoolError::ConfigError(format!(
                "hook '{hook}' refers to unknown report format '{format}'"
            )));
        }
        let bound = self.hooks.entry(hook).or_default();
        if !bound.iter().any(|f| f == format) {
            bound.push(format.to_string());
        }
        Ok(())
    }

    pub fn format(&self, name: &str) -> Option<&ReportFormat> {
        self.formats.get(name)
    }

    pub fn formats_for(&self, hook: Hook) -> &[String] {
        self.hooks.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Reporter for WorkerManagerReporter {
    fn report(&mut self, hook: Hook, ctx: &ReportContext<'_>, force: bool) -> Result<bool> {
        let Some(names) = self.hooks.get(&hook) else {
            return Ok(false);
        };

        let mut wrote = false;
        for name in names {
            // Bound names are validated in `bind`.
            if let Some(format) = self.formats.get_mut(name) {
                wrote |= format.report(hook, ctx, force)?;
            }
        }
        if wrote {
            debug!(%hook, force, "report written");
        }
        Ok(wrote)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::engine::ManagerTimes;
    use crate::report::{ReportParser, ReportWriter, SharedBuffer, TaskCounters};

    fn ctx(times: &ManagerTimes) -> ReportContext<'_> {
        ReportContext {
            counters: TaskCounters {
                total: 1,
                pending: 1,
                ..TaskCounters::default()
            },
            num_workers: 1,
            times,
            tasks: &[],
            task: None,
            now: Instant::now(),
        }
    }

    #[test]
    fn binding_unknown_format_fails_closed() {
        let mut reporter = WorkerManagerReporter::new();
        let err = reporter.bind(Hook::AfterWork, "summary").unwrap_err();
        assert!(err.to_string().contains("unknown report format 'summary'"));
    }

    #[test]
    fn duplicate_format_names_are_rejected() {
        let mut reporter = WorkerManagerReporter::new();
        reporter
            .add_format(ReportFormat::new("a", ReportParser::Times))
            .unwrap();
        assert!(reporter
            .add_format(ReportFormat::new("a", ReportParser::Report))
            .is_err());
    }

    #[test]
    fn dispatches_only_to_bound_formats() {
        let counters_buf = SharedBuffer::new();
        let report_buf = SharedBuffer::new();

        let mut reporter = WorkerManagerReporter::new();
        reporter
            .add_format(
                ReportFormat::new("counters", ReportParser::TaskCounters)
                    .write_to(ReportWriter::Memory(counters_buf.clone())),
            )
            .unwrap();
        reporter
            .add_format(
                ReportFormat::new("summary", ReportParser::Report)
                    .write_to(ReportWriter::Memory(report_buf.clone())),
            )
            .unwrap();
        reporter.bind(Hook::WhileWorking, "counters").unwrap();
        reporter.bind(Hook::WhileWorking, "counters").unwrap();
        reporter.bind(Hook::AfterWork, "summary").unwrap();
        assert_eq!(reporter.formats_for(Hook::WhileWorking).len(), 1);

        let times = ManagerTimes::new();
        assert!(reporter.report(Hook::WhileWorking, &ctx(&times), false).unwrap());
        assert!(!reporter.report(Hook::TaskSpawned, &ctx(&times), false).unwrap());

        assert_eq!(counters_buf.entries().len(), 1);
        assert!(report_buf.entries().is_empty());

        reporter.report(Hook::AfterWork, &ctx(&times), true).unwrap();
        assert_eq!(report_buf.entries().len(), 1);
    }
}
