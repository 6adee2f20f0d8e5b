// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::WorkerManagerConfig;
use crate::errors::Result;
use crate::report::parsers::ParserKind;
use crate::report::{Hook, ReportFormat, ReportParser, ReportWriter, WorkerManagerReporter};
use crate::stop::StopCondition;
use crate::task::{LaunchSpec, TaskSpec};
use crate::types::NonzeroExitHandling;

/// Batch file exactly as read from TOML.
///
/// ```toml
/// [worker_manager]
/// num_workers = 4
/// poll_delay = "50ms"
/// nonzero_exit_handling = "warn"
///
/// [run]
/// timeout = "10m"
///
/// [[stop_condition]]
/// func = "timeout_wall"
/// limit = "2m"
///
/// [reporter.formats.progress]
/// parser = "progress_bar"
/// write_to = ["stderr"]
///
/// [reporter.hooks]
/// while_working = ["progress"]
///
/// [[task]]
/// name = "sim-0"
/// cmd = "./simulate --seed 0"
/// ```
///
/// Durations are strings such as `"250ms"`, `"3s"`, `"1m"`, `"2h"`.
/// Every section is optional except `[[task]]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker_manager: WorkerManagerSection,

    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub stop_condition: Vec<StopConditionConfig>,

    #[serde(default)]
    pub reporter: Option<ReporterSection>,

    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[worker_manager]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerManagerSection {
    /// Defaults to the number of available CPUs.
    pub num_workers: Option<usize>,
    pub poll_delay: Option<String>,
    #[serde(default)]
    pub nonzero_exit_handling: NonzeroExitHandling,
}

/// `[run]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    #[serde(default)]
    pub forward_streams: bool,
    pub timeout: Option<String>,
}

/// One `[[stop_condition]]` entry.
///
/// `func` selects the built-in condition; the remaining keys are its
/// arguments:
///
/// - `timeout_wall`: `limit`
/// - `output_matches`: `pattern`
/// - `monitor_entry`: `entry`, `operator`, `value`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopConditionConfig {
    pub func: String,
    /// Defaults to `func`.
    pub name: Option<String>,
    pub limit: Option<String>,
    pub pattern: Option<String>,
    pub entry: Option<String>,
    pub operator: Option<String>,
    pub value: Option<f64>,
}

/// `[reporter]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReporterSection {
    /// Default minimum interval for formats that do not set their own.
    pub min_report_intv: Option<String>,

    #[serde(default)]
    pub formats: BTreeMap<String, FormatConfig>,

    /// Hook name -> format names.
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<String>>,
}

/// `[reporter.formats.<name>]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    pub parser: ParserKind,

    #[serde(default = "default_write_to")]
    pub write_to: Vec<String>,

    /// Bar width for `progress_bar`.
    pub width: Option<usize>,

    pub min_report_intv: Option<String>,
}

fn default_write_to() -> Vec<String> {
    vec!["stdout".to_string()]
}

/// One `[[task]]` entry. Exactly one of `cmd` and `program` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub uid: Option<i64>,
    pub priority: Option<i64>,
    pub name: Option<String>,

    /// Shell command line.
    pub cmd: Option<String>,

    /// Program to execute directly, with `args`.
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,

    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub save_streams: Option<PathBuf>,
}

/// Validated batch configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`, which parses
/// every duration, regex and name reference up front.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub worker_manager: WorkerManagerConfig,
    pub run: RunSettings,
    pub stop_conditions: Vec<StopCondition>,
    pub reporter: Option<ReporterSettings>,
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSettings {
    pub forward_streams: bool,
    pub timeout: Option<Duration>,
}

/// A validated report format, ready to be instantiated.
#[derive(Debug, Clone)]
pub struct FormatSettings {
    pub name: String,
    pub parser: ReportParser,
    pub writers: Vec<ReportWriter>,
    pub min_report_intv: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub formats: Vec<FormatSettings>,
    pub hooks: Vec<(Hook, Vec<String>)>,
}

impl ReporterSettings {
    /// Instantiate a fresh reporter with its own debounce state.
    pub fn build(&self) -> Result<WorkerManagerReporter> {
        let mut reporter = WorkerManagerReporter::new();
        for fmt in &self.formats {
            let mut format = ReportFormat::new(fmt.name.clone(), fmt.parser.clone());
            for writer in &fmt.writers {
                format = format.write_to(writer.clone());
            }
            if let Some(intv) = fmt.min_report_intv {
                format = format.min_report_intv(intv);
            }
            reporter.add_format(format)?;
        }
        for (hook, names) in &self.hooks {
            for name in names {
                reporter.bind(*hook, name)?;
            }
        }
        Ok(reporter)
    }
}

/// A validated `[[task]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub uid: Option<i64>,
    pub priority: Option<i64>,
    pub name: Option<String>,
    pub launch: LaunchSpec,
}

impl TaskEntry {
    pub fn to_spec(&self) -> TaskSpec {
        let mut spec = TaskSpec::new(self.launch.clone());
        spec.uid = self.uid;
        spec.priority = self.priority;
        spec.name = self.name.clone();
        spec
    }
}
