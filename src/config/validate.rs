// src/config/validate.rs

use std::collections::HashSet;

use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, FormatSettings, RawConfigFile, ReporterSection, ReporterSettings, RunSettings,
    StopConditionConfig, TaskConfig, TaskEntry, WorkerManagerSection,
};
use crate::engine::WorkerManagerConfig;
use crate::errors::{Result, RunpoolError};
use crate::report::{Hook, ReportParser, ReportWriter};
use crate::stop::{CompareOp, StopCondition};
use crate::task::LaunchSpec;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunpoolError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        Ok(ConfigFile {
            worker_manager: validate_worker_manager(&raw.worker_manager)?,
            run: RunSettings {
                forward_streams: raw.run.forward_streams,
                timeout: raw
                    .run
                    .timeout
                    .as_deref()
                    .map(|s| positive_duration("[run].timeout", s))
                    .transpose()?,
            },
            stop_conditions: raw
                .stop_condition
                .iter()
                .map(build_stop_condition)
                .collect::<Result<_>>()?,
            reporter: raw.reporter.as_ref().map(validate_reporter).transpose()?,
            tasks: validate_tasks(&raw.task)?,
        })
    }
}

fn config_error(msg: impl Into<String>) -> RunpoolError {
    RunpoolError::ConfigError(msg.into())
}

fn duration(field: &str, s: &str) -> Result<std::time::Duration> {
    parse_duration(s).map_err(|e| config_error(format!("{field}: {e}")))
}

fn positive_duration(field: &str, s: &str) -> Result<std::time::Duration> {
    let d = duration(field, s)?;
    if d.is_zero() {
        return Err(config_error(format!("{field} must be positive (got '{s}')")));
    }
    Ok(d)
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [[task]] entry",
        ));
    }
    Ok(())
}

fn validate_worker_manager(section: &WorkerManagerSection) -> Result<WorkerManagerConfig> {
    let mut config = WorkerManagerConfig {
        nonzero_exit_handling: section.nonzero_exit_handling,
        ..WorkerManagerConfig::default()
    };

    if let Some(n) = section.num_workers {
        if n == 0 {
            return Err(config_error(
                "[worker_manager].num_workers must be >= 1 (got 0)",
            ));
        }
        config.num_workers = n;
    }
    if let Some(ref s) = section.poll_delay {
        config.poll_delay = positive_duration("[worker_manager].poll_delay", s)?;
    }
    Ok(config)
}

fn build_stop_condition(cfg: &StopConditionConfig) -> Result<StopCondition> {
    fn required<'a>(value: Option<&'a str>, func: &str, key: &str) -> Result<&'a str> {
        value.ok_or_else(|| config_error(format!("stop condition '{func}' requires `{key}`")))
    }

    let condition = match cfg.func.as_str() {
        "timeout_wall" => {
            let limit = required(cfg.limit.as_deref(), &cfg.func, "limit")?;
            StopCondition::timeout_wall(positive_duration("stop condition limit", limit)?)
        }
        "output_matches" => {
            let pattern = required(cfg.pattern.as_deref(), &cfg.func, "pattern")?;
            let regex = Regex::new(pattern).map_err(|e| {
                config_error(format!("invalid output_matches pattern '{pattern}': {e}"))
            })?;
            StopCondition::output_matches(regex)
        }
        "monitor_entry" => {
            let entry = required(cfg.entry.as_deref(), &cfg.func, "entry")?;
            let op: CompareOp = required(cfg.operator.as_deref(), &cfg.func, "operator")?
                .parse()
                .map_err(config_error)?;
            let value = cfg.value.ok_or_else(|| {
                config_error("stop condition 'monitor_entry' requires `value`")
            })?;
            StopCondition::monitor_entry(entry, op, value)
        }
        other => {
            return Err(config_error(format!(
                "unknown stop condition function '{other}' (expected timeout_wall, output_matches or monitor_entry)"
            )));
        }
    };

    Ok(match cfg.name {
        Some(ref name) => condition.named(name.clone()),
        None => condition,
    })
}

fn validate_reporter(section: &ReporterSection) -> Result<ReporterSettings> {
    let default_intv = section
        .min_report_intv
        .as_deref()
        .map(|s| duration("[reporter].min_report_intv", s))
        .transpose()?;

    let mut formats = Vec::with_capacity(section.formats.len());
    for (name, fmt) in &section.formats {
        if fmt.write_to.is_empty() {
            return Err(config_error(format!(
                "report format '{name}' has an empty write_to list"
            )));
        }
        let writers = fmt
            .write_to
            .iter()
            .map(|w| w.parse::<ReportWriter>())
            .collect::<Result<Vec<_>>>()?;
        let min_report_intv = match fmt.min_report_intv.as_deref() {
            Some(s) => Some(duration(&format!("[reporter.formats.{name}].min_report_intv"), s)?),
            None => default_intv,
        };
        formats.push(FormatSettings {
            name: name.clone(),
            parser: ReportParser::from_kind(fmt.parser, fmt.width),
            writers,
            min_report_intv,
        });
    }

    let mut hooks = Vec::with_capacity(section.hooks.len());
    for (hook_name, names) in &section.hooks {
        let hook: Hook = hook_name.parse().map_err(config_error)?;
        for name in names {
            if !section.formats.contains_key(name) {
                return Err(config_error(format!(
                    "hook '{hook}' refers to unknown report format '{name}'"
                )));
            }
        }
        hooks.push((hook, names.clone()));
    }

    Ok(ReporterSettings { formats, hooks })
}

fn validate_tasks(tasks: &[TaskConfig]) -> Result<Vec<TaskEntry>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(tasks.len());

    for (i, task) in tasks.iter().enumerate() {
        let label = task
            .name
            .clone()
            .unwrap_or_else(|| format!("#{i}"));

        if let Some(uid) = task.uid {
            if uid < 0 {
                return Err(RunpoolError::InvalidUid(uid));
            }
            if !seen.insert(uid) {
                return Err(RunpoolError::DuplicateUid(uid as u64));
            }
        }

        let mut launch = match (&task.cmd, &task.program) {
            (Some(cmd), None) => {
                if !task.args.is_empty() {
                    return Err(config_error(format!(
                        "task {label}: `args` can only be used with `program`"
                    )));
                }
                LaunchSpec::shell(cmd.clone())
            }
            (None, Some(program)) => LaunchSpec::new(program.clone()).args(task.args.iter()),
            _ => {
                return Err(config_error(format!(
                    "task {label}: exactly one of `cmd` and `program` must be set"
                )));
            }
        };
        if let Some(ref cwd) = task.cwd {
            launch = launch.cwd(cwd.clone());
        }
        for (key, value) in &task.env {
            launch = launch.env(key.clone(), value.clone());
        }
        if let Some(ref path) = task.save_streams {
            launch = launch.save_streams(path.clone());
        }

        entries.push(TaskEntry {
            uid: task.uid,
            priority: task.priority,
            name: task.name.clone(),
            launch,
        });
    }
    Ok(entries)
}
