// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{default_config_path, parse_duration};

/// Command-line arguments for `runpool`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runpool",
    version,
    about = "Run a batch of commands on a bounded pool of workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the batch file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNPOOL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the batch file and print it, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[worker_manager].num_workers`.
    #[arg(long, value_name = "N")]
    pub num_workers: Option<usize>,

    /// Override `[run].timeout`, e.g. `90s` or `2h`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Echo task output as it arrives.
    #[arg(long)]
    pub forward_streams: bool,

    /// How long tasks get to exit after an aborted run before they are killed.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "5s")]
    pub shutdown_grace: Duration,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["runpool"]).unwrap();
        assert_eq!(args.config, default_config_path());
        assert_eq!(args.config, PathBuf::from("Runpool.toml"));
        assert_eq!(args.timeout, None);
        assert_eq!(args.shutdown_grace, Duration::from_secs(5));
        assert!(!args.dry_run && !args.forward_streams);
    }

    #[test]
    fn overrides_are_parsed() {
        let args = CliArgs::try_parse_from([
            "runpool",
            "--config",
            "batch.toml",
            "--num-workers",
            "3",
            "--timeout",
            "90s",
            "--log-level",
            "debug",
            "--forward-streams",
        ])
        .unwrap();
        assert_eq!(args.num_workers, Some(3));
        assert_eq!(args.timeout, Some(Duration::from_secs(90)));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.forward_streams);
    }

    #[test]
    fn bad_duration_is_a_usage_error() {
        assert!(CliArgs::try_parse_from(["runpool", "--timeout", "soon"]).is_err());
    }
}
