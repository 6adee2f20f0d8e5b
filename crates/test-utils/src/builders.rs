use std::time::Duration;

use runpool::config::model::{RawConfigFile, TaskConfig, WorkerManagerSection};
use runpool::config::ConfigFile;
use runpool::engine::WorkerManagerConfig;
use runpool::task::{LaunchSpec, TaskSpec};
use runpool::types::NonzeroExitHandling;

/// Worker manager settings with a short poll delay, so tests run fast.
pub fn fast_config(num_workers: usize) -> WorkerManagerConfig {
    WorkerManagerConfig {
        num_workers,
        poll_delay: Duration::from_millis(5),
        nonzero_exit_handling: NonzeroExitHandling::Ignore,
    }
}

/// `sleep <secs>`, executed directly so a SIGTERM reaches the sleeping
/// process itself.
pub fn sleep_task(secs: f64) -> TaskSpec {
    TaskSpec::new(LaunchSpec::new("sleep").arg(secs.to_string()))
}

/// A task that exits with `code` right away.
pub fn exit_task(code: i32) -> TaskSpec {
    TaskSpec::new(LaunchSpec::shell(format!("exit {code}")))
}

/// A task running `cmd` through the shell.
pub fn shell_task(cmd: &str) -> TaskSpec {
    TaskSpec::new(LaunchSpec::shell(cmd))
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.config.worker_manager.num_workers = Some(n);
        self
    }

    pub fn with_poll_delay(mut self, delay: &str) -> Self {
        self.config.worker_manager.poll_delay = Some(delay.to_string());
        self
    }

    pub fn with_nonzero_exit_handling(mut self, handling: NonzeroExitHandling) -> Self {
        self.config.worker_manager = WorkerManagerSection {
            nonzero_exit_handling: handling,
            ..self.config.worker_manager
        };
        self
    }

    pub fn with_timeout(mut self, timeout: &str) -> Self {
        self.config.run.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    /// Task running `cmd` through the shell.
    pub fn cmd(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: Some(cmd.to_string()),
                ..TaskConfig::default()
            },
        }
    }

    /// Task running `program` directly.
    pub fn program(program: &str, args: &[&str]) -> Self {
        Self {
            task: TaskConfig {
                program: Some(program.to_string()),
                args: args.iter().map(|a| a.to_string()).collect(),
                ..TaskConfig::default()
            },
        }
    }

    pub fn uid(mut self, uid: i64) -> Self {
        self.task.uid = Some(uid);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.task.priority = Some(priority);
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = Some(name.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn save_streams(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.task.save_streams = Some(path.into());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
