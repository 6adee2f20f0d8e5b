// src/task/spec.rs

//! Task specifications handed to `WorkerManager::add_task`.
//!
//! A [`TaskSpec`] does not carry the final process arguments directly. It
//! carries a *setup* closure that is invoked exactly once, right before the
//! process is spawned, and resolves to a [`LaunchSpec`]. This lets producers
//! defer things like output-directory creation until a worker slot is free.

use std::fmt;
use std::path::PathBuf;

/// Fully resolved description of how to start a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// If set, the combined output of the task is written here once it
    /// finishes.
    pub save_streams: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            save_streams: None,
        }
    }

    /// Run `cmd` through the platform shell.
    pub fn shell(cmd: impl Into<String>) -> Self {
        if cfg!(windows) {
            Self::new("cmd").arg("/C").arg(cmd)
        } else {
            Self::new("sh").arg("-c").arg(cmd)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn save_streams(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_streams = Some(path.into());
        self
    }

    /// Human-readable command line, for logs and dry runs.
    pub fn display_command(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.contains(char::is_whitespace) {
                out.push_str(&format!("{arg:?}"));
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Deferred setup closure resolving the final launch parameters.
pub type SetupFn = Box<dyn FnOnce() -> anyhow::Result<LaunchSpec> + Send>;

/// What a producer hands to the worker manager.
pub struct TaskSpec {
    /// Explicit uid; if `None` the manager assigns the next free one.
    pub uid: Option<i64>,
    /// Lower values are served first; `None` sorts after every explicit value.
    pub priority: Option<i64>,
    pub name: Option<String>,
    pub(crate) setup: SetupFn,
}

impl TaskSpec {
    /// Spec whose launch parameters are already known.
    pub fn new(launch: LaunchSpec) -> Self {
        Self::deferred(move || Ok(launch))
    }

    /// Spec whose launch parameters are resolved at spawn time.
    pub fn deferred<F>(setup: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<LaunchSpec> + Send + 'static,
    {
        Self {
            uid: None,
            priority: None,
            name: None,
            setup: Box::new(setup),
        }
    }

    pub fn with_uid(mut self, uid: i64) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("uid", &self.uid)
            .field("priority", &self.priority)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
