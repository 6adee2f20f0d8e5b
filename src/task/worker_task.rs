// src/task/worker_task.rs

//! A single schedulable unit of work and its runtime state.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::errors::{Result, RunpoolError};
use crate::task::monitor::Monitor;
use crate::task::process::{self, Signal};
use crate::task::spec::{LaunchSpec, SetupFn, TaskSpec};
use crate::task::streams::{StreamSource, Streams};

/// How long output pipes may stay open after the process exited.
const STREAM_DRAIN_LIMIT: Duration = Duration::from_millis(200);

/// Lifecycle of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Spawned,
    Finished(i32),
}

pub struct Task {
    uid: u64,
    priority: Option<i64>,
    name: Option<String>,
    setup: Option<SetupFn>,
    launch: Option<LaunchSpec>,
    child: Option<Child>,
    pid: Option<u32>,
    status: TaskStatus,
    streams: Streams,
    monitor: Monitor,
    spawned_at: Option<Instant>,
    finished_at: Option<Instant>,
    signals_received: usize,
    fulfilled_stop_conditions: Vec<String>,
}

impl Task {
    /// Build a task from a spec. `uid` is validated here: negative values are
    /// rejected before anything else happens.
    pub fn new(uid: i64, spec: TaskSpec) -> Result<Self> {
        let uid = u64::try_from(uid).map_err(|_| RunpoolError::InvalidUid(uid))?;
        Ok(Self {
            uid,
            priority: spec.priority,
            name: spec.name,
            setup: Some(spec.setup),
            launch: None,
            child: None,
            pid: None,
            status: TaskStatus::Pending,
            streams: Streams::default(),
            monitor: Monitor::default(),
            spawned_at: None,
            finished_at: None,
            signals_received: 0,
            fulfilled_stop_conditions: Vec::new(),
        })
    }

    /// Resolve the launch parameters and start the process.
    ///
    /// Calling this on a task that is not pending is a programming error and
    /// returns [`RunpoolError::AlreadySpawned`].
    pub fn spawn(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(RunpoolError::AlreadySpawned(self.uid));
        }
        let setup = self
            .setup
            .take()
            .ok_or(RunpoolError::AlreadySpawned(self.uid))?;

        let launch = setup().with_context(|| format!("setting up task {}", self.uid))?;

        info!(
            uid = self.uid,
            priority = ?self.priority,
            cmd = %launch.display_command(),
            "spawning task process"
        );

        let mut child = process::build_command(&launch)
            .spawn()
            .map_err(|source| RunpoolError::Spawn {
                uid: self.uid,
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.streams.attach(self.uid, stdout, stderr);

        self.pid = child.id();
        self.child = Some(child);
        self.launch = Some(launch);
        self.status = TaskStatus::Spawned;
        self.spawned_at = Some(Instant::now());
        Ok(())
    }

    /// Pull in whatever output arrived since the last call. Never blocks.
    pub fn read_streams(&mut self) {
        let before = self.streams.len();
        if self.streams.read_available() > 0 {
            self.ingest_monitor_lines(before);
        }
    }

    fn ingest_monitor_lines(&mut self, from: usize) {
        for line in &self.streams.lines()[from..] {
            if line.source == StreamSource::Stdout {
                self.monitor.ingest(&line.text);
            }
        }
    }

    /// Non-blocking liveness check.
    ///
    /// On exit this records the exit code, moves the task to `Finished` and
    /// releases the process handle. Returns the exit code once finished.
    pub fn poll_status(&mut self) -> Result<Option<i32>> {
        if let TaskStatus::Finished(code) = self.status {
            return Ok(Some(code));
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };

        let Some(status) = child.try_wait()? else {
            return Ok(None);
        };

        let code = process::exit_code(status);
        self.child = None;
        self.status = TaskStatus::Finished(code);
        self.finished_at = Some(Instant::now());

        info!(
            uid = self.uid,
            exit_code = code,
            runtime = ?self.runtime(),
            "task process exited"
        );
        Ok(Some(code))
    }

    /// Collect output that arrived after the process exited, without waiting.
    ///
    /// Returns `true` once both pipes reached end-of-file, or once the drain
    /// window after exit has passed (a grandchild may still hold a pipe).
    pub(crate) fn drain_streams(&mut self) -> bool {
        self.read_streams();
        if !self.streams.is_open() {
            return true;
        }
        let expired = self
            .finished_at
            .is_some_and(|at| at.elapsed() >= STREAM_DRAIN_LIMIT);
        if expired {
            debug!(uid = self.uid, "stream readers still open after process exit; giving up");
        }
        expired
    }

    /// Persist the captured output if the launch spec asked for it.
    pub(crate) fn save_streams(&self) {
        let Some(path) = self.launch.as_ref().and_then(|l| l.save_streams.as_deref()) else {
            return;
        };
        if let Err(e) = self.write_streams(path) {
            warn!(uid = self.uid, path = ?path, error = %e, "failed to save task output");
        }
    }

    fn write_streams(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.streams.combined())?;
        debug!(uid = self.uid, path = ?path, "saved task output");
        Ok(())
    }

    /// Send a signal to the process. A no-op once the task has finished.
    ///
    /// Returns whether a signal was actually delivered.
    pub fn signal(&mut self, signal: Signal) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };

        process::send_signal(child, signal)?;
        self.signals_received += 1;
        debug!(uid = self.uid, ?signal, "signalled task process");
        Ok(true)
    }

    pub(crate) fn record_stop_condition(&mut self, name: &str) {
        if !self.fulfilled_stop_conditions.iter().any(|n| n == name) {
            self.fulfilled_stop_conditions.push(name.to_string());
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn priority(&self) -> Option<i64> {
        self.priority
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            TaskStatus::Finished(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Spawned
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Finished(_))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Launch parameters, available once the task was spawned.
    pub fn launch(&self) -> Option<&LaunchSpec> {
        self.launch.as_ref()
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn spawned_at(&self) -> Option<Instant> {
        self.spawned_at
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// Wall time between spawn and exit, for finished tasks.
    pub fn runtime(&self) -> Option<Duration> {
        Some(self.finished_at?.duration_since(self.spawned_at?))
    }

    /// Wall time since spawn, measured at `now` (or up to exit).
    pub fn elapsed_at(&self, now: Instant) -> Option<Duration> {
        let spawned = self.spawned_at?;
        let end = self.finished_at.unwrap_or(now);
        Some(end.saturating_duration_since(spawned))
    }

    pub fn signals_received(&self) -> usize {
        self.signals_received
    }

    /// Names of every stop condition that matched this task.
    pub fn fulfilled_stop_conditions(&self) -> &[String] {
        &self.fulfilled_stop_conditions
    }

    /// Whether the manager already asked this process to terminate.
    pub fn was_signalled(&self) -> bool {
        self.signals_received > 0
    }

    #[cfg(test)]
    pub(crate) fn streams_mut(&mut self) -> &mut Streams {
        &mut self.streams
    }

    #[cfg(test)]
    pub(crate) fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    #[cfg(test)]
    pub(crate) fn set_spawned_at(&mut self, at: Instant) {
        self.spawned_at = Some(at);
        self.status = TaskStatus::Spawned;
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "task {} ({name})", self.uid),
            None => write!(f, "task {}", self.uid),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("uid", &self.uid)
            .field("priority", &self.priority)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("pid", &self.pid)
            .field("signals_received", &self.signals_received)
            .finish_non_exhaustive()
    }
}
