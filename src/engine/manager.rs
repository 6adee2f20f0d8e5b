// src/engine/manager.rs

//! The worker manager and its polling loop.
//!
//! One loop iteration:
//!
//! 1. abort if the total timeout elapsed,
//! 2. drain the fault channel,
//! 3. spawn at most one task if a worker is free,
//! 4. report `while_working` (unless streams are forwarded),
//! 5. read task output,
//! 6. apply stop conditions,
//! 7. poll active tasks, then retire exited ones whose output is collected,
//! 8. run the post-poll callback,
//! 9. sleep for `poll_delay`.
//!
//! The loop ends when the queue is empty and no task is active or draining. Any abort
//! signals every active task, fires `after_abort` and returns the error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::faults::{self, Fault, FaultAction, FaultSender};
use crate::engine::observer::TaskObserver;
use crate::engine::{ManagerState, ManagerTimes};
use crate::errors::{Result, RunpoolError};
use crate::report::{Hook, ReportContext, Reporter, TaskCounters};
use crate::stop::{self, LiveInfo, StopCondition};
use crate::task::{Signal, StreamSource, Task, TaskQueue, TaskSpec, TaskStatus};
use crate::types::NonzeroExitHandling;

/// Static settings of a worker manager.
#[derive(Debug, Clone)]
pub struct WorkerManagerConfig {
    /// Maximum number of concurrently running tasks.
    pub num_workers: usize,
    /// Sleep between two loop iterations.
    pub poll_delay: Duration,
    pub nonzero_exit_handling: NonzeroExitHandling,
}

impl Default for WorkerManagerConfig {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            poll_delay: Duration::from_millis(50),
            nonzero_exit_handling: NonzeroExitHandling::Ignore,
        }
    }
}

/// Per-run options of [`WorkerManager::start_working`].
#[derive(Default)]
pub struct RunOptions {
    /// Echo task output as it arrives. Suppresses `while_working` reports.
    pub forward_streams: bool,
    /// Total timeout for the whole run.
    pub timeout: Option<Duration>,
    pub stop_conditions: Vec<StopCondition>,
    /// Called once per loop iteration, after polling.
    pub post_poll: Option<Box<dyn FnMut() + Send>>,
    /// Running detached is not supported; setting this is rejected.
    pub detach: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward_streams(mut self, forward: bool) -> Self {
        self.forward_streams = forward;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stop_condition(mut self, condition: StopCondition) -> Self {
        self.stop_conditions.push(condition);
        self
    }

    pub fn stop_conditions(mut self, conditions: impl IntoIterator<Item = StopCondition>) -> Self {
        self.stop_conditions.extend(conditions);
        self
    }

    pub fn post_poll(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.post_poll = Some(Box::new(f));
        self
    }

    pub fn detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("forward_streams", &self.forward_streams)
            .field("timeout", &self.timeout)
            .field(
                "stop_conditions",
                &self.stop_conditions.iter().map(StopCondition::name).collect::<Vec<_>>(),
            )
            .field("post_poll", &self.post_poll.is_some())
            .field("detach", &self.detach)
            .finish()
    }
}

/// Runs tasks as child processes on a bounded number of workers.
pub struct WorkerManager {
    config: WorkerManagerConfig,
    /// Every task ever added, in insertion order.
    tasks: Vec<Task>,
    /// uid -> index into `tasks`.
    index: HashMap<u64, usize>,
    queue: TaskQueue,
    /// Indices of spawned, not yet finished tasks.
    active: Vec<usize>,
    /// Indices of exited tasks whose output pipes are still open.
    draining: Vec<usize>,
    num_finished: usize,
    next_uid: u64,
    state: ManagerState,
    times: ManagerTimes,
    timeout: Option<Duration>,
    fault_tx: FaultSender,
    fault_rx: mpsc::UnboundedReceiver<Fault>,
    reporter: Option<Box<dyn Reporter>>,
    observers: Vec<Box<dyn TaskObserver>>,
}

impl WorkerManager {
    pub fn new(config: WorkerManagerConfig) -> Result<Self> {
        if config.num_workers == 0 {
            return Err(RunpoolError::InvalidArgument(
                "num_workers must be at least 1".into(),
            ));
        }
        if config.poll_delay.is_zero() {
            return Err(RunpoolError::InvalidArgument(
                "poll_delay must be positive".into(),
            ));
        }

        let (fault_tx, fault_rx) = FaultSender::channel();
        debug!(
            num_workers = config.num_workers,
            poll_delay = ?config.poll_delay,
            nonzero_exit_handling = %config.nonzero_exit_handling,
            "worker manager initialised"
        );

        Ok(Self {
            config,
            tasks: Vec::new(),
            index: HashMap::new(),
            queue: TaskQueue::new(),
            active: Vec::new(),
            draining: Vec::new(),
            num_finished: 0,
            next_uid: 0,
            state: ManagerState::Idle,
            times: ManagerTimes::new(),
            timeout: None,
            fault_tx,
            fault_rx,
            reporter: None,
            observers: Vec::new(),
        })
    }

    /// Attach the reporter. Only one reporter can be attached.
    pub fn attach_reporter(&mut self, reporter: impl Reporter + 'static) -> Result<()> {
        if self.reporter.is_some() {
            return Err(RunpoolError::ReporterAlreadyAttached);
        }
        self.reporter = Some(Box::new(reporter));
        Ok(())
    }

    pub fn add_observer(&mut self, observer: impl TaskObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Create a task from `spec` and queue it.
    ///
    /// Without an explicit uid the task gets one above every uid seen so far.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<&Task> {
        if matches!(self.state, ManagerState::Completed | ManagerState::Aborted) {
            return Err(RunpoolError::InvalidState(
                "cannot add tasks after the run has ended",
            ));
        }

        let uid = match spec.uid {
            Some(uid) => uid,
            None => i64::try_from(self.next_uid)
                .map_err(|_| RunpoolError::InvalidArgument("task uid space exhausted".into()))?,
        };
        let task = Task::new(uid, spec)?;
        let uid = task.uid();
        if self.index.contains_key(&uid) {
            return Err(RunpoolError::DuplicateUid(uid));
        }

        self.queue.enqueue(task.priority(), uid)?;
        debug!(uid, priority = ?task.priority(), "task added");

        let idx = self.tasks.len();
        self.tasks.push(task);
        self.index.insert(uid, idx);
        self.next_uid = self.next_uid.max(uid.saturating_add(1));
        Ok(&self.tasks[idx])
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn num_finished_tasks(&self) -> usize {
        self.num_finished
    }

    pub fn num_pending_tasks(&self) -> usize {
        self.queue.len()
    }

    pub fn num_active_tasks(&self) -> usize {
        self.active.len()
    }

    pub fn num_free_workers(&self) -> usize {
        self.config.num_workers.saturating_sub(self.active.len())
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.active.iter().map(|&idx| &self.tasks[idx])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, uid: u64) -> Option<&Task> {
        self.index.get(&uid).map(|&idx| &self.tasks[idx])
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn times(&self) -> &ManagerTimes {
        &self.times
    }

    pub fn config(&self) -> &WorkerManagerConfig {
        &self.config
    }

    /// Handle for injecting faults, e.g. from a signal handler or a thread.
    pub fn fault_sender(&self) -> FaultSender {
        self.fault_tx.clone()
    }

    pub fn counters(&self) -> TaskCounters {
        TaskCounters {
            total: self.tasks.len(),
            pending: self.queue.len(),
            active: self.active.len(),
            finished: self.num_finished,
            failed: self
                .tasks
                .iter()
                .filter(|t| matches!(t.status(), TaskStatus::Finished(code) if code != 0))
                .count(),
        }
    }

    /// Work through the queue until it is empty and every task finished.
    ///
    /// Returns an error if the run was aborted. Tasks still running after an
    /// abort have been sent SIGTERM; [`shutdown`](Self::shutdown) waits for
    /// them.
    pub async fn start_working(&mut self, opts: RunOptions) -> Result<()> {
        if opts.detach {
            return Err(RunpoolError::DetachNotSupported);
        }
        if opts.timeout.is_some_and(|t| t.is_zero()) {
            return Err(RunpoolError::InvalidArgument(
                "timeout must be positive".into(),
            ));
        }
        if self.state != ManagerState::Idle {
            return Err(RunpoolError::InvalidState(
                "start_working can only be called once",
            ));
        }

        let RunOptions {
            forward_streams,
            timeout,
            stop_conditions,
            mut post_poll,
            ..
        } = opts;

        let started = Instant::now();
        self.state = ManagerState::Working;
        self.timeout = timeout;
        self.times.started = Some(started);
        self.times.timeout_at = timeout.map(|t| started + t);

        info!(
            tasks = self.tasks.len(),
            num_workers = self.config.num_workers,
            timeout = ?timeout,
            stop_conditions = stop_conditions.len(),
            "worker manager started working"
        );

        let outcome = self
            .work_loop(forward_streams, &stop_conditions, &mut post_poll)
            .await;

        match outcome {
            Ok(()) => {
                self.state = ManagerState::Completed;
                self.times.ended = Some(Instant::now());
                self.invoke_report(Hook::AfterWork, None, true);
                info!(
                    finished = self.num_finished,
                    elapsed = ?self.times.elapsed(Instant::now()),
                    "all tasks finished"
                );
                Ok(())
            }
            Err(err) => {
                self.abort(&err, forward_streams);
                Err(err)
            }
        }
    }

    async fn work_loop(
        &mut self,
        forward_streams: bool,
        stop_conditions: &[StopCondition],
        post_poll: &mut Option<Box<dyn FnMut() + Send>>,
    ) -> Result<()> {
        while !self.active.is_empty() || !self.draining.is_empty() || !self.queue.is_empty() {
            if let Some(deadline) = self.times.timeout_at {
                if Instant::now() >= deadline {
                    return Err(RunpoolError::TotalTimeout(self.timeout.unwrap_or_default()));
                }
            }

            self.handle_faults()?;

            if self.active.len() < self.config.num_workers && !self.queue.is_empty() {
                self.grab_task()?;
            }

            if !forward_streams {
                self.invoke_report(Hook::WhileWorking, None, false);
            }

            self.read_streams(forward_streams);
            self.apply_stop_conditions(stop_conditions);

            self.poll_active()?;
            for idx in self.retire_drained(forward_streams, false) {
                let task = &self.tasks[idx];
                let Some(code) = task.exit_code() else { continue };
                if code == 0 {
                    continue;
                }
                if task.was_signalled() {
                    debug!(uid = task.uid(), exit_code = code, "terminated task exited");
                    continue;
                }
                self.fault_tx.send(Fault::NonZeroExit {
                    uid: task.uid(),
                    exit_code: code,
                })?;
            }

            if let Some(f) = post_poll.as_mut() {
                f();
            }

            tokio::time::sleep(self.config.poll_delay).await;
        }

        // Faults from the last retired tasks.
        self.handle_faults()
    }

    fn handle_faults(&mut self) -> Result<()> {
        while let Ok(fault) = self.fault_rx.try_recv() {
            match faults::decide(fault, self.config.nonzero_exit_handling) {
                FaultAction::Ignore { uid, exit_code } => {
                    debug!(uid, exit_code, "ignoring non-zero exit");
                }
                FaultAction::Warn { uid, exit_code } => {
                    warn!(
                        uid,
                        exit_code,
                        "task exited with non-zero exit code; last lines of output:\n{}",
                        self.output_tail(uid)
                    );
                }
                FaultAction::Abort(reason) => {
                    if let faults::AbortReason::TaskFailed { uid, exit_code } = &reason {
                        error!(
                            uid = *uid,
                            exit_code = *exit_code,
                            "task exited with non-zero exit code; last lines of output:\n{}",
                            self.output_tail(*uid)
                        );
                    }
                    return Err(reason.into_error(self.timeout.unwrap_or_default()));
                }
            }
        }
        Ok(())
    }

    fn output_tail(&self, uid: u64) -> String {
        let n = self.config.nonzero_exit_handling.context_lines();
        let Some(task) = self.task(uid) else {
            return String::new();
        };
        let lines: Vec<&str> = task
            .streams()
            .tail(n)
            .iter()
            .map(|l| l.text.as_str())
            .collect();
        if lines.is_empty() {
            "    (no output)".to_string()
        } else {
            lines
                .iter()
                .map(|l| format!("    {l}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    fn grab_task(&mut self) -> Result<()> {
        let entry = self.queue.dequeue_highest_priority()?;
        let idx = *self
            .index
            .get(&entry.uid)
            .ok_or(RunpoolError::InvalidState("queued uid has no task"))?;

        self.tasks[idx].spawn()?;
        self.active.push(idx);

        for observer in self.observers.iter_mut() {
            observer.on_spawn(&self.tasks[idx]);
        }
        self.invoke_report(Hook::TaskSpawned, Some(idx), false);
        Ok(())
    }

    fn read_streams(&mut self, forward: bool) {
        for &idx in &self.active {
            let task = &mut self.tasks[idx];
            let before = task.streams().len();
            task.read_streams();
            if forward {
                forward_lines(task, before);
            }
        }
    }

    fn apply_stop_conditions(&mut self, conditions: &[StopCondition]) {
        if conditions.is_empty() || self.active.is_empty() {
            return;
        }

        let now = Instant::now();
        let info = LiveInfo {
            now,
            run_elapsed: self.times.elapsed(now),
            num_active: self.active.len(),
            num_finished: self.num_finished,
        };
        let matches = stop::collect_matches(
            conditions,
            self.active.iter().map(|&idx| &self.tasks[idx]),
            &info,
        );

        for (uid, names) in matches {
            let Some(&idx) = self.index.get(&uid) else { continue };
            let task = &mut self.tasks[idx];
            let already_signalled = task.was_signalled();
            for name in &names {
                task.record_stop_condition(name);
            }
            if already_signalled {
                continue;
            }

            info!(uid, conditions = ?names, "stop condition fulfilled; terminating task");
            if let Err(e) = task.signal(Signal::Term) {
                warn!(uid, error = %e, "failed to signal task");
            }
        }
    }

    /// Move every task whose process exited from `active` to `draining`.
    fn poll_active(&mut self) -> Result<()> {
        let mut still_active = Vec::with_capacity(self.active.len());
        for &idx in &self.active {
            match self.tasks[idx].poll_status()? {
                Some(_) => self.draining.push(idx),
                None => still_active.push(idx),
            }
        }
        self.num_finished += self.active.len() - still_active.len();
        self.active = still_active;
        Ok(())
    }

    /// Collect late output of exited tasks and retire those that are done.
    /// With `force`, output still in flight is given up on. Returns the
    /// retired indices.
    fn retire_drained(&mut self, forward: bool, force: bool) -> Vec<usize> {
        if self.draining.is_empty() {
            return Vec::new();
        }

        let mut retired = Vec::new();
        let mut still_draining = Vec::new();
        for &idx in &self.draining {
            let task = &mut self.tasks[idx];
            let before = task.streams().len();
            let done = task.drain_streams() || force;
            if forward {
                forward_lines(task, before);
            }
            if done {
                task.save_streams();
                retired.push(idx);
            } else {
                still_draining.push(idx);
            }
        }
        self.draining = still_draining;

        for &idx in &retired {
            for observer in self.observers.iter_mut() {
                observer.on_finished(&self.tasks[idx]);
            }
            self.invoke_report(Hook::TaskFinished, Some(idx), false);
        }
        retired
    }

    fn abort(&mut self, err: &RunpoolError, forward: bool) {
        warn!(
            error = %err,
            active = self.active.len(),
            "aborting run; terminating active tasks"
        );
        self.signal_active(Signal::Term);
        self.retire_drained(forward, true);
        self.state = ManagerState::Aborted;
        self.times.ended = Some(Instant::now());
        self.invoke_report(Hook::AfterAbort, None, true);
    }

    fn signal_active(&mut self, signal: Signal) {
        for &idx in &self.active {
            let task = &mut self.tasks[idx];
            if let Err(e) = task.signal(signal) {
                warn!(uid = task.uid(), ?signal, error = %e, "failed to signal task");
            }
        }
    }

    /// Wait up to `grace` for tasks still running after an abort, then kill
    /// the rest and reap them.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        info!(remaining = self.active.len(), ?grace, "waiting for tasks to exit");

        let deadline = Instant::now() + grace;
        let mut killed = false;
        loop {
            self.poll_active()?;
            self.retire_drained(false, false);
            if self.active.is_empty() && self.draining.is_empty() {
                break;
            }
            if !killed && Instant::now() >= deadline {
                warn!(
                    remaining = self.active.len(),
                    "grace period over; killing remaining tasks"
                );
                self.signal_active(Signal::Kill);
                killed = true;
            }
            tokio::time::sleep(self.config.poll_delay).await;
        }
        debug!("all task processes reaped");
        Ok(())
    }

    fn invoke_report(&mut self, hook: Hook, task: Option<usize>, force: bool) {
        let counters = self.counters();
        let Some(reporter) = self.reporter.as_mut() else {
            return;
        };
        let ctx = ReportContext {
            counters,
            num_workers: self.config.num_workers,
            times: &self.times,
            tasks: &self.tasks,
            task: task.map(|idx| &self.tasks[idx]),
            now: Instant::now(),
        };
        if let Err(e) = reporter.report(hook, &ctx, force) {
            warn!(%hook, error = %e, "reporter failed");
        }
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("tasks", &self.tasks.len())
            .field("active", &self.active.len())
            .field("finished", &self.num_finished)
            .finish_non_exhaustive()
    }
}

fn forward_lines(task: &Task, from: usize) {
    for line in &task.streams().lines()[from..] {
        match line.source {
            StreamSource::Stdout => println!("[{}] {}", task.uid(), line.text),
            StreamSource::Stderr => eprintln!("[{}] {}", task.uid(), line.text),
        }
    }
}
