// src/task/mod.rs

//! Tasks: what to run, the processes running it, and the pending queue.
//!
//! - [`spec`] holds [`TaskSpec`] / [`LaunchSpec`], handed in by producers.
//! - [`worker_task`] holds [`Task`], the runtime state of one process.
//! - [`streams`] captures stdout/stderr without blocking the poll loop.
//! - [`monitor`] parses `!!map {...}` progress lines.
//! - [`process`] is the thin layer over `tokio::process` and OS signals.
//! - [`queue`] orders pending tasks by `(priority, uid)`.

pub mod monitor;
pub mod process;
pub mod queue;
pub mod spec;
pub mod streams;
pub mod worker_task;

pub use monitor::Monitor;
pub use process::Signal;
pub use queue::{QueueEntry, TaskQueue};
pub use spec::{LaunchSpec, SetupFn, TaskSpec};
pub use streams::{StreamLine, StreamSource, Streams};
pub use worker_task::{Task, TaskStatus};
