// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunpoolError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("invalid task uid {0}: must be a non-negative integer")]
    InvalidUid(i64),

    #[error("a task with uid {0} was already added")]
    DuplicateUid(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a reporter is already attached to this worker manager")]
    ReporterAlreadyAttached,

    #[error("invalid worker manager state: {0}")]
    InvalidState(&'static str),

    #[error("detached working is not supported")]
    DetachNotSupported,

    #[error("task {0} was already spawned")]
    AlreadySpawned(u64),

    #[error("failed to spawn process for task {uid}: {source}")]
    Spawn {
        uid: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("task queue is empty")]
    QueueEmpty,

    #[error("total timeout of {0:?} reached")]
    TotalTimeout(Duration),

    #[error("task {uid} exited with non-zero exit code {exit_code}")]
    TaskFailed { uid: u64, exit_code: i32 },

    #[error("fault injected into worker manager: {0}")]
    Foreign(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunpoolError {
    /// Process exit code that corresponds to this error.
    ///
    /// A failed task propagates its own exit code (`128 + n` if it was killed
    /// by signal `n`); everything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunpoolError::TaskFailed { exit_code, .. } if *exit_code > 0 => *exit_code,
            RunpoolError::TaskFailed { exit_code, .. } if *exit_code < 0 => {
                128i32.saturating_sub(*exit_code)
            }
            _ => 1,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunpoolError>;
