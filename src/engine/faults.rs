// src/engine/faults.rs

//! The fault channel and the non-zero-exit policy.
//!
//! Faults are the only thing that may enter the worker manager from outside
//! its polling loop. They are queued on an unbounded channel and drained once
//! per loop iteration, where [`decide`] turns each of them into an action.
//! `decide` is pure so the policy can be tested without processes.

use std::fmt;

use tokio::sync::mpsc;

use crate::errors::{Result, RunpoolError};
use crate::types::NonzeroExitHandling;

/// Something went wrong that the polling loop has to react to.
pub enum Fault {
    /// The total run timeout elapsed.
    Timeout,
    /// A task exited with a non-zero code.
    NonZeroExit { uid: u64, exit_code: i32 },
    /// Anything else, e.g. raised by a monitor running on another thread.
    Foreign(anyhow::Error),
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Timeout => f.write_str("Timeout"),
            Fault::NonZeroExit { uid, exit_code } => f
                .debug_struct("NonZeroExit")
                .field("uid", uid)
                .field("exit_code", exit_code)
                .finish(),
            Fault::Foreign(err) => f.debug_tuple("Foreign").field(&err.to_string()).finish(),
        }
    }
}

/// What the loop does with a fault.
#[derive(Debug)]
pub enum FaultAction {
    Ignore { uid: u64, exit_code: i32 },
    Warn { uid: u64, exit_code: i32 },
    Abort(AbortReason),
}

/// Why a run is aborted.
#[derive(Debug)]
pub enum AbortReason {
    Timeout,
    TaskFailed { uid: u64, exit_code: i32 },
    Foreign(anyhow::Error),
}

impl AbortReason {
    pub(crate) fn into_error(self, timeout: std::time::Duration) -> RunpoolError {
        match self {
            AbortReason::Timeout => RunpoolError::TotalTimeout(timeout),
            AbortReason::TaskFailed { uid, exit_code } => {
                RunpoolError::TaskFailed { uid, exit_code }
            }
            AbortReason::Foreign(err) => RunpoolError::Foreign(err),
        }
    }
}

/// Apply the non-zero-exit policy to a fault.
///
/// Only `NonZeroExit` is subject to the policy; timeouts and foreign faults
/// always abort.
pub fn decide(fault: Fault, handling: NonzeroExitHandling) -> FaultAction {
    match fault {
        Fault::NonZeroExit { uid, exit_code } => match handling {
            NonzeroExitHandling::Ignore => FaultAction::Ignore { uid, exit_code },
            NonzeroExitHandling::Warn => FaultAction::Warn { uid, exit_code },
            NonzeroExitHandling::Raise => {
                FaultAction::Abort(AbortReason::TaskFailed { uid, exit_code })
            }
        },
        Fault::Timeout => FaultAction::Abort(AbortReason::Timeout),
        Fault::Foreign(err) => FaultAction::Abort(AbortReason::Foreign(err)),
    }
}

/// Cloneable, thread-safe handle for injecting faults into a worker manager.
#[derive(Debug, Clone)]
pub struct FaultSender {
    tx: mpsc::UnboundedSender<Fault>,
}

impl FaultSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Fault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, fault: Fault) -> Result<()> {
        self.tx
            .send(fault)
            .map_err(|_| anyhow::anyhow!("worker manager is gone; fault dropped"))?;
        Ok(())
    }

    /// Shorthand for injecting a [`Fault::Foreign`].
    pub fn send_foreign(&self, err: impl Into<anyhow::Error>) -> Result<()> {
        self.send(Fault::Foreign(err.into()))
    }
}
