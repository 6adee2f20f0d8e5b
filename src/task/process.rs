// src/task/process.rs

//! OS process plumbing: building commands, sending signals, decoding exit
//! statuses.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

use crate::task::spec::LaunchSpec;

/// Signals the scheduler sends to task processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to terminate (SIGTERM).
    Term,
    /// Force-kill the process (SIGKILL). Only used by `WorkerManager::shutdown`.
    Kill,
}

pub(crate) fn build_command(launch: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args);

    if let Some(dir) = &launch.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &launch.env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}

/// Deliver `signal` to a running child.
pub(crate) fn send_signal(child: &mut Child, signal: Signal) -> io::Result<()> {
    match signal {
        Signal::Kill => child.start_kill(),
        Signal::Term => terminate(child),
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Exit code of a finished process.
///
/// Processes ended by a signal report the negated signal number, so a task
/// terminated with SIGTERM finishes with `-15`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }

    -1
}
