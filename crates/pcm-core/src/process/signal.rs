//! Staged termination of owned children (SIGTERM, grace, SIGKILL).
//!
//! Signals are only delivered while holding the child's lock after
//! `try_wait` confirms it has not been reaped, so a recycled PID is never
//! targeted.

use std::io;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Child handle shared between the owning thread and the registry.
pub type SharedChild = Arc<Mutex<Child>>;

/// How a child ended after a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// It had already exited; no signal was sent.
    AlreadyExited(ExitStatus),
    /// It exited within the grace period.
    Terminated(ExitStatus),
    /// It was force-killed after the grace period.
    Killed(ExitStatus),
}

impl Termination {
    pub fn status(&self) -> ExitStatus {
        match self {
            Termination::AlreadyExited(s) | Termination::Terminated(s) | Termination::Killed(s) => {
                *s
            }
        }
    }

    /// Whether this call caused the exit.
    pub fn was_signalled(&self) -> bool {
        !matches!(self, Termination::AlreadyExited(_))
    }

    pub fn method(&self) -> &'static str {
        match self {
            Termination::AlreadyExited(_) => "none",
            Termination::Terminated(_) => "terminate",
            Termination::Killed(_) => "kill",
        }
    }
}

/// Lock a shared child, recovering from a poisoned lock.
pub fn lock_child(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Return code for an exit status; signal deaths map to `-signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn force_kill(child: &SharedChild) -> io::Result<Termination> {
    let mut guard = lock_child(child);
    if let Some(status) = guard.try_wait()? {
        return Ok(Termination::Terminated(status));
    }
    tracing::warn!(pid = guard.id(), "process did not exit after SIGTERM, sending SIGKILL");
    guard.kill()?;
    Ok(Termination::Killed(guard.wait()?))
}

/// Terminate one child with escalation.
pub fn terminate_with_grace(
    child: &SharedChild,
    grace: Duration,
    poll: Duration,
) -> io::Result<Termination> {
    terminate_all(&[child], grace, poll)
        .pop()
        .unwrap_or_else(|| Err(io::Error::other("no termination outcome")))
}

/// Terminate several children sharing one grace period.
///
/// Every child gets SIGTERM first; those still alive when the grace period
/// ends are killed and reaped. Outcomes are returned in input order.
pub fn terminate_all(
    children: &[&SharedChild],
    grace: Duration,
    poll: Duration,
) -> Vec<io::Result<Termination>> {
    let mut outcomes: Vec<Option<io::Result<Termination>>> = children
        .iter()
        .map(|child| {
            let mut guard = lock_child(child);
            match guard.try_wait() {
                Ok(Some(status)) => Some(Ok(Termination::AlreadyExited(status))),
                Ok(None) => {
                    tracing::debug!(pid = guard.id(), "sending SIGTERM");
                    request_termination(&mut guard).err().map(Err)
                }
                Err(e) => Some(Err(e)),
            }
        })
        .collect();

    let deadline = Instant::now() + grace;
    loop {
        for (child, outcome) in children.iter().zip(outcomes.iter_mut()) {
            if outcome.is_some() {
                continue;
            }
            match lock_child(child).try_wait() {
                Ok(Some(status)) => *outcome = Some(Ok(Termination::Terminated(status))),
                Ok(None) => {}
                Err(e) => *outcome = Some(Err(e)),
            }
        }
        let now = Instant::now();
        if outcomes.iter().all(Option::is_some) || now >= deadline {
            break;
        }
        thread::sleep(poll.min(deadline - now));
    }

    children
        .iter()
        .zip(outcomes)
        .map(|(child, outcome)| outcome.unwrap_or_else(|| force_kill(child)))
        .collect()
}
