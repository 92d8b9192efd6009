use std::io;
use std::sync::Arc;

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::trace;

use crate::Pid;
use crate::ProcessError;
use crate::Result;
use crate::handle::try_reap;
use crate::status::StatusCell;
use crate::status::eval_exit_status;

/// Drive `poll` until it yields a value, re-polling after every `SIGCHLD`.
///
/// The listener is installed before the first poll so an exit between the
/// poll and the first `recv` still wakes us. Wakeups caused by unrelated
/// children just re-arm the listener.
pub(crate) async fn poll_until_exit<T, F>(pid: Pid, mut poll: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let mut sigchld = signal(SignalKind::child())
        .map_err(|err| ProcessError::wait(pid, "failed to listen for SIGCHLD", err))?;
    loop {
        if let Some(value) = poll()? {
            return Ok(value);
        }
        trace!(pid, "still running; waiting for SIGCHLD");
        if sigchld.recv().await.is_none() {
            return Err(ProcessError::wait(
                pid,
                "SIGCHLD listener closed",
                io::Error::from(io::ErrorKind::BrokenPipe),
            ));
        }
    }
}

/// Normalized exit code of `pid` once it is no longer running.
pub(crate) async fn wait_for_child_exit(pid: Pid, status: Arc<StatusCell>) -> Result<i32> {
    if !status.is_running() {
        return Ok(eval_exit_status(status.load()));
    }
    let raw = poll_until_exit(pid, || try_reap(pid, &status)).await?;
    Ok(eval_exit_status(raw))
}
