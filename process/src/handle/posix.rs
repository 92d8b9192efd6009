use std::future::Future;
use std::io;
use std::sync::Arc;

use tracing::debug;

use super::NativeHandle;
use super::NativeProcessHandle;
use crate::Pid;
use crate::ProcessError;
use crate::Result;
use crate::notify;
use crate::status::StatusCell;

const INVALID_PID: Pid = -1;

/// A POSIX process is identified by its pid; there is nothing to close.
#[derive(Debug)]
pub(crate) struct PosixProcessHandle {
    pid: Pid,
}

impl PosixProcessHandle {
    pub(crate) fn new(pid: Pid) -> Self {
        Self { pid }
    }

    fn check_valid(&self) -> Result<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(ProcessError::InvalidArgument(
                "process handle is not bound to a process".to_string(),
            ))
        }
    }
}

impl Default for PosixProcessHandle {
    fn default() -> Self {
        Self::new(INVALID_PID)
    }
}

impl NativeProcessHandle for PosixProcessHandle {
    fn id(&self) -> Pid {
        self.pid
    }

    fn native_handle(&self) -> NativeHandle {
        self.pid
    }

    fn valid(&self) -> bool {
        self.pid > 0
    }

    fn is_running(&self, status: &StatusCell) -> Result<bool> {
        if !self.valid() || !status.is_running() {
            return Ok(false);
        }
        Ok(try_reap(self.pid, status)?.is_none())
    }

    fn wait(&self, status: &StatusCell) -> Result<i32> {
        self.check_valid()?;
        reap_blocking(self.pid, status)
    }

    fn terminate(&self, status: &StatusCell) -> Result<()> {
        self.check_valid()?;
        // A reaped pid may already belong to an unrelated process.
        if !status.is_running() {
            return Ok(());
        }
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } == -1 {
            return Err(ProcessError::terminate(
                self.pid,
                "kill failed",
                io::Error::last_os_error(),
            ));
        }
        if let Err(err) = reap_blocking(self.pid, status) {
            debug!(pid = self.pid, "could not reap terminated process: {err}");
        }
        Ok(())
    }

    fn terminate_if_running(&self, status: &StatusCell) {
        if !self.valid() || !status.is_running() {
            return;
        }
        match try_reap(self.pid, status) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            // Not our child (attached by pid): nothing to reap, still kill.
            Err(err) => debug!(pid = self.pid, "poll before teardown failed: {err}"),
        }
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                debug!(pid = self.pid, "kill during teardown failed: {err}");
            }
            return;
        }
        if let Err(err) = reap_blocking(self.pid, status) {
            debug!(pid = self.pid, "could not reap process during teardown: {err}");
        }
    }

    fn wait_for_exit(
        &self,
        status: Arc<StatusCell>,
    ) -> impl Future<Output = Result<i32>> + Send + 'static {
        let pid = self.pid;
        let valid = self.check_valid();
        async move {
            valid?;
            notify::wait_for_child_exit(pid, status).await
        }
    }
}

/// Non-blocking reap. Returns the settled raw status once the process is no
/// longer running, `None` while it still runs.
///
/// Reaps only under the cell's reap lock and settles the cell before
/// releasing it, so `ECHILD` here means the pid is not our child.
pub(crate) fn try_reap(pid: Pid, status: &StatusCell) -> Result<Option<i32>> {
    let _reap = status.lock_reap();
    loop {
        if !status.is_running() {
            return Ok(Some(status.load()));
        }
        let mut raw = 0;
        let ret = unsafe { libc::waitpid(pid, &mut raw, libc::WNOHANG) };
        if ret == 0 {
            return Ok(None);
        }
        if ret == pid {
            let raw = status.settle(raw);
            if status.is_running() {
                // Stopped or continued; still alive.
                return Ok(None);
            }
            return Ok(Some(raw));
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => {
                return Err(ProcessError::wait(
                    pid,
                    "process is not a child of this process",
                    err,
                ));
            }
            _ => return Err(ProcessError::wait(pid, "waitpid failed", err)),
        }
    }
}

/// Blocking reap. Returns the settled raw status.
///
/// Blocks in `waitid(WNOWAIT)`, which leaves the child unreaped, then reaps
/// through [`try_reap`]. Concurrent waiters all wake on the exit and exactly
/// one of them collects it under the reap lock.
pub(crate) fn reap_blocking(pid: Pid, status: &StatusCell) -> Result<i32> {
    loop {
        if let Some(raw) = try_reap(pid, status)? {
            return Ok(raw);
        }
        if let Err(err) = wait_until_exited(pid) {
            // Reaped by another waiter in between; `try_reap` sees the status
            // or reports a pid that is not ours.
            if err.raw_os_error() != Some(libc::ECHILD) {
                return Err(ProcessError::wait(pid, "waitid failed", err));
            }
        }
    }
}

/// Block until `pid` has exited without reaping it.
fn wait_until_exited(pid: Pid) -> io::Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}
