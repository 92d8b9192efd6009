use std::future::Future;
use std::io;

use tracing::debug;
use tracing::warn;

use crate::Pid;
use crate::Process;
use crate::ProcessError;
use crate::Result;
use crate::handle::ProcessHandle;
use crate::launcher::Initializer;
use crate::launcher::Launcher;
use crate::notify::poll_until_exit;
use crate::status::eval_exit_status;

const NO_GROUP: Pid = -1;

#[derive(Debug)]
pub(super) struct GroupHandle {
    pgid: Pid,
}

impl GroupHandle {
    pub(super) fn new() -> Result<Self> {
        Ok(Self { pgid: NO_GROUP })
    }

    pub(super) fn from_native(pgid: Pid) -> Self {
        Self { pgid }
    }

    pub(super) fn native_handle(&self) -> Pid {
        self.pgid
    }

    fn has_group(&self) -> bool {
        self.pgid > 0
    }

    /// Once every member has been reaped the group id is gone and may be
    /// reused; the next member has to start a fresh group.
    fn forget_if_empty(&mut self) {
        if !self.has_group() {
            return;
        }
        if unsafe { libc::killpg(self.pgid, 0) } == -1
            && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
        {
            debug!(pgid = self.pgid, "process group is empty; starting a new one");
            self.pgid = NO_GROUP;
        }
    }

    pub(super) fn attach(&mut self, process: &Process) -> Result<()> {
        self.forget_if_empty();
        let pid = process.id();
        let target = if self.has_group() { self.pgid } else { pid };
        if unsafe { libc::setpgid(pid, target) } == -1 {
            return Err(ProcessError::group(
                "setpgid failed",
                io::Error::last_os_error(),
            ));
        }
        if !self.has_group() {
            self.pgid = pid;
        }
        Ok(())
    }

    pub(super) fn prepare_emplace(&mut self) {
        self.forget_if_empty();
    }

    pub(super) fn membership(&mut self) -> Membership<'_> {
        Membership {
            pgid: &mut self.pgid,
        }
    }

    /// Members are tracked by group id alone.
    pub(super) fn adopt(&mut self, _handle: ProcessHandle) {}

    pub(super) fn contains(&self, pid: Pid) -> Result<bool> {
        if !self.has_group() {
            return Ok(false);
        }
        let pgid = unsafe { libc::getpgid(pid) };
        if pgid == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(false);
            }
            return Err(ProcessError::group("getpgid failed", err));
        }
        Ok(pgid == self.pgid)
    }

    pub(super) fn terminate(&mut self) -> Result<()> {
        if !self.has_group() {
            return Ok(());
        }
        if unsafe { libc::killpg(self.pgid, libc::SIGKILL) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(ProcessError::group("killpg failed", err));
            }
        }
        Ok(())
    }

    pub(super) fn wait(&mut self) -> Result<()> {
        if !self.has_group() {
            return Ok(());
        }
        loop {
            let mut raw = 0;
            if unsafe { libc::waitpid(-self.pgid, &mut raw, 0) } > 0 {
                continue;
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(()),
                _ => return Err(ProcessError::group("waitpid failed", err)),
            }
        }
    }

    pub(super) fn wait_one(&mut self) -> Result<(Pid, i32)> {
        if !self.has_group() {
            return Err(no_members());
        }
        loop {
            let mut raw = 0;
            let pid = unsafe { libc::waitpid(-self.pgid, &mut raw, 0) };
            if pid > 0 {
                if libc::WIFEXITED(raw) || libc::WIFSIGNALED(raw) {
                    return Ok((pid, eval_exit_status(raw)));
                }
                continue;
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return Err(ProcessError::group("waitpid failed", err)),
            }
        }
    }

    pub(super) fn wait_for_all(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let pgid = self.pgid;
        async move {
            if pgid <= 0 {
                return Ok(());
            }
            poll_until_exit(pgid, || reap_exited_members(pgid)).await
        }
    }

    pub(super) fn wait_for_one(
        &self,
    ) -> impl Future<Output = Result<(Pid, i32)>> + Send + 'static {
        let pgid = self.pgid;
        async move {
            if pgid <= 0 {
                return Err(no_members());
            }
            poll_until_exit(pgid, || reap_one_member(pgid)).await
        }
    }

    pub(super) fn kill_and_reap(&mut self) {
        if let Err(err) = self.terminate() {
            warn!(pgid = self.pgid, "failed to kill process group: {err}");
            return;
        }
        if let Err(err) = self.wait() {
            debug!(pgid = self.pgid, "failed to reap process group: {err}");
        }
    }
}

fn no_members() -> ProcessError {
    ProcessError::group(
        "group has no members",
        io::Error::from_raw_os_error(libc::ECHILD),
    )
}

/// Reap every member that has exited. `Some` once none are left.
fn reap_exited_members(pgid: Pid) -> Result<Option<()>> {
    loop {
        let mut raw = 0;
        let ret = unsafe { libc::waitpid(-pgid, &mut raw, libc::WNOHANG) };
        if ret > 0 {
            continue;
        }
        if ret == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => return Ok(Some(())),
            _ => return Err(ProcessError::group("waitpid failed", err)),
        }
    }
}

fn reap_one_member(pgid: Pid) -> Result<Option<(Pid, i32)>> {
    loop {
        let mut raw = 0;
        let pid = unsafe { libc::waitpid(-pgid, &mut raw, libc::WNOHANG) };
        if pid > 0 {
            if libc::WIFEXITED(raw) || libc::WIFSIGNALED(raw) {
                return Ok(Some((pid, eval_exit_status(raw))));
            }
            continue;
        }
        if pid == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            _ => return Err(ProcessError::group("waitpid failed", err)),
        }
    }
}

/// Puts the child into the group before it execs; the first member founds the
/// group with its own pid.
pub(super) struct Membership<'a> {
    pgid: &'a mut Pid,
}

impl Initializer for Membership<'_> {
    fn on_exec_setup(&mut self, launcher: &mut Launcher) {
        let target = if *self.pgid > 0 { *self.pgid } else { 0 };
        if unsafe { libc::setpgid(0, target) } == -1 {
            launcher.set_error(io::Error::last_os_error(), "failed to join process group");
        }
    }

    fn on_success(&mut self, launcher: &mut Launcher) {
        if *self.pgid <= 0 {
            *self.pgid = launcher.pid();
        }
    }
}
