//! Owning a set of processes as a unit.
//!
//! POSIX groups are process groups: the first member becomes the leader and
//! its pid is the group id. Windows groups are job objects with a completion
//! port for exit notifications. Membership is always read back from the OS,
//! so processes spawned by members belong to the group too.

use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

use crate::Pid;
use crate::Process;
use crate::ProcessError;
use crate::Result;
use crate::launcher::Initializer;
use crate::launcher::Launcher;
use crate::notify;
use crate::notify::AsyncWait;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use posix::GroupHandle;
#[cfg(windows)]
use windows::GroupHandle;

/// Native group identifier: the process group id on POSIX (`-1` while the
/// group has no leader), the job object handle on Windows.
#[cfg(unix)]
pub type NativeGroupHandle = libc::pid_t;
#[cfg(windows)]
pub type NativeGroupHandle = windows_sys::Win32::Foundation::HANDLE;

/// A [`ProcessGroup::attach`] that failed, carrying the process it was given.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct AttachError {
    #[source]
    source: ProcessError,
    process: Process,
}

impl AttachError {
    pub fn error(&self) -> &ProcessError {
        &self.source
    }

    pub fn into_parts(self) -> (ProcessError, Process) {
        (self.source, self.process)
    }
}

/// A set of processes terminated and waited on together.
///
/// While attached, dropping the group kills every member and, on POSIX,
/// reaps them.
#[derive(Debug)]
pub struct ProcessGroup {
    inner: GroupHandle,
    attached: bool,
    pending_wait: Option<AsyncWait>,
}

impl ProcessGroup {
    pub fn new() -> Result<Self> {
        Ok(Self::from_inner(GroupHandle::new()?))
    }

    /// Adopt an existing process group id.
    #[cfg(unix)]
    pub fn from_native(pgid: NativeGroupHandle) -> Result<Self> {
        Ok(Self::from_inner(GroupHandle::from_native(pgid)))
    }

    /// Adopt an existing job object. It must not have a completion port yet.
    #[cfg(windows)]
    pub fn from_native(job: std::os::windows::io::OwnedHandle) -> Result<Self> {
        Ok(Self::from_inner(GroupHandle::from_native(job)?))
    }

    fn from_inner(inner: GroupHandle) -> Self {
        Self {
            inner,
            attached: true,
            pending_wait: None,
        }
    }

    pub fn native_handle(&self) -> NativeGroupHandle {
        self.inner.native_handle()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Move a running process into the group. On success the group owns it;
    /// on failure the process comes back, still attached, in the error.
    ///
    /// On POSIX a child can only change groups before it calls `execve`, so
    /// this fails with `EACCES` for children that already run their target.
    /// Use [`ProcessGroup::emplace`] there instead.
    pub fn attach(&mut self, process: Process) -> std::result::Result<Pid, AttachError> {
        if let Err(source) = self.inner.attach(&process) {
            return Err(AttachError { source, process });
        }
        let pid = process.id();
        self.inner.adopt(process.into_handle());
        debug!(pid, "attached process to group");
        Ok(pid)
    }

    /// Launch a process directly into the group.
    pub fn emplace<I, S>(
        &mut self,
        exe: impl AsRef<Path>,
        args: I,
        initializers: &mut [&mut dyn Initializer],
    ) -> Result<Pid>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.emplace_with(Launcher::new(), exe, args, initializers)
    }

    /// [`ProcessGroup::emplace`] with a caller-prepared launcher.
    pub fn emplace_with<I, S>(
        &mut self,
        launcher: Launcher,
        exe: impl AsRef<Path>,
        args: I,
        initializers: &mut [&mut dyn Initializer],
    ) -> Result<Pid>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.prepare_emplace();
        let process = {
            let mut membership = self.inner.membership();
            let mut all: Vec<&mut dyn Initializer> = Vec::with_capacity(initializers.len() + 1);
            for initializer in initializers.iter_mut() {
                all.push(&mut **initializer);
            }
            all.push(&mut membership);
            launcher.launch(exe, args, &mut all)?
        };
        let pid = process.id();
        self.inner.adopt(process.into_handle());
        Ok(pid)
    }

    /// Whether `pid` currently belongs to the group, as reported by the OS.
    pub fn contains(&self, pid: Pid) -> Result<bool> {
        self.inner.contains(pid)
    }

    /// Kill every member. The group stays usable.
    pub fn terminate(&mut self) -> Result<()> {
        self.inner.terminate()
    }

    /// Block until the group has no members left.
    pub fn wait(&mut self) -> Result<()> {
        self.inner.wait()
    }

    /// Block until one member exits and return its pid and normalized exit
    /// code. Fails when the group has no members to wait for.
    pub fn wait_one(&mut self) -> Result<(Pid, i32)> {
        self.inner.wait_one()
    }

    /// Stop owning the members: dropping the group no longer kills them.
    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// Resolves once the group has no members left.
    ///
    /// Group futures and blocking waits consume the same exit notifications;
    /// only run one of them at a time per group.
    ///
    /// The future captures the group as it is now. On POSIX it does not see a
    /// group founded later by [`ProcessGroup::emplace`] after this one emptied,
    /// so create it after the members it should cover.
    pub fn wait_for_all(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.inner.wait_for_all()
    }

    /// Resolves to the pid and normalized exit code of the next member to
    /// exit.
    ///
    /// Captures the group like [`ProcessGroup::wait_for_all`].
    pub fn wait_for_one(&self) -> impl Future<Output = Result<(Pid, i32)>> + Send + 'static {
        self.inner.wait_for_one()
    }

    /// Run `completion` on `runtime` once the group has no members left.
    /// Replaces and cancels any pending callback wait on this group.
    pub fn async_wait<F>(&mut self, runtime: &Handle, completion: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.cancel_async_wait();
        let pending = notify::spawn_completion(runtime, self.wait_for_all(), completion);
        self.pending_wait = Some(pending);
    }

    /// Run `completion` on `runtime` once the next member exits.
    /// Replaces and cancels any pending callback wait on this group.
    pub fn async_wait_one<F>(&mut self, runtime: &Handle, completion: F)
    where
        F: FnOnce(Result<(Pid, i32)>) + Send + 'static,
    {
        self.cancel_async_wait();
        let pending = notify::spawn_completion(runtime, self.wait_for_one(), completion);
        self.pending_wait = Some(pending);
    }

    pub fn cancel_async_wait(&mut self) {
        if let Some(pending) = self.pending_wait.take() {
            pending.cancel();
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.attached {
            self.inner.kill_and_reap();
        }
    }
}
