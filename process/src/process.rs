use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::Pid;
use crate::Result;
use crate::handle::NativeHandle;
use crate::handle::NativeProcessHandle;
use crate::handle::ProcessHandle;
use crate::launcher;
use crate::launcher::Initializer;
use crate::notify;
use crate::notify::AsyncWait;
use crate::status::ExitState;
use crate::status::StatusCell;
use crate::status::classify;
use crate::status::eval_exit_status;

/// A child process.
///
/// While attached, dropping the `Process` kills the child if it is still
/// running and reaps it. [`Process::detach`] gives that responsibility up;
/// the handle stays usable for queries.
///
/// The exit status is cached once observed, so polling, waiting and async
/// completions agree on it no matter which of them reaped the child.
#[derive(Debug, Default)]
pub struct Process {
    handle: ProcessHandle,
    attached: bool,
    terminated: bool,
    status: Arc<StatusCell>,
    pending_wait: Option<AsyncWait>,
}

impl Process {
    /// Launch `exe` with `args`; see [`crate::launcher`] for the hook
    /// protocol.
    pub fn launch<I, S>(
        exe: impl AsRef<Path>,
        args: I,
        initializers: &mut [&mut dyn Initializer],
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        launcher::launch(exe, args, initializers)
    }

    /// Take ownership of an existing process. The result is attached: it
    /// kills the process on drop unless detached.
    ///
    /// On POSIX only children of this process can be waited on or reaped.
    #[cfg(unix)]
    pub fn attach(pid: Pid) -> Result<Self> {
        if pid <= 0 {
            return Err(crate::ProcessError::InvalidArgument(format!(
                "{pid} does not name a single process"
            )));
        }
        Ok(Self::from_handle(ProcessHandle::new(pid)))
    }

    /// Take ownership of an existing process. The result is attached: it
    /// kills the process on drop unless detached.
    #[cfg(windows)]
    pub fn attach(pid: Pid) -> Result<Self> {
        Ok(Self::from_handle(ProcessHandle::open(pid)?))
    }

    pub(crate) fn from_handle(handle: ProcessHandle) -> Self {
        Self {
            handle,
            attached: true,
            terminated: false,
            status: Arc::new(StatusCell::new()),
            pending_wait: None,
        }
    }

    /// Detach and give up the native handle.
    pub(crate) fn into_handle(mut self) -> ProcessHandle {
        self.detach();
        std::mem::take(&mut self.handle)
    }

    pub fn id(&self) -> Pid {
        self.handle.id()
    }

    pub fn native_handle(&self) -> NativeHandle {
        self.handle.native_handle()
    }

    /// Whether this object refers to a process at all. A default-constructed
    /// `Process` does not.
    pub fn valid(&self) -> bool {
        self.handle.valid()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Non-blocking check. Once this returns `false` the exit status is
    /// available from [`Process::exit_code`].
    pub fn running(&self) -> Result<bool> {
        self.handle.is_running(&self.status)
    }

    /// Block until the process is no longer running and return its
    /// normalized exit code. Returns immediately if the exit was already
    /// observed.
    pub fn wait(&self) -> Result<i32> {
        let raw = self.handle.wait(&self.status)?;
        Ok(eval_exit_status(raw))
    }

    /// Normalized exit code of the last observed status. Only meaningful
    /// once [`Process::running`] returned `false` or a wait completed.
    pub fn exit_code(&self) -> i32 {
        eval_exit_status(self.status.load())
    }

    /// Raw status as reported by the OS.
    pub fn native_exit_code(&self) -> i32 {
        self.status.load()
    }

    pub fn exit_state(&self) -> ExitState {
        classify(self.status.load())
    }

    /// Forcefully kill the process and collect its status.
    pub fn terminate(&mut self) -> Result<()> {
        self.handle.terminate(&self.status)?;
        self.terminated = true;
        Ok(())
    }

    /// Stop owning the process: dropping this object will no longer kill it.
    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// Resolves to the normalized exit code. The future shares this
    /// process's cached status but does not borrow it, so it can be spawned
    /// or outlive the `Process`.
    pub fn wait_for_exit(&self) -> impl Future<Output = Result<i32>> + Send + 'static {
        self.handle.wait_for_exit(Arc::clone(&self.status))
    }

    /// Run `completion` on `runtime` once the process is no longer running.
    ///
    /// At most one callback wait is pending per process; starting another
    /// cancels the previous one.
    pub fn async_wait<F>(&mut self, runtime: &Handle, completion: F)
    where
        F: FnOnce(Result<i32>) + Send + 'static,
    {
        self.cancel_async_wait();
        let pending = notify::spawn_completion(runtime, self.wait_for_exit(), completion);
        self.pending_wait = Some(pending);
    }

    /// Cancel a pending [`Process::async_wait`]; its completion never runs.
    pub fn cancel_async_wait(&mut self) {
        if let Some(pending) = self.pending_wait.take() {
            pending.cancel();
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.attached && !self.terminated && self.valid() {
            self.handle.terminate_if_running(&self.status);
        }
    }
}
