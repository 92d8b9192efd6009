//! Ownership of exactly one native process resource.
//!
//! The platform backends expose the same surface through
//! [`NativeProcessHandle`]; [`crate::Process`] and the group code only call
//! through that trait.

use std::future::Future;
use std::sync::Arc;

use crate::Pid;
use crate::Result;
use crate::status::StatusCell;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use posix::PosixProcessHandle as ProcessHandle;
#[cfg(unix)]
pub(crate) use posix::reap_blocking;
#[cfg(unix)]
pub(crate) use posix::try_reap;
#[cfg(windows)]
pub(crate) use windows::WindowsProcessHandle as ProcessHandle;
#[cfg(windows)]
pub(crate) use windows::exit_code_of;

/// Platform handle type returned by `native_handle()`.
#[cfg(unix)]
pub type NativeHandle = libc::pid_t;
#[cfg(windows)]
pub type NativeHandle = windows_sys::Win32::Foundation::HANDLE;

pub(crate) trait NativeProcessHandle: Default + Send {
    fn id(&self) -> Pid;

    fn native_handle(&self) -> NativeHandle;

    /// True once bound to an OS process, regardless of whether it still runs.
    fn valid(&self) -> bool;

    /// Non-blocking poll. A terminal status in `status` short-circuits without
    /// a syscall.
    fn is_running(&self, status: &StatusCell) -> Result<bool>;

    /// Block until the process is no longer running and return the raw
    /// status.
    fn wait(&self, status: &StatusCell) -> Result<i32>;

    /// Forcefully kill the process.
    fn terminate(&self, status: &StatusCell) -> Result<()>;

    /// Teardown variant of [`NativeProcessHandle::terminate`]: kills only a
    /// running process and never fails.
    fn terminate_if_running(&self, status: &StatusCell);

    /// Future resolving to the normalized exit code once the process is no
    /// longer running. The future owns everything it needs so it can be
    /// spawned on a runtime.
    fn wait_for_exit(
        &self,
        status: Arc<StatusCell>,
    ) -> impl Future<Output = Result<i32>> + Send + 'static;
}
