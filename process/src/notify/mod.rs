//! Bridges OS exit notifications into tokio.
//!
//! POSIX has no per-process notification, so exit futures listen for
//! `SIGCHLD` and re-poll the process after every wakeup. Windows registers a
//! one-shot wait on the process handle, and job objects are drained from their
//! completion port on the blocking pool.
//!
//! Callback-style waits are spawned onto a caller-supplied runtime and can be
//! cancelled through the returned [`AsyncWait`].

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use posix::poll_until_exit;
#[cfg(unix)]
pub(crate) use posix::wait_for_child_exit;
#[cfg(windows)]
pub(crate) use windows::JobMessage;
#[cfg(windows)]
pub(crate) use windows::drain_job_messages;
#[cfg(windows)]
pub(crate) use windows::next_job_message;
#[cfg(windows)]
pub(crate) use windows::wait_for_object;

/// A pending callback-style wait.
///
/// Dropping the token leaves the wait running; use [`AsyncWait::cancel`] to
/// stop it. A cancelled wait never invokes its completion.
#[derive(Debug)]
pub struct AsyncWait {
    abort: AbortHandle,
}

impl AsyncWait {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// True once the completion ran or the wait was cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Spawn `wait` on `runtime` and hand its output to `completion`.
pub(crate) fn spawn_completion<T, W, F>(runtime: &Handle, wait: W, completion: F) -> AsyncWait
where
    T: Send + 'static,
    W: Future<Output = T> + Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    let task = runtime.spawn(async move {
        let outcome = wait.await;
        completion(outcome);
    });
    AsyncWait {
        abort: task.abort_handle(),
    }
}
