//! Decoding of native wait statuses and exit codes.
//!
//! Every path that reads a raw status (blocking wait, polling, group waits and
//! async completions) goes through these functions, so the meaning of an exit
//! code is the same regardless of how it was obtained.

#[cfg(unix)]
use std::sync::Mutex;
#[cfg(unix)]
use std::sync::MutexGuard;
#[cfg(unix)]
use std::sync::PoisonError;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

/// Raw status value meaning "not reaped yet".
///
/// On POSIX this encodes a stopped process (`WIFSTOPPED`), which is never
/// reported by the waits issued here because `WUNTRACED` is not passed.
#[cfg(unix)]
pub const STILL_ACTIVE: i32 = 0x017f;

/// Raw status value meaning "not reaped yet" (`STILL_ACTIVE` from the
/// Windows SDK).
#[cfg(windows)]
pub const STILL_ACTIVE: i32 = 259;

/// Classification of a raw status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    Exited(i32),
    /// Terminated by the given signal number (POSIX only).
    Signaled(i32),
}

impl ExitState {
    pub fn is_running(self) -> bool {
        matches!(self, ExitState::Running)
    }

    /// The normalized exit code, `None` while running.
    pub fn code(self) -> Option<i32> {
        match self {
            ExitState::Running => None,
            ExitState::Exited(code) | ExitState::Signaled(code) => Some(code),
        }
    }
}

#[cfg(unix)]
pub fn classify(raw: i32) -> ExitState {
    if libc::WIFEXITED(raw) {
        ExitState::Exited(libc::WEXITSTATUS(raw))
    } else if libc::WIFSIGNALED(raw) {
        ExitState::Signaled(libc::WTERMSIG(raw))
    } else {
        ExitState::Running
    }
}

#[cfg(windows)]
pub fn classify(raw: i32) -> ExitState {
    if raw == STILL_ACTIVE {
        ExitState::Running
    } else {
        ExitState::Exited(raw)
    }
}

/// Normalized exit code: the exit code if the process exited, the signal
/// number if it was killed by a signal, the raw value otherwise.
pub fn eval_exit_status(raw: i32) -> i32 {
    classify(raw).code().unwrap_or(raw)
}

pub fn is_code_running(raw: i32) -> bool {
    classify(raw).is_running()
}

/// Shared cell holding the raw status of one process.
///
/// The cell starts at [`STILL_ACTIVE`] and moves to a terminal value at most
/// once; later stores are ignored so a late poller can never overwrite the
/// status an earlier reaper recorded.
///
/// On POSIX every reap of the process happens under the cell's reap lock and
/// settles the cell before the lock is released. A waiter holding the lock
/// therefore either sees the terminal status or owns the unreaped child.
#[derive(Debug)]
pub(crate) struct StatusCell {
    raw: AtomicI32,
    #[cfg(unix)]
    reap: Mutex<()>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self::from_raw(STILL_ACTIVE)
    }

    fn from_raw(raw: i32) -> Self {
        Self {
            raw: AtomicI32::new(raw),
            #[cfg(unix)]
            reap: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_raw(raw: i32) -> Self {
        Self::from_raw(raw)
    }

    pub(crate) fn load(&self) -> i32 {
        self.raw.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        is_code_running(self.load())
    }

    /// Record a terminal status and return the value now held by the cell.
    pub(crate) fn settle(&self, raw: i32) -> i32 {
        if is_code_running(raw) {
            return self.load();
        }
        match self
            .raw
            .compare_exchange(STILL_ACTIVE, raw, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => raw,
            Err(current) => current,
        }
    }

    /// Serializes reaping. Held only around non-blocking `waitpid` calls.
    #[cfg(unix)]
    pub(crate) fn lock_reap(&self) -> MutexGuard<'_, ()> {
        self.reap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
