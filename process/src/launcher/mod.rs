//! Creating child processes.
//!
//! A [`Launcher`] is consumed by one launch. Callers customize a launch by
//! passing [`Initializer`]s, whose hooks run in order at fixed points of the
//! launch protocol:
//!
//! 1. `on_setup` before the process is created. Setting an error on the
//!    launcher aborts with a setup error and nothing is spawned.
//! 2. POSIX only: `on_exec_setup` in the child between `fork` and `execve`.
//! 3. `on_success` in the parent once the child is known to run the target
//!    image. An error set here terminates the child.
//! 4. `on_error` whenever the launch fails, followed on POSIX by
//!    `on_fork_error` or `on_exec_error` for the matching failure.
//!
//! `on_exec_setup` and `on_exec_error` run in a forked child of a possibly
//! multi-threaded parent. They must restrict themselves to async-signal-safe
//! calls: no allocation, no locks, no logging. Report failures with
//! [`Launcher::set_error`] and a static message.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::path::Path;

use crate::Process;
use crate::Result;

pub(crate) mod command_line;
#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use posix::Launcher;
#[cfg(windows)]
pub use windows::Launcher;

/// Hooks into the launch protocol. Every hook defaults to a no-op.
pub trait Initializer {
    fn on_setup(&mut self, _launcher: &mut Launcher) {}

    /// Runs in the forked child. Async-signal-safe calls only.
    #[cfg(unix)]
    fn on_exec_setup(&mut self, _launcher: &mut Launcher) {}

    fn on_success(&mut self, _launcher: &mut Launcher) {}

    fn on_error(&mut self, _launcher: &mut Launcher, _error: &io::Error) {}

    #[cfg(unix)]
    fn on_fork_error(&mut self, _launcher: &mut Launcher, _error: &io::Error) {}

    /// Runs in the forked child after `execve` or an `on_exec_setup` hook
    /// failed. Async-signal-safe calls only.
    #[cfg(unix)]
    fn on_exec_error(&mut self, _launcher: &mut Launcher, _error: &io::Error) {}
}

/// Error recorded by a hook, surfaced as the launch error.
#[derive(Debug)]
pub(crate) struct PendingError {
    pub(crate) source: io::Error,
    pub(crate) message: Cow<'static, str>,
}

/// Launch `exe` with `args` using a default [`Launcher`].
///
/// `exe` is used verbatim; resolve bare names with
/// [`crate::env::find_executable`] first.
pub fn launch<I, S>(
    exe: impl AsRef<Path>,
    args: I,
    initializers: &mut [&mut dyn Initializer],
) -> Result<Process>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Launcher::new().launch(exe, args, initializers)
}
