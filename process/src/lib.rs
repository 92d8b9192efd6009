//! Launching, supervising and grouping child processes.
//!
//! - [`Process`] owns one child: poll it, wait for it synchronously or from
//!   tokio, terminate it, or detach from it. An attached process is killed
//!   and reaped when dropped.
//! - [`launcher`] runs the launch protocol and its [`Initializer`] hooks.
//!   [`StdioRedirect`], [`Environment`], [`StartDir`] and, on POSIX,
//!   [`LimitHandles`] are the stock initializers.
//! - [`ProcessGroup`] manages a set of processes as one unit through a POSIX
//!   process group or a Windows job object.
//! - [`status`] decodes native exit statuses.
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod env;
mod error;
mod group;
mod handle;
pub mod launcher;
#[cfg(unix)]
pub mod limit_handles;
mod notify;
mod process;
pub mod start_dir;
pub mod status;
pub mod stdio;

pub use env::Environment;
pub use env::find_executable;
pub use error::ProcessError;
pub use error::Result;
pub use group::AttachError;
pub use group::NativeGroupHandle;
pub use group::ProcessGroup;
pub use handle::NativeHandle;
pub use launcher::Initializer;
pub use launcher::Launcher;
pub use launcher::launch;
#[cfg(unix)]
pub use limit_handles::LimitHandles;
pub use notify::AsyncWait;
pub use process::Process;
pub use start_dir::StartDir;
pub use status::ExitState;
pub use stdio::Stdio;
pub use stdio::StdioRedirect;

/// OS process identifier.
#[cfg(unix)]
pub type Pid = libc::pid_t;
#[cfg(windows)]
pub type Pid = u32;
