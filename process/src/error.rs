use std::borrow::Cow;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::Pid;

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Failures surfaced by launching, polling, waiting on and grouping child
/// processes.
///
/// Launch failures carry the executable path; post-launch failures carry the
/// pid. Every variant keeps the originating OS error as its source.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// An initializer rejected the launch before anything was spawned.
    #[error("[{}]: {message}: {source}", path.display())]
    Setup {
        path: PathBuf,
        message: Cow<'static, str>,
        #[source]
        source: io::Error,
    },

    /// The OS could not create the process (`fork`, `CreateProcessW`).
    #[error("[{}]: {message}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        message: Cow<'static, str>,
        #[source]
        source: io::Error,
    },

    /// The child existed but could not replace its image.
    #[error("[{}]: {message}: {source}", path.display())]
    Exec {
        path: PathBuf,
        message: Cow<'static, str>,
        #[source]
        source: io::Error,
    },

    /// The process was created but a success hook failed afterwards, e.g.
    /// assigning it to a group. The process has been terminated.
    #[error("[{}]: {message}: {source}", path.display())]
    PostSuccess {
        path: PathBuf,
        message: Cow<'static, str>,
        #[source]
        source: io::Error,
    },

    #[error("PID [{pid}]: {message}: {source}")]
    Wait {
        pid: Pid,
        message: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("PID [{pid}]: {message}: {source}")]
    Terminate {
        pid: Pid,
        message: &'static str,
        #[source]
        source: io::Error,
    },

    /// The native grouping primitive (process group or job object) failed.
    #[error("process group: {message}: {source}")]
    Group {
        message: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Which phase of a launch produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchPhase {
    Setup,
    Spawn,
    Exec,
    PostSuccess,
}

impl ProcessError {
    pub(crate) fn launch(
        phase: LaunchPhase,
        path: &Path,
        message: Cow<'static, str>,
        source: io::Error,
    ) -> Self {
        let path = path.to_path_buf();
        match phase {
            LaunchPhase::Setup => Self::Setup {
                path,
                message,
                source,
            },
            LaunchPhase::Spawn => Self::Spawn {
                path,
                message,
                source,
            },
            LaunchPhase::Exec => Self::Exec {
                path,
                message,
                source,
            },
            LaunchPhase::PostSuccess => Self::PostSuccess {
                path,
                message,
                source,
            },
        }
    }

    pub(crate) fn wait(pid: Pid, message: &'static str, source: io::Error) -> Self {
        Self::Wait {
            pid,
            message,
            source,
        }
    }

    pub(crate) fn terminate(pid: Pid, message: &'static str, source: io::Error) -> Self {
        Self::Terminate {
            pid,
            message,
            source,
        }
    }

    pub(crate) fn group(message: &'static str, source: io::Error) -> Self {
        Self::Group { message, source }
    }

    /// Executable path for launch failures.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Setup { path, .. }
            | Self::Spawn { path, .. }
            | Self::Exec { path, .. }
            | Self::PostSuccess { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Process id for wait and terminate failures.
    pub fn pid(&self) -> Option<Pid> {
        match self {
            Self::Wait { pid, .. } | Self::Terminate { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    /// The OS error code behind this failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().and_then(io::Error::raw_os_error)
    }

    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Setup { source, .. }
            | Self::Spawn { source, .. }
            | Self::Exec { source, .. }
            | Self::PostSuccess { source, .. }
            | Self::Wait { source, .. }
            | Self::Terminate { source, .. }
            | Self::Group { source, .. } => Some(source),
            Self::InvalidArgument(_) => None,
        }
    }
}
