//! Keeping unrelated descriptors out of a child.
//!
//! Descriptors opened without close-on-exec (by this crate's callers or by C
//! libraries) are inherited by every child. [`LimitHandles`] closes everything
//! except the standard streams and an explicit allow list.

use std::io;
use std::os::fd::RawFd;
use std::path::Path;

use crate::launcher::Initializer;
use crate::launcher::Launcher;

const FD_DIRS: [&str; 2] = ["/proc/self/fd", "/dev/fd"];

/// Initializer closing inherited descriptors in the child.
///
/// The set of open descriptors is captured during setup; descriptors opened
/// by other threads between setup and `fork` are not closed.
#[derive(Debug, Default, Clone)]
pub struct LimitHandles {
    allowed: Vec<RawFd>,
    to_close: Vec<RawFd>,
}

impl LimitHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `fd` open in the child.
    pub fn allow(mut self, fd: RawFd) -> Self {
        self.allowed.push(fd);
        self
    }

    fn keeps(&self, fd: RawFd, error_pipe: Option<RawFd>) -> bool {
        fd <= libc::STDERR_FILENO || self.allowed.contains(&fd) || Some(fd) == error_pipe
    }
}

fn open_descriptors() -> io::Result<Vec<RawFd>> {
    let mut last_err = io::Error::from(io::ErrorKind::NotFound);
    for dir in FD_DIRS {
        match std::fs::read_dir(Path::new(dir)) {
            Ok(entries) => {
                let mut fds = Vec::new();
                for entry in entries {
                    if let Some(fd) = entry?
                        .file_name()
                        .to_str()
                        .and_then(|name| name.parse::<RawFd>().ok())
                    {
                        fds.push(fd);
                    }
                }
                return Ok(fds);
            }
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

impl Initializer for LimitHandles {
    fn on_setup(&mut self, launcher: &mut Launcher) {
        let error_pipe = launcher.error_pipe_fd();
        match open_descriptors() {
            Ok(fds) => {
                // Includes the directory descriptor used for listing; closing
                // it in the child fails harmlessly with EBADF.
                self.to_close = fds
                    .into_iter()
                    .filter(|&fd| !self.keeps(fd, error_pipe))
                    .collect();
            }
            Err(err) => launcher.set_error(err, "failed to list open descriptors"),
        }
    }

    fn on_exec_setup(&mut self, _launcher: &mut Launcher) {
        for &fd in &self.to_close {
            unsafe { libc::close(fd) };
        }
    }
}
