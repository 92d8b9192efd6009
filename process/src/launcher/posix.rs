use std::borrow::Cow;
use std::ffi::CStr;
use std::ffi::CString;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;

use tracing::debug;

use super::Initializer;
use super::PendingError;
use crate::Pid;
use crate::Process;
use crate::ProcessError;
use crate::Result;
use crate::error::LaunchPhase;
use crate::handle::ProcessHandle;
use crate::handle::reap_blocking;
use crate::status::StatusCell;

/// Status of a child that failed before or during `execve`.
const EXEC_FAILURE_STATUS: libc::c_int = 127;

/// Error reports are `(i32 errno, u32 message length)` followed by the
/// message, written in one `write` so the report is never torn.
const REPORT_HEADER_LEN: usize = 8;
const REPORT_MAX_LEN: usize = 512;

/// Single-use process launcher.
#[derive(Debug)]
pub struct Launcher {
    error: Option<PendingError>,
    env: Option<Vec<CString>>,
    pid: Pid,
    error_pipe: RawFd,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    pub fn new() -> Self {
        Self {
            error: None,
            env: None,
            pid: -1,
            error_pipe: -1,
        }
    }

    /// Abort the launch. The first error set wins.
    ///
    /// Safe to call from `on_exec_setup` with a static message: neither the
    /// error nor a borrowed message allocates.
    pub fn set_error(&mut self, source: io::Error, message: impl Into<Cow<'static, str>>) {
        if self.error.is_none() {
            self.error = Some(PendingError {
                source,
                message: message.into(),
            });
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Pid of the child: set in the parent once `fork` returned, `-1` before.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Replace the environment passed to `execve`. Entries are `KEY=VALUE`.
    pub fn set_env(&mut self, env: Vec<CString>) {
        self.env = Some(env);
    }

    pub fn env(&self) -> Option<&[CString]> {
        self.env.as_deref()
    }

    /// Write end of the exec error pipe while a launch is in flight. Hooks
    /// that close descriptors in the child must keep it open.
    pub fn error_pipe_fd(&self) -> Option<RawFd> {
        (self.error_pipe >= 0).then_some(self.error_pipe)
    }

    pub fn launch<I, S>(
        mut self,
        exe: impl AsRef<Path>,
        args: I,
        initializers: &mut [&mut dyn Initializer],
    ) -> Result<Process>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let exe = exe.as_ref();
        let argv = match c_argv(exe, args) {
            Ok(argv) => argv,
            Err(err) => {
                self.set_error(err, "invalid argument");
                return Err(self.abort(LaunchPhase::Setup, exe, initializers));
            }
        };

        let pipe = match ErrorPipe::new() {
            Ok(pipe) => pipe,
            Err(err) => {
                self.set_error(err, "failed to create exec error pipe");
                return Err(self.abort(LaunchPhase::Setup, exe, initializers));
            }
        };
        self.error_pipe = pipe.write_fd();

        for initializer in initializers.iter_mut() {
            if self.has_error() {
                break;
            }
            initializer.on_setup(&mut self);
        }
        if self.has_error() {
            return Err(self.abort(LaunchPhase::Setup, exe, initializers));
        }

        let env = self.env.take().unwrap_or_else(inherited_env);
        let argp = null_terminated(&argv);
        let envp = null_terminated(&env);

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            self.set_error(io::Error::last_os_error(), "fork failed");
            return Err(self.abort(LaunchPhase::Spawn, exe, initializers));
        }
        if pid == 0 {
            self.exec_child(&argv[0], &argp, &envp, &pipe, initializers);
        }

        self.pid = pid;
        self.env = Some(env);
        let report = pipe.read_report();
        self.error_pipe = -1;
        match report {
            Ok(None) => {}
            Ok(Some(pending)) => {
                self.error = Some(pending);
                reap_failed_child(pid);
                return Err(self.abort(LaunchPhase::Exec, exe, initializers));
            }
            Err(err) => {
                self.set_error(err, "failed to read exec status");
                unsafe { libc::kill(pid, libc::SIGKILL) };
                reap_failed_child(pid);
                return Err(self.abort(LaunchPhase::Exec, exe, initializers));
            }
        }

        let process = Process::from_handle(ProcessHandle::new(pid));
        for initializer in initializers.iter_mut() {
            if self.has_error() {
                break;
            }
            initializer.on_success(&mut self);
        }
        if self.has_error() {
            drop(process);
            return Err(self.abort(LaunchPhase::PostSuccess, exe, initializers));
        }

        debug!(pid, exe = %exe.display(), "launched process");
        Ok(process)
    }

    /// Child side of `fork`. Never returns.
    fn exec_child(
        &mut self,
        exe: &CStr,
        argp: &[*const libc::c_char],
        envp: &[*const libc::c_char],
        pipe: &ErrorPipe,
        initializers: &mut [&mut dyn Initializer],
    ) -> ! {
        pipe.close_read_end();
        for initializer in initializers.iter_mut() {
            if self.has_error() {
                break;
            }
            initializer.on_exec_setup(self);
        }
        if !self.has_error() {
            unsafe { libc::execve(exe.as_ptr(), argp.as_ptr(), envp.as_ptr()) };
            self.set_error(io::Error::last_os_error(), "execve failed");
        }
        if let Some(pending) = self.error.take() {
            for initializer in initializers.iter_mut() {
                initializer.on_exec_error(self, &pending.source);
            }
            pipe.report(&pending);
        }
        unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
    }

    /// Run the failure hooks and turn the pending error into a launch error.
    fn abort(
        &mut self,
        phase: LaunchPhase,
        exe: &Path,
        initializers: &mut [&mut dyn Initializer],
    ) -> ProcessError {
        let PendingError { source, message } = self.error.take().unwrap_or_else(|| PendingError {
            source: io::Error::other("launch failed"),
            message: Cow::Borrowed("launch failed"),
        });
        for initializer in initializers.iter_mut() {
            initializer.on_error(self, &source);
        }
        if phase == LaunchPhase::Spawn {
            for initializer in initializers.iter_mut() {
                initializer.on_fork_error(self, &source);
            }
        }
        debug!(exe = %exe.display(), ?phase, "launch failed: {message}: {source}");
        ProcessError::launch(phase, exe, message, source)
    }
}

fn reap_failed_child(pid: Pid) {
    if let Err(err) = reap_blocking(pid, &StatusCell::new()) {
        debug!(pid, "could not reap failed child: {err}");
    }
}

fn c_string(value: &OsStr) -> io::Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{value:?} contains a NUL byte"),
        )
    })
}

fn c_argv<I, S>(exe: &Path, args: I) -> io::Result<Vec<CString>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut argv = vec![c_string(exe.as_os_str())?];
    for arg in args {
        argv.push(c_string(arg.as_ref())?);
    }
    Ok(argv)
}

/// Snapshot of the parent's environment as `KEY=VALUE` entries.
pub(crate) fn inherited_env() -> Vec<CString> {
    std::env::vars_os()
        .filter_map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            CString::new(entry).ok()
        })
        .collect()
}

fn null_terminated(values: &[CString]) -> Vec<*const libc::c_char> {
    values
        .iter()
        .map(|value| value.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Close-on-exec pipe carrying exec failures from the child to the parent.
/// A successful `execve` closes the write end, so EOF without data means the
/// new image is running.
struct ErrorPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl ErrorPipe {
    fn new() -> io::Result<Self> {
        let mut fds = [0; 2];
        create_cloexec_pipe(&mut fds)?;
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }

    fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    fn close_read_end(&self) {
        unsafe { libc::close(self.read.as_raw_fd()) };
    }

    /// Child side. Async-signal-safe: stack buffer and raw `write` only.
    fn report(&self, pending: &PendingError) {
        let code = pending.source.raw_os_error().unwrap_or(libc::EINVAL);
        let message = pending.message.as_bytes();
        let len = message.len().min(REPORT_MAX_LEN - REPORT_HEADER_LEN);

        let mut buf = [0u8; REPORT_MAX_LEN];
        buf[..4].copy_from_slice(&code.to_ne_bytes());
        buf[4..REPORT_HEADER_LEN].copy_from_slice(&(len as u32).to_ne_bytes());
        buf[REPORT_HEADER_LEN..REPORT_HEADER_LEN + len].copy_from_slice(&message[..len]);

        let total = REPORT_HEADER_LEN + len;
        let mut written = 0;
        while written < total {
            let ret = unsafe {
                libc::write(
                    self.write.as_raw_fd(),
                    buf[written..total].as_ptr().cast(),
                    total - written,
                )
            };
            if ret > 0 {
                written += ret as usize;
            } else if ret < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            } else {
                break;
            }
        }
    }

    /// Parent side: `None` once the child has exec'd.
    fn read_report(self) -> io::Result<Option<PendingError>> {
        let Self { read, write } = self;
        drop(write);
        let mut buf = Vec::new();
        File::from(read).read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() < REPORT_HEADER_LEN {
            return Ok(Some(PendingError {
                source: io::Error::from(io::ErrorKind::UnexpectedEof),
                message: Cow::Borrowed("truncated exec error report"),
            }));
        }
        let mut code = [0u8; 4];
        code.copy_from_slice(&buf[..4]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[4..REPORT_HEADER_LEN]);
        let end = buf
            .len()
            .min(REPORT_HEADER_LEN + u32::from_ne_bytes(len) as usize);
        Ok(Some(PendingError {
            source: io::Error::from_raw_os_error(i32::from_ne_bytes(code)),
            message: Cow::Owned(String::from_utf8_lossy(&buf[REPORT_HEADER_LEN..end]).into_owned()),
        }))
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
fn create_cloexec_pipe(fds: &mut [libc::c_int; 2]) -> io::Result<()> {
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
fn create_cloexec_pipe(fds: &mut [libc::c_int; 2]) -> io::Result<()> {
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in *fds {
        if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    Ok(())
}
