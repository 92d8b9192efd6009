//! Redirecting the standard streams of a child.

use std::borrow::Cow;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use crate::launcher::Initializer;
use crate::launcher::Launcher;

#[cfg(unix)]
const NULL_DEVICE: &str = "/dev/null";
#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";

#[cfg(unix)]
type RawStdioHandle = std::os::fd::RawFd;
#[cfg(windows)]
type RawStdioHandle = windows_sys::Win32::Foundation::HANDLE;

/// Source or destination of one standard stream.
#[derive(Debug, Default)]
pub enum Stdio {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// The null device.
    Null,
    /// A file opened when the launch starts: read-only for stdin, created and
    /// truncated for stdout and stderr.
    Path(PathBuf),
    /// An already open file.
    File(File),
}

impl Stdio {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// The native handle the child will receive; only available for open
    /// files, i.e. after the launch resolved `Null` and `Path`.
    pub fn native_handle(&self) -> Option<RawStdioHandle> {
        match self {
            Stdio::File(file) => Some(raw_handle(file)),
            _ => None,
        }
    }

    fn resolve(&mut self, readable: bool) -> Result<(), (io::Error, Cow<'static, str>)> {
        let path = match self {
            Stdio::Inherit | Stdio::File(_) => return Ok(()),
            Stdio::Null => Path::new(NULL_DEVICE).to_path_buf(),
            Stdio::Path(path) => path.clone(),
        };
        let mut options = OpenOptions::new();
        if readable {
            options.read(true);
        } else if matches!(self, Stdio::Null) {
            options.write(true);
        } else {
            options.write(true).create(true).truncate(true);
        }
        match options.open(&path) {
            Ok(file) => {
                *self = Stdio::File(file);
                Ok(())
            }
            Err(err) => Err((err, Cow::Owned(format!("failed to open {}", path.display())))),
        }
    }
}

impl From<File> for Stdio {
    fn from(file: File) -> Self {
        Stdio::File(file)
    }
}

#[cfg(unix)]
fn raw_handle(file: &File) -> RawStdioHandle {
    use std::os::fd::AsRawFd;
    file.as_raw_fd()
}

#[cfg(windows)]
fn raw_handle(file: &File) -> RawStdioHandle {
    use std::os::windows::io::AsRawHandle;
    file.as_raw_handle() as RawStdioHandle
}

/// Initializer replacing the child's stdin, stdout and stderr.
///
/// On POSIX, when combined with [`crate::limit_handles::LimitHandles`], list
/// this initializer first so the redirected files are still open when they
/// are duplicated.
#[derive(Debug, Default)]
pub struct StdioRedirect {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl StdioRedirect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, stdin: Stdio) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, stdout: Stdio) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn stderr(mut self, stderr: Stdio) -> Self {
        self.stderr = stderr;
        self
    }

    fn resolve(&mut self) -> Result<(), (io::Error, Cow<'static, str>)> {
        self.stdin.resolve(true)?;
        self.stdout.resolve(false)?;
        self.stderr.resolve(false)
    }
}

#[cfg(unix)]
impl Initializer for StdioRedirect {
    fn on_setup(&mut self, launcher: &mut Launcher) {
        if let Err((err, message)) = self.resolve() {
            launcher.set_error(err, message);
        }
    }

    fn on_exec_setup(&mut self, launcher: &mut Launcher) {
        let streams = [
            (&self.stdin, libc::STDIN_FILENO),
            (&self.stdout, libc::STDOUT_FILENO),
            (&self.stderr, libc::STDERR_FILENO),
        ];
        for (stdio, target) in streams {
            let Some(source) = stdio.native_handle() else {
                continue;
            };
            if let Err(err) = redirect_fd(source, target) {
                launcher.set_error(err, "failed to redirect standard stream");
                return;
            }
        }
    }
}

/// Async-signal-safe: raw syscalls only.
#[cfg(unix)]
fn redirect_fd(source: libc::c_int, target: libc::c_int) -> io::Result<()> {
    if source == target {
        // dup2 would be a no-op and leave close-on-exec set.
        let flags = unsafe { libc::fcntl(source, libc::F_GETFD) };
        if flags == -1
            || unsafe { libc::fcntl(source, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1
        {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }
    loop {
        if unsafe { libc::dup2(source, target) } != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

#[cfg(windows)]
impl Initializer for StdioRedirect {
    fn on_setup(&mut self, launcher: &mut Launcher) {
        use windows_sys::Win32::Foundation::HANDLE_FLAG_INHERIT;
        use windows_sys::Win32::Foundation::SetHandleInformation;
        use windows_sys::Win32::System::Console::GetStdHandle;
        use windows_sys::Win32::System::Console::STD_ERROR_HANDLE;
        use windows_sys::Win32::System::Console::STD_INPUT_HANDLE;
        use windows_sys::Win32::System::Console::STD_OUTPUT_HANDLE;
        use windows_sys::Win32::System::Threading::STARTF_USESTDHANDLES;

        if let Err((err, message)) = self.resolve() {
            launcher.set_error(err, message);
            return;
        }
        let mut handles = [0; 3];
        let streams = [
            (&self.stdin, STD_INPUT_HANDLE),
            (&self.stdout, STD_OUTPUT_HANDLE),
            (&self.stderr, STD_ERROR_HANDLE),
        ];
        for (slot, (stdio, std_handle)) in handles.iter_mut().zip(streams) {
            *slot = match stdio.native_handle() {
                Some(handle) => handle,
                None => unsafe { GetStdHandle(std_handle) },
            };
            // Detached parents have no console handles; leave the slot empty.
            if *slot != 0
                && *slot != windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE
                && unsafe { SetHandleInformation(*slot, HANDLE_FLAG_INHERIT, HANDLE_FLAG_INHERIT) }
                    == 0
            {
                launcher.set_error(
                    io::Error::last_os_error(),
                    "failed to make standard stream inheritable",
                );
                return;
            }
        }
        let info = launcher.startup_info_mut();
        info.dwFlags |= STARTF_USESTDHANDLES;
        info.hStdInput = handles[0];
        info.hStdOutput = handles[1];
        info.hStdError = handles[2];
        launcher.set_inherit_handles(true);
    }
}
