use std::io;

use childproc_process::Initializer;
use childproc_process::Launcher;
use childproc_process::Pid;
use childproc_process::Process;
use childproc_process::ProcessError;
use pretty_assertions::assert_eq;

use crate::suite::support::LONG_WAIT_MS;
use crate::suite::support::spawn_target;
use crate::suite::support::target;

#[derive(Default)]
struct HookLog {
    calls: Vec<&'static str>,
    pid: Option<Pid>,
    fail_on_success: bool,
}

impl Initializer for HookLog {
    fn on_setup(&mut self, _launcher: &mut Launcher) {
        self.calls.push("setup");
    }

    fn on_success(&mut self, launcher: &mut Launcher) {
        self.calls.push("success");
        self.pid = Some(launcher.pid());
        if self.fail_on_success {
            launcher.set_error(
                io::Error::from(io::ErrorKind::Other),
                "rejected after launch",
            );
        }
    }

    fn on_error(&mut self, _launcher: &mut Launcher, _error: &io::Error) {
        self.calls.push("error");
    }
}

#[test]
fn exit_code_is_reported() -> anyhow::Result<()> {
    let process = spawn_target(&["--exit-code", "42"])?;
    assert!(process.valid());
    assert_eq!(process.wait()?, 42);
    assert_eq!(process.exit_code(), 42);
    assert_eq!(process.running()?, false);
    Ok(())
}

#[test]
fn successful_launch_runs_setup_and_success_hooks() -> anyhow::Result<()> {
    let mut log = HookLog::default();
    let process = Process::launch(target(), ["--exit-code", "0"], &mut [&mut log])?;
    assert_eq!(log.calls, vec!["setup", "success"]);
    assert_eq!(log.pid, Some(process.id()));
    assert_eq!(process.wait()?, 0);
    Ok(())
}

#[test]
fn post_success_error_terminates_the_child() -> anyhow::Result<()> {
    let mut log = HookLog {
        fail_on_success: true,
        ..Default::default()
    };
    let err = match Process::launch(target(), ["--wait", LONG_WAIT_MS], &mut [&mut log]) {
        Ok(process) => panic!("launch unexpectedly succeeded: {}", process.id()),
        Err(err) => err,
    };
    assert!(matches!(err, ProcessError::PostSuccess { .. }), "{err}");
    assert!(err.to_string().contains("rejected after launch"));
    assert_eq!(log.calls, vec!["setup", "success", "error"]);
    #[cfg(unix)]
    {
        let Some(pid) = log.pid else {
            panic!("success hook did not see a pid");
        };
        // Killed and reaped before launch returned.
        assert!(!crate::suite::support::pid_exists(pid));
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_executable_is_an_exec_error() {
    let mut log = HookLog::default();
    let err = match Process::launch("/definitely/not/a/binary", ["x"], &mut [&mut log]) {
        Ok(process) => panic!("launch unexpectedly succeeded: {}", process.id()),
        Err(err) => err,
    };
    assert!(matches!(err, ProcessError::Exec { .. }), "{err}");
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    assert_eq!(
        err.path(),
        Some(std::path::Path::new("/definitely/not/a/binary"))
    );
    assert!(err.to_string().contains("execve failed"), "{err}");
    assert_eq!(log.calls, vec!["setup", "error"]);
}

#[cfg(windows)]
#[test]
fn missing_executable_is_a_spawn_error() {
    let err = match Process::launch(r"C:\definitely\not\a\binary.exe", ["x"], &mut []) {
        Ok(process) => panic!("launch unexpectedly succeeded: {}", process.id()),
        Err(err) => err,
    };
    assert!(matches!(err, ProcessError::Spawn { .. }), "{err}");
    assert!(err.raw_os_error().is_some());
}

#[cfg(unix)]
#[test]
fn child_side_errors_carry_their_message_and_code() {
    struct RefuseInChild;

    impl Initializer for RefuseInChild {
        fn on_exec_setup(&mut self, launcher: &mut Launcher) {
            launcher.set_error(io::Error::from_raw_os_error(libc::EPERM), "refused in child");
        }
    }

    let err = match Process::launch(target(), ["--exit-code", "0"], &mut [&mut RefuseInChild]) {
        Ok(process) => panic!("launch unexpectedly succeeded: {}", process.id()),
        Err(err) => err,
    };
    assert!(matches!(err, ProcessError::Exec { .. }), "{err}");
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));
    assert!(err.to_string().contains("refused in child"), "{err}");
}

/// Writes one byte to an inherited descriptor from the failing child.
#[cfg(unix)]
struct ExecErrorMarker {
    fd: libc::c_int,
}

#[cfg(unix)]
impl Initializer for ExecErrorMarker {
    fn on_exec_error(&mut self, _launcher: &mut Launcher, _error: &io::Error) {
        unsafe { libc::write(self.fd, b"E".as_ptr().cast(), 1) };
    }
}

/// Pipe whose write end is inherited across `execve`; the read end never
/// blocks so descriptors leaked into unrelated children cannot hang a read.
#[cfg(unix)]
fn marker_pipe() -> anyhow::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use std::os::fd::FromRawFd;

    let mut fds = [0; 2];
    anyhow::ensure!(
        unsafe { libc::pipe(fds.as_mut_ptr()) } == 0,
        "pipe failed: {}",
        io::Error::last_os_error()
    );
    let (read, write) = unsafe {
        (
            std::os::fd::OwnedFd::from_raw_fd(fds[0]),
            std::os::fd::OwnedFd::from_raw_fd(fds[1]),
        )
    };
    anyhow::ensure!(
        unsafe { libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK) } == 0,
        "fcntl failed: {}",
        io::Error::last_os_error()
    );
    Ok((read, write))
}

#[cfg(unix)]
fn read_marker(read: &std::os::fd::OwnedFd) -> Option<u8> {
    use std::os::fd::AsRawFd;

    let mut byte = 0u8;
    let n = unsafe { libc::read(read.as_raw_fd(), (&mut byte as *mut u8).cast(), 1) };
    (n == 1).then_some(byte)
}

#[cfg(unix)]
#[test]
fn exec_error_hooks_run_in_the_failing_child() -> anyhow::Result<()> {
    use std::os::fd::AsRawFd;

    let (read, write) = marker_pipe()?;
    let mut marker = ExecErrorMarker {
        fd: write.as_raw_fd(),
    };
    let err = match Process::launch("/definitely/not/a/binary", ["x"], &mut [&mut marker]) {
        Ok(process) => panic!("launch unexpectedly succeeded: {}", process.id()),
        Err(err) => err,
    };
    assert!(matches!(err, ProcessError::Exec { .. }), "{err}");
    // The failed child has been reaped, so its write already happened.
    assert_eq!(read_marker(&read), Some(b'E'));
    Ok(())
}

#[cfg(unix)]
#[test]
fn exec_error_hooks_stay_silent_after_a_successful_exec() -> anyhow::Result<()> {
    use std::os::fd::AsRawFd;

    let (read, write) = marker_pipe()?;
    let mut marker = ExecErrorMarker {
        fd: write.as_raw_fd(),
    };
    let process = Process::launch(target(), ["--exit-code", "0"], &mut [&mut marker])?;
    assert_eq!(process.wait()?, 0);
    assert_eq!(read_marker(&read), None);
    Ok(())
}

#[test]
fn arguments_with_spaces_and_quotes_arrive_intact() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.txt");
    let mut redirect = crate::suite::support::stdout_to(&out);
    let text = r#"two words and "quotes""#;
    let process = Process::launch(target(), ["--out", text], &mut [&mut redirect])?;
    assert_eq!(process.wait()?, 0);
    let written = std::fs::read_to_string(&out)?;
    assert_eq!(written.trim_end(), text);
    Ok(())
}
