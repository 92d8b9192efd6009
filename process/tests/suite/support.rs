use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use childproc_process::Process;
use childproc_process::StdioRedirect;
use childproc_process::stdio::Stdio;

pub(crate) const LONG_WAIT_MS: &str = "30000";

pub(crate) fn target() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_childproc-test-target"))
}

/// Launch the test target with `args` and no initializers.
pub(crate) fn spawn_target(args: &[&str]) -> anyhow::Result<Process> {
    Ok(Process::launch(target(), args, &mut [])?)
}

/// Redirect stdout of a launch into `path`.
pub(crate) fn stdout_to(path: &Path) -> StdioRedirect {
    StdioRedirect::new().stdout(Stdio::path(path))
}

/// Poll `path` until it holds a complete first line.
pub(crate) fn read_first_line(path: &PathBuf, timeout: Duration) -> anyhow::Result<String> {
    let deadline = Instant::now() + timeout;
    loop {
        let contents = std::fs::read_to_string(path).unwrap_or_default();
        if let Some((line, _)) = contents.split_once('\n') {
            return Ok(line.trim_end_matches('\r').to_string());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("no complete line in {} after {timeout:?}", path.display());
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Whether `pid` names an existing process (zombies included).
#[cfg(unix)]
pub(crate) fn pid_exists(pid: childproc_process::Pid) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
