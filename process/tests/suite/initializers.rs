use childproc_process::Environment;
use childproc_process::Process;
use childproc_process::StartDir;
use childproc_process::StdioRedirect;
use childproc_process::stdio::Stdio;
use pretty_assertions::assert_eq;

use crate::suite::support::stdout_to;
use crate::suite::support::target;

#[test]
fn stdout_and_stderr_go_to_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.txt");
    let err = dir.path().join("err.txt");
    let mut redirect = StdioRedirect::new()
        .stdout(Stdio::path(&out))
        .stderr(Stdio::path(&err));
    let process = Process::launch(
        target(),
        ["--out", "to stdout", "--err", "to stderr"],
        &mut [&mut redirect],
    )?;
    assert_eq!(process.wait()?, 0);
    assert_eq!(std::fs::read_to_string(&out)?.trim_end(), "to stdout");
    assert_eq!(std::fs::read_to_string(&err)?.trim_end(), "to stderr");
    Ok(())
}

#[test]
fn stdin_is_read_from_a_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.txt");
    let out = dir.path().join("out.txt");
    std::fs::write(&input, "ping\n")?;
    let mut redirect = StdioRedirect::new()
        .stdin(Stdio::path(&input))
        .stdout(Stdio::path(&out));
    let process = Process::launch(target(), ["--in"], &mut [&mut redirect])?;
    assert_eq!(process.wait()?, 0);
    assert_eq!(std::fs::read_to_string(&out)?.trim_end(), "ping");
    Ok(())
}

#[test]
fn null_stdin_reads_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.txt");
    let mut redirect = StdioRedirect::new()
        .stdin(Stdio::Null)
        .stdout(Stdio::path(&out));
    let process = Process::launch(target(), ["--in"], &mut [&mut redirect])?;
    assert_eq!(process.wait()?, 0);
    assert_eq!(std::fs::read_to_string(&out)?, "");
    Ok(())
}

#[test]
fn explicit_environment_replaces_the_parent_one() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.txt");
    let mut redirect = stdout_to(&out);
    let mut env = Environment::empty();
    env.set("CHILDPROC_TEST_VALUE", "42");
    // Windows processes need SystemRoot to initialize.
    if let Some(root) = std::env::var_os("SystemRoot") {
        env.set("SystemRoot", root);
    }
    let process = Process::launch(
        target(),
        ["--env", "CHILDPROC_TEST_VALUE"],
        &mut [&mut redirect, &mut env],
    )?;
    assert_eq!(process.wait()?, 0);
    assert_eq!(std::fs::read_to_string(&out)?.trim_end(), "42");
    Ok(())
}

#[test]
fn inherited_environment_can_be_extended() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.txt");
    let mut redirect = stdout_to(&out);
    let mut env = Environment::inherit();
    env.set_list("CHILDPROC_TEST_LIST", ["a", "b"]);
    let process = Process::launch(
        target(),
        ["--env", "CHILDPROC_TEST_LIST"],
        &mut [&mut redirect, &mut env],
    )?;
    assert_eq!(process.wait()?, 0);
    let separator = if cfg!(windows) { ";" } else { ":" };
    assert_eq!(
        std::fs::read_to_string(&out)?.trim_end(),
        format!("a{separator}b")
    );
    Ok(())
}

#[test]
fn start_dir_sets_the_working_directory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let work = dir.path().join("work");
    std::fs::create_dir(&work)?;
    let out = dir.path().join("out.txt");
    let mut redirect = stdout_to(&out);
    let mut start_dir = StartDir::new(&work);
    let process = Process::launch(target(), ["--cwd"], &mut [&mut redirect, &mut start_dir])?;
    assert_eq!(process.wait()?, 0);
    let reported = std::fs::read_to_string(&out)?;
    assert_eq!(
        std::fs::canonicalize(reported.trim_end())?,
        std::fs::canonicalize(&work)?
    );
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_start_dir_is_an_exec_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut start_dir = StartDir::new(dir.path().join("missing"));
    let err = match Process::launch(target(), ["--cwd"], &mut [&mut start_dir]) {
        Ok(process) => panic!("launch unexpectedly succeeded: {}", process.id()),
        Err(err) => err,
    };
    assert!(
        matches!(err, childproc_process::ProcessError::Exec { .. }),
        "{err}"
    );
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    assert!(err.to_string().contains("chdir failed"), "{err}");
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn limit_handles_closes_inherited_descriptors() -> anyhow::Result<()> {
    use childproc_process::LimitHandles;
    use std::os::fd::AsRawFd;
    use std::os::fd::FromRawFd;
    use std::os::fd::OwnedFd;

    let file = tempfile::tempfile()?;
    // dup(2) does not set close-on-exec, so the child inherits this one.
    let leaked = unsafe { libc::dup(file.as_raw_fd()) };
    anyhow::ensure!(leaked >= 0, "dup failed: {}", std::io::Error::last_os_error());
    let leaked = unsafe { OwnedFd::from_raw_fd(leaked) };
    let fd_open = format!("[ -e /proc/self/fd/{} ]", leaked.as_raw_fd());

    let inherited = Process::launch("/bin/sh", ["-c", fd_open.as_str()], &mut [])?;
    assert_eq!(inherited.wait()?, 0);

    let mut limit = LimitHandles::new();
    let limited = Process::launch("/bin/sh", ["-c", fd_open.as_str()], &mut [&mut limit])?;
    assert_eq!(limited.wait()?, 1);

    let mut allowed = LimitHandles::new().allow(leaked.as_raw_fd());
    let kept = Process::launch("/bin/sh", ["-c", fd_open.as_str()], &mut [&mut allowed])?;
    assert_eq!(kept.wait()?, 0);
    Ok(())
}
