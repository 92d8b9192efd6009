use std::time::Duration;
use std::time::Instant;

use childproc_process::ProcessGroup;
use childproc_process::ProcessError;
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use crate::suite::support::LONG_WAIT_MS;
use crate::suite::support::target;

const DEADLINE: Duration = Duration::from_secs(20);

#[test]
fn members_are_contained_until_they_exit() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let first = group.emplace(target(), ["--wait", "300"], &mut [])?;
    let second = group.emplace(target(), ["--wait", "300"], &mut [])?;
    assert!(group.contains(first)?);
    assert!(group.contains(second)?);
    #[cfg(unix)]
    assert_eq!(group.native_handle(), first);

    group.wait()?;
    // Reaped members leave the group; Windows keeps exited members' handles.
    #[cfg(unix)]
    {
        assert!(!group.contains(first)?);
        assert!(!group.contains(second)?);
    }
    Ok(())
}

#[test]
fn wait_blocks_until_the_last_member_exits() -> anyhow::Result<()> {
    let started = Instant::now();
    let mut group = ProcessGroup::new()?;
    group.emplace(target(), ["--wait", "100"], &mut [])?;
    group.emplace(target(), ["--wait", "200"], &mut [])?;
    group.wait()?;
    assert!(started.elapsed() >= Duration::from_millis(200));
    Ok(())
}

#[test]
fn wait_one_reports_every_member() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let fast = group.emplace(target(), ["--exit-code", "1"], &mut [])?;
    let slow = group.emplace(target(), ["--wait", "200", "--exit-code", "2"], &mut [])?;

    // Members are reported in exit order.
    assert_eq!(group.wait_one()?, (fast, 1));
    assert_eq!(group.wait_one()?, (slow, 2));

    let err = match group.wait_one() {
        Ok(exited) => panic!("unexpected exit {exited:?}"),
        Err(err) => err,
    };
    assert!(matches!(err, ProcessError::Group { .. }), "{err}");
    Ok(())
}

#[test]
fn terminate_kills_every_member() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let pids = [
        group.emplace(target(), ["--wait", LONG_WAIT_MS], &mut [])?,
        group.emplace(target(), ["--wait", LONG_WAIT_MS], &mut [])?,
    ];
    group.terminate()?;
    group.wait()?;
    #[cfg(unix)]
    for pid in pids {
        assert!(!crate::suite::support::pid_exists(pid));
    }
    #[cfg(windows)]
    let _ = pids;
    Ok(())
}

#[test]
fn an_emptied_group_accepts_new_members() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    group.emplace(target(), ["--exit-code", "0"], &mut [])?;
    group.wait()?;
    let pid = group.emplace(target(), ["--wait", "100", "--exit-code", "3"], &mut [])?;
    assert!(group.contains(pid)?);
    assert_eq!(group.wait_one()?, (pid, 3));
    Ok(())
}

#[cfg(unix)]
#[test]
fn dropping_the_group_kills_its_members() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let pid = group.emplace(target(), ["--wait", LONG_WAIT_MS], &mut [])?;
    drop(group);
    assert!(!crate::suite::support::pid_exists(pid));
    Ok(())
}

#[cfg(unix)]
#[test]
fn detached_group_leaves_members_running() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let pid = group.emplace(target(), ["--wait", LONG_WAIT_MS], &mut [])?;
    let pgid = group.native_handle();
    group.detach();
    drop(group);
    assert!(crate::suite::support::pid_exists(pid));

    let mut group = ProcessGroup::from_native(pgid)?;
    assert!(group.contains(pid)?);
    group.terminate()?;
    group.wait()?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn grandchildren_belong_to_the_group() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("grandchild.txt");
    let mut redirect = crate::suite::support::stdout_to(&out);
    let mut group = ProcessGroup::new()?;
    group.emplace(
        target(),
        ["--spawn-wait", LONG_WAIT_MS, "--wait", LONG_WAIT_MS],
        &mut [&mut redirect],
    )?;
    let grandchild: childproc_process::Pid =
        crate::suite::support::read_first_line(&out, DEADLINE)?.parse()?;
    assert!(group.contains(grandchild)?);

    group.terminate()?;
    group.wait()?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn attaching_after_exec_is_refused() -> anyhow::Result<()> {
    let process = crate::suite::support::spawn_target(&["--wait", LONG_WAIT_MS])?;
    let pid = process.id();
    let mut group = ProcessGroup::new()?;
    let err = match group.attach(process) {
        Ok(pid) => panic!("attached {pid} after exec"),
        Err(err) => err,
    };
    assert!(matches!(err.error(), ProcessError::Group { .. }), "{err}");
    assert_eq!(err.error().raw_os_error(), Some(libc::EACCES));

    // The caller gets the process back, still running and still owned.
    let (_, mut process) = err.into_parts();
    assert_eq!(process.id(), pid);
    assert!(process.is_attached());
    assert!(process.running()?);
    assert!(crate::suite::support::pid_exists(pid));
    process.terminate()?;
    Ok(())
}

#[cfg(windows)]
#[test]
fn running_processes_can_be_attached() -> anyhow::Result<()> {
    let process = crate::suite::support::spawn_target(&["--wait", "200", "--exit-code", "8"])?;
    let mut group = ProcessGroup::new()?;
    let pid = group.attach(process)?;
    assert!(group.contains(pid)?);
    assert_eq!(group.wait_one()?, (pid, 8));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_wait_for_all_members() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let pid = group.emplace(target(), ["--wait", "100"], &mut [])?;
    group.emplace(target(), ["--wait", "200"], &mut [])?;
    timeout(DEADLINE, group.wait_for_all()).await??;
    #[cfg(unix)]
    assert!(!group.contains(pid)?);
    #[cfg(windows)]
    let _ = pid;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_wait_for_one_member() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    let pid = group.emplace(target(), ["--wait", "50", "--exit-code", "12"], &mut [])?;
    let exited = timeout(DEADLINE, group.wait_for_one()).await??;
    assert_eq!(exited, (pid, 12));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_future_sees_members_added_to_the_same_group() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    group.emplace(target(), ["--wait", LONG_WAIT_MS], &mut [])?;
    let next_exit = tokio::spawn(group.wait_for_one());
    let late = group.emplace(target(), ["--wait", "50", "--exit-code", "6"], &mut [])?;
    assert_eq!(timeout(DEADLINE, next_exit).await???, (late, 6));
    group.terminate()?;
    group.wait()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn group_callback_runs_once_members_exit() -> anyhow::Result<()> {
    let mut group = ProcessGroup::new()?;
    group.emplace(target(), ["--wait", "50"], &mut [])?;
    let (tx, rx) = tokio::sync::oneshot::channel();
    group.async_wait(&tokio::runtime::Handle::current(), move |outcome| {
        let _ = tx.send(outcome.is_ok());
    });
    assert!(timeout(DEADLINE, rx).await??);
    Ok(())
}
