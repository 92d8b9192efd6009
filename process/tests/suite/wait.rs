use std::sync::Arc;
use std::time::Duration;

use childproc_process::ExitState;
use childproc_process::Process;
use childproc_process::ProcessError;
use pretty_assertions::assert_eq;

use crate::suite::support::LONG_WAIT_MS;
use crate::suite::support::spawn_target;

#[test]
fn polling_observes_the_exit() -> anyhow::Result<()> {
    let process = spawn_target(&["--wait", "50", "--exit-code", "7"])?;
    while process.running()? {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(process.exit_code(), 7);
    assert_eq!(process.exit_state(), ExitState::Exited(7));
    Ok(())
}

#[test]
fn repeated_queries_after_exit_agree() -> anyhow::Result<()> {
    let process = spawn_target(&["--exit-code", "3"])?;
    assert_eq!(process.wait()?, 3);
    for _ in 0..5 {
        assert_eq!(process.running()?, false);
        assert_eq!(process.wait()?, 3);
        assert_eq!(process.exit_code(), 3);
    }
    Ok(())
}

#[test]
fn concurrent_waiters_see_the_same_code() -> anyhow::Result<()> {
    let process = Arc::new(spawn_target(&["--wait", "100", "--exit-code", "11"])?);
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let process = Arc::clone(&process);
            std::thread::spawn(move || process.wait().map_err(|err| err.to_string()))
        })
        .collect();
    for waiter in waiters {
        let code = waiter
            .join()
            .map_err(|_| anyhow::anyhow!("waiter panicked"))?
            .map_err(anyhow::Error::msg)?;
        assert_eq!(code, 11);
    }
    Ok(())
}

#[test]
fn blocking_and_polling_waiters_never_lose_the_exit() -> anyhow::Result<()> {
    let processes = (0..8)
        .map(|code| {
            let wait = (20 + code * 10).to_string();
            let code = code.to_string();
            spawn_target(&["--wait", &wait, "--exit-code", &code]).map(Arc::new)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut waiters = Vec::new();
    for process in &processes {
        for waiter in 0..6 {
            let process = Arc::clone(process);
            waiters.push(std::thread::spawn(move || -> Result<i32, String> {
                if waiter % 2 == 0 {
                    return process.wait().map_err(|err| err.to_string());
                }
                while process.running().map_err(|err| err.to_string())? {
                    std::thread::yield_now();
                }
                Ok(process.exit_code())
            }));
        }
    }
    let mut codes = Vec::new();
    for waiter in waiters {
        codes.push(
            waiter
                .join()
                .map_err(|_| anyhow::anyhow!("waiter panicked"))?
                .map_err(anyhow::Error::msg)?,
        );
    }
    let expected: Vec<i32> = (0..8).flat_map(|code| [code; 6]).collect();
    assert_eq!(codes, expected);
    Ok(())
}

#[test]
fn terminate_stops_a_running_child() -> anyhow::Result<()> {
    let mut process = spawn_target(&["--wait", LONG_WAIT_MS])?;
    assert!(process.running()?);
    process.terminate()?;
    assert_eq!(process.running()?, false);
    #[cfg(unix)]
    assert_eq!(process.exit_state(), ExitState::Signaled(libc::SIGKILL));
    #[cfg(windows)]
    assert_eq!(process.exit_code(), 1);
    // Terminating again is a no-op once the status is known.
    process.terminate()?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn signaled_children_report_the_signal() -> anyhow::Result<()> {
    let process = spawn_target(&["--signal", "15"])?;
    assert_eq!(process.wait()?, libc::SIGTERM);
    assert_eq!(process.exit_state(), ExitState::Signaled(libc::SIGTERM));
    assert!(libc::WIFSIGNALED(process.native_exit_code()));
    Ok(())
}

#[cfg(unix)]
#[test]
fn dropping_an_attached_process_kills_it() -> anyhow::Result<()> {
    let process = spawn_target(&["--wait", LONG_WAIT_MS])?;
    let pid = process.id();
    drop(process);
    assert!(!crate::suite::support::pid_exists(pid));
    Ok(())
}

#[cfg(unix)]
#[test]
fn detached_processes_outlive_their_handle() -> anyhow::Result<()> {
    let mut process = spawn_target(&["--wait", LONG_WAIT_MS])?;
    let pid = process.id();
    process.detach();
    assert!(!process.is_attached());
    drop(process);
    assert!(crate::suite::support::pid_exists(pid));

    // Re-adopt and clean up.
    let mut process = Process::attach(pid)?;
    process.terminate()?;
    assert_eq!(process.running()?, false);
    assert!(!crate::suite::support::pid_exists(pid));
    Ok(())
}

#[test]
fn default_process_is_invalid() {
    let process = Process::default();
    assert!(!process.valid());
    assert_eq!(process.running().ok(), Some(false));
    assert!(matches!(
        process.wait(),
        Err(ProcessError::InvalidArgument(_))
    ));
}
