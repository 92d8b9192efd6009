use std::future::Future;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::os::windows::io::FromRawHandle;
use std::os::windows::io::OwnedHandle;
use std::sync::Arc;

use tracing::debug;
use windows_sys::Win32::Foundation::FALSE;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Foundation::WAIT_OBJECT_0;
use windows_sys::Win32::Foundation::WAIT_TIMEOUT;
use windows_sys::Win32::System::Threading::GetExitCodeProcess;
use windows_sys::Win32::System::Threading::INFINITE;
use windows_sys::Win32::System::Threading::OpenProcess;
use windows_sys::Win32::System::Threading::PROCESS_ALL_ACCESS;
use windows_sys::Win32::System::Threading::TerminateProcess;
use windows_sys::Win32::System::Threading::WaitForSingleObject;

use super::NativeHandle;
use super::NativeProcessHandle;
use crate::Pid;
use crate::ProcessError;
use crate::Result;
use crate::notify;
use crate::status::StatusCell;
use crate::status::eval_exit_status;

/// Exit code reported by processes killed through `terminate`.
const TERMINATED_EXIT_CODE: u32 = 1;

/// Owns the process handle; the thread handle is closed by the launcher.
#[derive(Debug, Default)]
pub(crate) struct WindowsProcessHandle {
    process: Option<OwnedHandle>,
    pid: Pid,
}

impl WindowsProcessHandle {
    pub(crate) fn new(process: OwnedHandle, pid: Pid) -> Self {
        Self {
            process: Some(process),
            pid,
        }
    }

    /// Open an existing process by id with full access.
    pub(crate) fn open(pid: Pid) -> Result<Self> {
        let raw = unsafe { OpenProcess(PROCESS_ALL_ACCESS, FALSE, pid) };
        if raw == 0 {
            return Err(ProcessError::wait(
                pid,
                "OpenProcess failed",
                io::Error::last_os_error(),
            ));
        }
        let process = unsafe { OwnedHandle::from_raw_handle(raw as _) };
        Ok(Self::new(process, pid))
    }

    fn raw(&self) -> Result<HANDLE> {
        match &self.process {
            Some(process) => Ok(process.as_raw_handle() as HANDLE),
            None => Err(ProcessError::InvalidArgument(
                "process handle is not bound to a process".to_string(),
            )),
        }
    }

    /// Record the exit code of a process known to be signaled.
    fn settle_exit_code(&self, handle: HANDLE, status: &StatusCell) -> Result<i32> {
        let code = exit_code_of(handle)
            .map_err(|err| ProcessError::wait(self.pid, "GetExitCodeProcess failed", err))?;
        // An exit code equal to STILL_ACTIVE cannot be stored; it reads back as
        // the same value anyway.
        status.settle(code);
        Ok(code)
    }
}

pub(crate) fn exit_code_of(handle: HANDLE) -> io::Result<i32> {
    let mut code = 0u32;
    if unsafe { GetExitCodeProcess(handle, &mut code) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(code as i32)
}

impl NativeProcessHandle for WindowsProcessHandle {
    fn id(&self) -> Pid {
        self.pid
    }

    fn native_handle(&self) -> NativeHandle {
        self.raw().unwrap_or(0)
    }

    fn valid(&self) -> bool {
        self.process.is_some()
    }

    fn is_running(&self, status: &StatusCell) -> Result<bool> {
        let Some(process) = &self.process else {
            return Ok(false);
        };
        if !status.is_running() {
            return Ok(false);
        }
        let handle = process.as_raw_handle() as HANDLE;
        match unsafe { WaitForSingleObject(handle, 0) } {
            WAIT_TIMEOUT => Ok(true),
            WAIT_OBJECT_0 => {
                self.settle_exit_code(handle, status)?;
                Ok(false)
            }
            _ => Err(ProcessError::wait(
                self.pid,
                "WaitForSingleObject failed",
                io::Error::last_os_error(),
            )),
        }
    }

    fn wait(&self, status: &StatusCell) -> Result<i32> {
        let handle = self.raw()?;
        if !status.is_running() {
            return Ok(status.load());
        }
        if unsafe { WaitForSingleObject(handle, INFINITE) } != WAIT_OBJECT_0 {
            return Err(ProcessError::wait(
                self.pid,
                "WaitForSingleObject failed",
                io::Error::last_os_error(),
            ));
        }
        self.settle_exit_code(handle, status)
    }

    fn terminate(&self, status: &StatusCell) -> Result<()> {
        let handle = self.raw()?;
        if !status.is_running() {
            return Ok(());
        }
        if unsafe { TerminateProcess(handle, TERMINATED_EXIT_CODE) } == 0 {
            return Err(ProcessError::terminate(
                self.pid,
                "TerminateProcess failed",
                io::Error::last_os_error(),
            ));
        }
        if let Err(err) = self.wait(status) {
            debug!(pid = self.pid, "could not collect exit code after terminate: {err}");
        }
        Ok(())
    }

    fn terminate_if_running(&self, status: &StatusCell) {
        match self.is_running(status) {
            Ok(false) => {}
            Ok(true) => {
                if let Err(err) = self.terminate(status) {
                    debug!(pid = self.pid, "terminate during teardown failed: {err}");
                }
            }
            Err(err) => debug!(pid = self.pid, "poll before teardown failed: {err}"),
        }
    }

    fn wait_for_exit(
        &self,
        status: Arc<StatusCell>,
    ) -> impl Future<Output = Result<i32>> + Send + 'static {
        let pid = self.pid;
        let duplicate = match &self.process {
            Some(process) => process
                .try_clone()
                .map_err(|err| ProcessError::wait(pid, "DuplicateHandle failed", err)),
            None => Err(ProcessError::InvalidArgument(
                "process handle is not bound to a process".to_string(),
            )),
        };
        async move {
            let process = duplicate?;
            if status.is_running() {
                notify::wait_for_object(&process)
                    .await
                    .map_err(|err| ProcessError::wait(pid, "RegisterWaitForSingleObject failed", err))?;
                let code = exit_code_of(process.as_raw_handle() as HANDLE)
                    .map_err(|err| ProcessError::wait(pid, "GetExitCodeProcess failed", err))?;
                status.settle(code);
                return Ok(eval_exit_status(code));
            }
            Ok(eval_exit_status(status.load()))
        }
    }
}
