use std::collections::HashMap;
use std::ffi::c_void;
use std::future::Future;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::os::windows::io::FromRawHandle;
use std::os::windows::io::OwnedHandle;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;
use tracing::warn;
use windows_sys::Win32::Foundation::ERROR_INVALID_PARAMETER;
use windows_sys::Win32::Foundation::FALSE;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
use windows_sys::Win32::System::IO::CreateIoCompletionPort;
use windows_sys::Win32::System::JobObjects::AssignProcessToJobObject;
use windows_sys::Win32::System::JobObjects::CreateJobObjectW;
use windows_sys::Win32::System::JobObjects::IsProcessInJob;
use windows_sys::Win32::System::JobObjects::JOB_OBJECT_LIMIT_BREAKAWAY_OK;
use windows_sys::Win32::System::JobObjects::JOBOBJECT_ASSOCIATE_COMPLETION_PORT;
use windows_sys::Win32::System::JobObjects::JOBOBJECT_BASIC_ACCOUNTING_INFORMATION;
use windows_sys::Win32::System::JobObjects::JOBOBJECT_EXTENDED_LIMIT_INFORMATION;
use windows_sys::Win32::System::JobObjects::JobObjectAssociateCompletionPortInformation;
use windows_sys::Win32::System::JobObjects::JobObjectBasicAccountingInformation;
use windows_sys::Win32::System::JobObjects::JobObjectExtendedLimitInformation;
use windows_sys::Win32::System::JobObjects::QueryInformationJobObject;
use windows_sys::Win32::System::JobObjects::SetInformationJobObject;
use windows_sys::Win32::System::JobObjects::TerminateJobObject;
use windows_sys::Win32::System::SystemServices::JOB_OBJECT_MSG_ABNORMAL_EXIT_PROCESS;
use windows_sys::Win32::System::SystemServices::JOB_OBJECT_MSG_ACTIVE_PROCESS_ZERO;
use windows_sys::Win32::System::SystemServices::JOB_OBJECT_MSG_EXIT_PROCESS;
use windows_sys::Win32::System::Threading::CREATE_BREAKAWAY_FROM_JOB;
use windows_sys::Win32::System::Threading::CREATE_SUSPENDED;
use windows_sys::Win32::System::Threading::GetCurrentProcess;
use windows_sys::Win32::System::Threading::INFINITE;
use windows_sys::Win32::System::Threading::OpenProcess;
use windows_sys::Win32::System::Threading::PROCESS_QUERY_LIMITED_INFORMATION;

use crate::Pid;
use crate::Process;
use crate::ProcessError;
use crate::Result;
use crate::handle::NativeProcessHandle;
use crate::handle::ProcessHandle;
use crate::handle::exit_code_of;
use crate::launcher::Initializer;
use crate::launcher::Launcher;
use crate::notify::JobMessage;
use crate::notify::drain_job_messages;
use crate::notify::next_job_message;

/// Exit code of members killed through `terminate`.
const TERMINATED_EXIT_CODE: u32 = 1;

type Members = Arc<Mutex<HashMap<Pid, ProcessHandle>>>;

/// Job object plus the completion port receiving its notifications.
///
/// Handles of processes launched or attached through the group are kept so
/// their exit codes stay retrievable after they exit.
#[derive(Debug)]
pub(super) struct GroupHandle {
    job: Arc<OwnedHandle>,
    port: Arc<OwnedHandle>,
    members: Members,
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}

fn owned(handle: HANDLE) -> OwnedHandle {
    unsafe { OwnedHandle::from_raw_handle(handle as _) }
}

impl GroupHandle {
    pub(super) fn new() -> Result<Self> {
        let job = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
        if job == 0 {
            return Err(ProcessError::group(
                "CreateJobObjectW failed",
                io::Error::last_os_error(),
            ));
        }
        Self::from_native(owned(job))
    }

    pub(super) fn from_native(job: OwnedHandle) -> Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 1) };
        if port == 0 {
            return Err(ProcessError::group(
                "CreateIoCompletionPort failed",
                io::Error::last_os_error(),
            ));
        }
        let port = owned(port);
        let association = JOBOBJECT_ASSOCIATE_COMPLETION_PORT {
            CompletionKey: raw(&job) as *mut c_void,
            CompletionPort: raw(&port),
        };
        let ok = unsafe {
            SetInformationJobObject(
                raw(&job),
                JobObjectAssociateCompletionPortInformation,
                &association as *const _ as *const c_void,
                std::mem::size_of::<JOBOBJECT_ASSOCIATE_COMPLETION_PORT>() as u32,
            )
        };
        if ok == 0 {
            return Err(ProcessError::group(
                "failed to associate completion port with job object",
                io::Error::last_os_error(),
            ));
        }
        enable_breakaway(raw(&job))?;
        Ok(Self {
            job: Arc::new(job),
            port: Arc::new(port),
            members: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub(super) fn native_handle(&self) -> HANDLE {
        raw(&self.job)
    }

    pub(super) fn attach(&mut self, process: &Process) -> Result<()> {
        if unsafe { AssignProcessToJobObject(raw(&self.job), process.native_handle()) } == 0 {
            return Err(ProcessError::group(
                "AssignProcessToJobObject failed",
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    pub(super) fn prepare_emplace(&mut self) {}

    pub(super) fn membership(&mut self) -> Membership<'_> {
        Membership { job: &self.job }
    }

    pub(super) fn adopt(&mut self, handle: ProcessHandle) {
        if let Ok(mut members) = self.members.lock() {
            members.insert(handle.id(), handle);
        }
    }

    pub(super) fn contains(&self, pid: Pid) -> Result<bool> {
        let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) };
        if process == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_INVALID_PARAMETER as i32) {
                return Ok(false);
            }
            return Err(ProcessError::group("OpenProcess failed", err));
        }
        let process = owned(process);
        let mut result = FALSE;
        if unsafe { IsProcessInJob(raw(&process), raw(&self.job), &mut result) } == 0 {
            return Err(ProcessError::group(
                "IsProcessInJob failed",
                io::Error::last_os_error(),
            ));
        }
        Ok(result != FALSE)
    }

    pub(super) fn terminate(&mut self) -> Result<()> {
        if unsafe { TerminateJobObject(raw(&self.job), TERMINATED_EXIT_CODE) } == 0 {
            return Err(ProcessError::group(
                "TerminateJobObject failed",
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    /// Leaves no notifications queued, so a later `wait_one` only reports
    /// members that exit afterwards.
    pub(super) fn wait(&mut self) -> Result<()> {
        let port = raw(&self.port);
        if active_processes(&self.job)? != 0 {
            loop {
                let message = next_job_message(port, INFINITE)
                    .map_err(|err| ProcessError::group("GetQueuedCompletionStatus failed", err))?;
                if let Some(message) = message
                    && is_active_zero(&self.job, message)?
                {
                    break;
                }
            }
        }
        while next_job_message(port, 0)
            .map_err(|err| ProcessError::group("GetQueuedCompletionStatus failed", err))?
            .is_some()
        {}
        if let Ok(mut members) = self.members.lock() {
            members.clear();
        }
        Ok(())
    }

    pub(super) fn wait_one(&mut self) -> Result<(Pid, i32)> {
        // Exit notifications of already-finished members may still be queued.
        let timeout = if active_processes(&self.job)? == 0 {
            0
        } else {
            INFINITE
        };
        loop {
            let message = next_job_message(raw(&self.port), timeout)
                .map_err(|err| ProcessError::group("GetQueuedCompletionStatus failed", err))?;
            let Some(message) = message else {
                return Err(no_members());
            };
            if let Some(exited) = member_exit(&self.job, &self.members, message)? {
                return Ok(exited);
            }
        }
    }

    pub(super) fn wait_for_all(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let job = Arc::clone(&self.job);
        let port = Arc::clone(&self.port);
        async move {
            if active_processes(&job)? == 0 {
                return Ok(());
            }
            drain_job_messages(port, move |message| {
                is_active_zero(&job, message)
                    .map(|done| done.then_some(()))
                    .map_err(|err| io::Error::other(err.to_string()))
            })
            .await
            .map_err(|err| ProcessError::group("waiting on job object failed", err))
        }
    }

    pub(super) fn wait_for_one(
        &self,
    ) -> impl Future<Output = Result<(Pid, i32)>> + Send + 'static {
        let job = Arc::clone(&self.job);
        let port = Arc::clone(&self.port);
        let members = Arc::clone(&self.members);
        async move {
            drain_job_messages(port, move |message| {
                member_exit(&job, &members, message).map_err(|err| io::Error::other(err.to_string()))
            })
            .await
            .map_err(|err| ProcessError::group("waiting on job object failed", err))
        }
    }

    pub(super) fn kill_and_reap(&mut self) {
        if let Err(err) = self.terminate() {
            warn!("failed to terminate job object: {err}");
        }
        if let Ok(mut members) = self.members.lock() {
            members.clear();
        }
    }
}

fn no_members() -> ProcessError {
    ProcessError::group(
        "group has no members",
        io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER as i32),
    )
}

fn active_processes(job: &OwnedHandle) -> Result<u32> {
    let mut info: JOBOBJECT_BASIC_ACCOUNTING_INFORMATION = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        QueryInformationJobObject(
            raw(job),
            JobObjectBasicAccountingInformation,
            &mut info as *mut _ as *mut c_void,
            std::mem::size_of::<JOBOBJECT_BASIC_ACCOUNTING_INFORMATION>() as u32,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(ProcessError::group(
            "QueryInformationJobObject failed",
            io::Error::last_os_error(),
        ));
    }
    Ok(info.ActiveProcesses)
}

/// A zero-active notification is only trusted once the job confirms it;
/// members may have been added since it was queued.
fn is_active_zero(job: &OwnedHandle, message: JobMessage) -> Result<bool> {
    if message.key != raw(job) as usize || message.code != JOB_OBJECT_MSG_ACTIVE_PROCESS_ZERO {
        return Ok(false);
    }
    Ok(active_processes(job)? == 0)
}

fn member_exit(
    job: &OwnedHandle,
    members: &Members,
    message: JobMessage,
) -> Result<Option<(Pid, i32)>> {
    if message.key != raw(job) as usize
        || (message.code != JOB_OBJECT_MSG_EXIT_PROCESS
            && message.code != JOB_OBJECT_MSG_ABNORMAL_EXIT_PROCESS)
    {
        return Ok(None);
    }
    let pid = message.pid;
    let known = members.lock().ok().and_then(|mut members| members.remove(&pid));
    let code = match known {
        Some(handle) => exit_code_of(handle.native_handle()),
        None => open_exit_code(pid),
    };
    match code {
        Ok(code) => Ok(Some((pid, code))),
        Err(err) => {
            debug!(pid, "exit code of group member unavailable: {err}");
            Err(ProcessError::wait(pid, "GetExitCodeProcess failed", err))
        }
    }
}

/// Exit code of a member spawned outside the group API (e.g. a grandchild).
fn open_exit_code(pid: Pid) -> io::Result<i32> {
    let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) };
    if process == 0 {
        return Err(io::Error::last_os_error());
    }
    exit_code_of(raw(&owned(process)))
}

fn enable_breakaway(job: HANDLE) -> Result<()> {
    let mut info = extended_limits(job)?;
    info.BasicLimitInformation.LimitFlags |= JOB_OBJECT_LIMIT_BREAKAWAY_OK;
    let ok = unsafe {
        SetInformationJobObject(
            job,
            JobObjectExtendedLimitInformation,
            &info as *const _ as *const c_void,
            std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        )
    };
    if ok == 0 {
        return Err(ProcessError::group(
            "SetInformationJobObject failed",
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Limits of `job`; a null handle queries the job of the calling process.
fn extended_limits(job: HANDLE) -> Result<JOBOBJECT_EXTENDED_LIMIT_INFORMATION> {
    let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        QueryInformationJobObject(
            job,
            JobObjectExtendedLimitInformation,
            &mut info as *mut _ as *mut c_void,
            std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(ProcessError::group(
            "QueryInformationJobObject failed",
            io::Error::last_os_error(),
        ));
    }
    Ok(info)
}

/// Children of a process that is itself in a job must break away from that
/// job to join ours, which is only allowed when that job permits it.
fn parent_job_allows_breakaway() -> bool {
    let mut in_job = FALSE;
    if unsafe { IsProcessInJob(GetCurrentProcess(), 0, &mut in_job) } == 0 || in_job == FALSE {
        return false;
    }
    extended_limits(0)
        .map(|info| info.BasicLimitInformation.LimitFlags & JOB_OBJECT_LIMIT_BREAKAWAY_OK != 0)
        .unwrap_or(false)
}

/// Starts the child suspended and assigns it to the job before it runs.
pub(super) struct Membership<'a> {
    job: &'a OwnedHandle,
}

impl Initializer for Membership<'_> {
    fn on_setup(&mut self, launcher: &mut Launcher) {
        launcher.add_creation_flags(CREATE_SUSPENDED);
        if parent_job_allows_breakaway() {
            launcher.add_creation_flags(CREATE_BREAKAWAY_FROM_JOB);
        }
    }

    fn on_success(&mut self, launcher: &mut Launcher) {
        if unsafe { AssignProcessToJobObject(raw(self.job), launcher.process_handle()) } == 0 {
            launcher.set_error(
                io::Error::last_os_error(),
                "failed to assign process to job object",
            );
        }
    }
}
