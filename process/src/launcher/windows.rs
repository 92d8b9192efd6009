use std::borrow::Cow;
use std::ffi::OsStr;
use std::ffi::c_void;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::FromRawHandle;
use std::os::windows::io::OwnedHandle;
use std::path::Path;

use tracing::debug;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Threading::CREATE_SUSPENDED;
use windows_sys::Win32::System::Threading::CREATE_UNICODE_ENVIRONMENT;
use windows_sys::Win32::System::Threading::CreateProcessW;
use windows_sys::Win32::System::Threading::PROCESS_INFORMATION;
use windows_sys::Win32::System::Threading::ResumeThread;
use windows_sys::Win32::System::Threading::STARTUPINFOW;

use super::Initializer;
use super::PendingError;
use super::command_line;
use crate::Pid;
use crate::Process;
use crate::ProcessError;
use crate::Result;
use crate::error::LaunchPhase;
use crate::handle::ProcessHandle;

/// Single-use process launcher.
pub struct Launcher {
    error: Option<PendingError>,
    creation_flags: u32,
    inherit_handles: bool,
    env_block: Option<Vec<u16>>,
    work_dir: Option<Vec<u16>>,
    startup_info: STARTUPINFOW,
    process: HANDLE,
    thread: HANDLE,
    pid: Pid,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("error", &self.error)
            .field("creation_flags", &self.creation_flags)
            .field("inherit_handles", &self.inherit_handles)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    pub fn new() -> Self {
        let mut startup_info: STARTUPINFOW = unsafe { std::mem::zeroed() };
        startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
        Self {
            error: None,
            creation_flags: 0,
            inherit_handles: false,
            env_block: None,
            work_dir: None,
            startup_info,
            process: 0,
            thread: 0,
            pid: 0,
        }
    }

    /// Abort the launch. The first error set wins.
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

    /// Pid of the created process, `0` before `CreateProcessW` succeeded.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn creation_flags(&self) -> u32 {
        self.creation_flags
    }

    pub fn add_creation_flags(&mut self, flags: u32) {
        self.creation_flags |= flags;
    }

    pub fn set_inherit_handles(&mut self, inherit: bool) {
        self.inherit_handles = inherit;
    }

    /// Replace the environment with a UTF-16 block of NUL-terminated
    /// `KEY=VALUE` entries ending in an extra NUL.
    pub fn set_env_block(&mut self, block: Vec<u16>) {
        self.env_block = Some(block);
    }

    pub fn set_work_dir(&mut self, dir: &Path) {
        self.work_dir = Some(to_wide(dir.as_os_str()));
    }

    pub fn startup_info_mut(&mut self) -> &mut STARTUPINFOW {
        &mut self.startup_info
    }

    /// Process handle of the created process, valid during `on_success`.
    pub fn process_handle(&self) -> HANDLE {
        self.process
    }

    /// Primary thread handle, valid during `on_success`.
    pub fn thread_handle(&self) -> HANDLE {
        self.thread
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
        let mut words: Vec<Vec<u16>> = vec![exe.as_os_str().encode_wide().collect()];
        words.extend(args.into_iter().map(|arg| arg.as_ref().encode_wide().collect()));
        let mut command_line = command_line::build(&words);

        for initializer in initializers.iter_mut() {
            if self.has_error() {
                break;
            }
            initializer.on_setup(&mut self);
        }
        if self.has_error() {
            return Err(self.abort(LaunchPhase::Setup, exe, initializers));
        }

        let application = to_wide(exe.as_os_str());
        let mut flags = self.creation_flags;
        let env_ptr = match &self.env_block {
            Some(block) => {
                flags |= CREATE_UNICODE_ENVIRONMENT;
                block.as_ptr() as *const c_void
            }
            None => std::ptr::null(),
        };
        let work_dir_ptr = self
            .work_dir
            .as_ref()
            .map_or(std::ptr::null(), |dir| dir.as_ptr());
        let mut info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            CreateProcessW(
                application.as_ptr(),
                command_line.as_mut_ptr(),
                std::ptr::null(),
                std::ptr::null(),
                i32::from(self.inherit_handles),
                flags,
                env_ptr,
                work_dir_ptr,
                &self.startup_info,
                &mut info,
            )
        };
        if ok == 0 {
            self.set_error(io::Error::last_os_error(), "CreateProcessW failed");
            return Err(self.abort(LaunchPhase::Spawn, exe, initializers));
        }

        let thread = unsafe { OwnedHandle::from_raw_handle(info.hThread as _) };
        let process_handle = unsafe { OwnedHandle::from_raw_handle(info.hProcess as _) };
        self.process = info.hProcess;
        self.thread = info.hThread;
        self.pid = info.dwProcessId;
        let process = Process::from_handle(ProcessHandle::new(process_handle, info.dwProcessId));

        for initializer in initializers.iter_mut() {
            if self.has_error() {
                break;
            }
            initializer.on_success(&mut self);
        }
        if !self.has_error()
            && flags & CREATE_SUSPENDED != 0
            && unsafe { ResumeThread(info.hThread) } == u32::MAX
        {
            self.set_error(io::Error::last_os_error(), "ResumeThread failed");
        }
        drop(thread);
        self.thread = 0;
        if self.has_error() {
            drop(process);
            self.process = 0;
            return Err(self.abort(LaunchPhase::PostSuccess, exe, initializers));
        }

        debug!(pid = self.pid, exe = %exe.display(), "launched process");
        Ok(process)
    }

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
        debug!(exe = %exe.display(), ?phase, "launch failed: {message}: {source}");
        ProcessError::launch(phase, exe, message, source)
    }
}

pub(crate) fn to_wide(value: &OsStr) -> Vec<u16> {
    value.encode_wide().chain(std::iter::once(0)).collect()
}
