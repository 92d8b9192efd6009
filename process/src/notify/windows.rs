use std::ffi::c_void;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::os::windows::io::OwnedHandle;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::oneshot;
use windows_sys::Win32::Foundation::BOOLEAN;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
use windows_sys::Win32::Foundation::WAIT_TIMEOUT;
use windows_sys::Win32::System::IO::GetQueuedCompletionStatus;
use windows_sys::Win32::System::IO::OVERLAPPED;
use windows_sys::Win32::System::Threading::INFINITE;
use windows_sys::Win32::System::Threading::RegisterWaitForSingleObject;
use windows_sys::Win32::System::Threading::UnregisterWaitEx;
use windows_sys::Win32::System::Threading::WT_EXECUTEONLYONCE;

/// How often a blocking drain re-checks whether its future was dropped.
const DRAIN_POLL_MS: u32 = 100;

type WakeSlot = Mutex<Option<oneshot::Sender<()>>>;

/// A live `RegisterWaitForSingleObject` registration and its callback context.
struct RegisteredWait {
    wait: HANDLE,
    context: *const WakeSlot,
}

// The context is only touched by the thread-pool callback and by Drop, which
// blocks until any in-flight callback has returned.
unsafe impl Send for RegisteredWait {}

impl Drop for RegisteredWait {
    fn drop(&mut self) {
        unsafe {
            UnregisterWaitEx(self.wait, INVALID_HANDLE_VALUE);
            drop(Arc::from_raw(self.context));
        }
    }
}

unsafe extern "system" fn on_object_signaled(context: *mut c_void, _timed_out: BOOLEAN) {
    let slot = unsafe { &*(context as *const WakeSlot) };
    if let Ok(mut sender) = slot.lock()
        && let Some(sender) = sender.take()
    {
        let _ = sender.send(());
    }
}

/// Resolve once `object` is signaled.
pub(crate) async fn wait_for_object(object: &OwnedHandle) -> io::Result<()> {
    let (tx, rx) = oneshot::channel();
    let context = Arc::into_raw(Arc::new(Mutex::new(Some(tx))));
    let mut wait: HANDLE = 0;
    let ok = unsafe {
        RegisterWaitForSingleObject(
            &mut wait,
            object.as_raw_handle() as HANDLE,
            Some(on_object_signaled),
            context as *const c_void,
            INFINITE,
            WT_EXECUTEONLYONCE,
        )
    };
    if ok == 0 {
        let err = io::Error::last_os_error();
        unsafe { drop(Arc::from_raw(context)) };
        return Err(err);
    }
    let _registration = RegisteredWait { wait, context };
    rx.await
        .map_err(|_| io::Error::other("wait registration released before signaling"))
}

/// One notification posted by a job object to its completion port.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobMessage {
    pub(crate) code: u32,
    pub(crate) key: usize,
    /// Process id for per-process messages.
    pub(crate) pid: u32,
}

/// Dequeue one message; `None` when `timeout_ms` elapsed first.
pub(crate) fn next_job_message(port: HANDLE, timeout_ms: u32) -> io::Result<Option<JobMessage>> {
    let mut code = 0u32;
    let mut key = 0usize;
    let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();
    let ok = unsafe {
        GetQueuedCompletionStatus(port, &mut code, &mut key, &mut overlapped, timeout_ms)
    };
    if ok == 0 {
        let err = io::Error::last_os_error();
        if overlapped.is_null() && err.raw_os_error() == Some(WAIT_TIMEOUT as i32) {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(JobMessage {
        code,
        key,
        pid: overlapped as usize as u32,
    }))
}

struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Feed job messages to `accept` on the blocking pool until it yields a value.
///
/// Dropping the returned future stops the drain within [`DRAIN_POLL_MS`].
pub(crate) async fn drain_job_messages<T, F>(port: Arc<OwnedHandle>, mut accept: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnMut(JobMessage) -> io::Result<Option<T>> + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let _cancel = CancelOnDrop(Arc::clone(&cancelled));
    let drain = tokio::task::spawn_blocking(move || {
        let port = port.as_raw_handle() as HANDLE;
        loop {
            if cancelled.load(Ordering::Acquire) {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            if let Some(message) = next_job_message(port, DRAIN_POLL_MS)?
                && let Some(value) = accept(message)?
            {
                return Ok(value);
            }
        }
    });
    drain.await.map_err(io::Error::other)?
}
