use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// The event-based emulation supports a single waiter per instance
pub const MULTIPLE_WAITERS: bool = false;

// CRITICAL_SECTION
#[allow(dead_code)]
#[repr(C)]
struct CriticalSection {
    debug_info: *mut c_void,
    lock_count: i32,
    recursion_count: i32,
    owning_thread: *mut c_void,
    lock_semaphore: *mut c_void,
    spin_count: usize,
}

#[allow(non_snake_case)]
#[link(name = "kernel32")]
extern "system" {
    fn InitializeCriticalSection(lpCriticalSection: *mut CriticalSection);
    fn EnterCriticalSection(lpCriticalSection: *mut CriticalSection);
    fn TryEnterCriticalSection(lpCriticalSection: *mut CriticalSection) -> i32; // -> BOOL
    fn LeaveCriticalSection(lpCriticalSection: *mut CriticalSection);
    fn DeleteCriticalSection(lpCriticalSection: *mut CriticalSection);
    fn CreateEventW(
        lpEventAttributes: *mut c_void,
        bManualReset: i32,
        bInitialState: i32,
        lpName: *const u16,
    ) -> *mut c_void; // -> HANDLE
    fn SetEvent(hEvent: *mut c_void) -> i32; // -> BOOL
    fn WaitForSingleObject(hHandle: *mut c_void, dwMilliseconds: u32) -> u32;
    fn CloseHandle(hObject: *mut c_void) -> i32; // -> BOOL
}

const INFINITE: u32 = 0xFFFF_FFFF;
const WAIT_OBJECT_0: u32 = 0;

// Critical sections must not move once initialized, so they live behind a Box
pub struct RawMutex {
    inner: Box<UnsafeCell<CriticalSection>>,
}

// SAFETY: critical sections are meant to be shared between threads
unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    #[allow(clippy::unnecessary_wraps)]
    pub fn new() -> Result<Self> {
        let inner = Box::new(UnsafeCell::new(CriticalSection {
            debug_info: core::ptr::null_mut(),
            lock_count: 0,
            recursion_count: 0,
            owning_thread: core::ptr::null_mut(),
            lock_semaphore: core::ptr::null_mut(),
            spin_count: 0,
        }));
        unsafe { InitializeCriticalSection(inner.get()) };
        Ok(Self { inner })
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn lock(&self) -> Result<()> {
        unsafe { EnterCriticalSection(self.inner.get()) };
        Ok(())
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn try_lock(&self) -> Result<bool> {
        Ok(unsafe { TryEnterCriticalSection(self.inner.get()) } != 0)
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn unlock(&self) -> Result<()> {
        unsafe { LeaveCriticalSection(self.inner.get()) };
        Ok(())
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        unsafe { DeleteCriticalSection(self.inner.get()) };
    }
}

// An auto-reset event standing in for a condition variable.
// Releasing the mutex and blocking on the event are two steps, and the event holds at most one pending signal,
// so this only works with one waiter at a time. `waiters` enforces that.
pub struct RawCondvar {
    event: *mut c_void,
    waiters: AtomicUsize,
}

// SAFETY: event handles are meant to be shared between threads
unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    pub fn new() -> Result<Self> {
        let event = unsafe { CreateEventW(core::ptr::null_mut(), 0, 0, core::ptr::null()) };
        if event.is_null() {
            Err(Error::last_os_error("cond_init").logged())
        } else {
            Ok(Self {
                event,
                waiters: AtomicUsize::new(0),
            })
        }
    }

    pub fn wait(&self, mutex: &RawMutex) -> Result<()> {
        if self.waiters.fetch_add(1, Ordering::Acquire) != 0 {
            self.waiters.fetch_sub(1, Ordering::Release);
            return Err(Error::ConsistencyViolation {
                op: "cond_wait",
                message: String::from(
                    "a second thread waited on a condition variable that supports one waiter",
                ),
            }
            .logged());
        }
        mutex.unlock()?;
        let ret = unsafe { WaitForSingleObject(self.event, INFINITE) };
        // Capture the wait's error before EnterCriticalSection can clobber it
        let err = (ret != WAIT_OBJECT_0).then(|| Error::last_os_error("cond_wait"));
        mutex.lock()?;
        self.waiters.fetch_sub(1, Ordering::Release);
        err.map_or(Ok(()), |err| Err(err.logged()))
    }

    pub fn signal(&self) -> Result<()> {
        if unsafe { SetEvent(self.event) } == 0 {
            Err(Error::last_os_error("cond_signal").logged())
        } else {
            Ok(())
        }
    }
}

impl Drop for RawCondvar {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.event) };
    }
}
