use std::ffi::c_void;

use crate::error::{Error, Result};

pub type RawToken = u32;

#[allow(non_snake_case)]
#[link(name = "kernel32")]
extern "system" {
    fn CreateThread(
        lpThreadAttributes: *mut c_void,
        dwStackSize: usize,
        lpStartAddress: unsafe extern "system" fn(*mut c_void) -> u32,
        lpParameter: *mut c_void,
        dwCreationFlags: u32,
        lpThreadId: *mut u32,
    ) -> *mut c_void; // -> HANDLE
    fn CloseHandle(hObject: *mut c_void) -> i32; // -> BOOL
    fn GetCurrentThreadId() -> u32;
}

const STACK_SIZE_PARAM_IS_A_RESERVATION: u32 = 0x0001_0000;

unsafe extern "system" fn start(arg: *mut c_void) -> u32 {
    super::run_entry(arg);
    0
}

pub fn current() -> RawToken {
    unsafe { GetCurrentThreadId() }
}

/// # Safety
/// `arg` must be a pointer accepted by [`super::run_entry`]. On success the new thread takes ownership of it
pub unsafe fn spawn(stack_size: Option<usize>, arg: *mut c_void) -> Result<RawToken> {
    let (size, flags) = stack_size.map_or((0, 0), |size| (size, STACK_SIZE_PARAM_IS_A_RESERVATION));
    let mut tid = 0u32;
    let hdl = CreateThread(core::ptr::null_mut(), size, start, arg, flags, &mut tid);
    if hdl.is_null() {
        return Err(Error::last_os_error("thread_create").logged());
    }
    // Closing the only handle detaches the thread; it keeps running
    if CloseHandle(hdl) == 0 {
        let _ = Error::last_os_error("thread_detach").logged();
    }
    Ok(tid)
}
