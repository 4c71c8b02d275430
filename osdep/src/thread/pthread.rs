use std::ffi::c_void;
use std::mem::MaybeUninit;

use crate::error::{Error, Result};

pub type RawToken = libc::pthread_t;

extern "C" fn start(arg: *mut c_void) -> *mut c_void {
    unsafe { super::run_entry(arg) };
    core::ptr::null_mut()
}

pub fn current() -> RawToken {
    unsafe { libc::pthread_self() }
}

/// # Safety
/// `arg` must be a pointer accepted by [`super::run_entry`]. On success the new thread takes ownership of it
pub unsafe fn spawn(stack_size: Option<usize>, arg: *mut c_void) -> Result<RawToken> {
    let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
    let ret = libc::pthread_attr_init(attr.as_mut_ptr());
    if ret != 0 {
        return Err(Error::from_errno("thread_attr_init", ret).logged());
    }
    if let Some(size) = stack_size {
        let size = size.max(libc::PTHREAD_STACK_MIN);
        let ret = libc::pthread_attr_setstacksize(attr.as_mut_ptr(), size);
        if ret != 0 {
            libc::pthread_attr_destroy(attr.as_mut_ptr());
            return Err(Error::from_errno("thread_attr_setstacksize", ret).logged());
        }
    }

    let mut tid = MaybeUninit::<libc::pthread_t>::uninit();
    let ret = libc::pthread_create(tid.as_mut_ptr(), attr.as_ptr(), start, arg);
    libc::pthread_attr_destroy(attr.as_mut_ptr());
    if ret != 0 {
        // EAGAIN, or EINVAL for a stack size the host refuses
        return Err(Error::Resource {
            op: "thread_create",
            source: std::io::Error::from_raw_os_error(ret),
        }
        .logged());
    }
    let tid = tid.assume_init();

    let ret = libc::pthread_detach(tid);
    if ret != 0 {
        // The thread is already running, so it still counts as started
        let _ = Error::from_errno("thread_detach", ret).logged();
    }
    Ok(tid)
}
