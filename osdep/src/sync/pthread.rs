use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crate::error::{Error, Result};

/// The native condition variable wakes each waiter independently
pub const MULTIPLE_WAITERS: bool = true;

fn check(op: &'static str, ret: libc::c_int) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(Error::from_errno(op, ret).logged())
    }
}

// pthread objects must not move once initialized, so they live behind a Box
pub struct RawMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// SAFETY: pthread mutexes are meant to be shared between threads
unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    pub fn new() -> Result<Self> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check("mutexattr_init", unsafe {
            libc::pthread_mutexattr_init(attr.as_mut_ptr())
        })?;
        // Error checking turns relocking and foreign unlocks into errors instead of deadlocks
        let ret = check("mutexattr_settype", unsafe {
            libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ERRORCHECK)
        })
        .and_then(|()| {
            check("mutex_init", unsafe {
                libc::pthread_mutex_init(inner.get(), attr.as_ptr())
            })
        });
        unsafe {
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        }
        ret.map(|()| Self { inner })
    }

    pub fn lock(&self) -> Result<()> {
        check("mutex_lock", unsafe { libc::pthread_mutex_lock(self.inner.get()) })
    }

    pub fn try_lock(&self) -> Result<bool> {
        match unsafe { libc::pthread_mutex_trylock(self.inner.get()) } {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            ret => check("mutex_trylock", ret).map(|()| false),
        }
    }

    pub fn unlock(&self) -> Result<()> {
        check("mutex_unlock", unsafe {
            libc::pthread_mutex_unlock(self.inner.get())
        })
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_destroy(self.inner.get());
        }
    }
}

pub struct RawCondvar {
    inner: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// SAFETY: pthread condition variables are meant to be shared between threads
unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    pub fn new() -> Result<Self> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        check("cond_init", unsafe {
            libc::pthread_cond_init(inner.get(), core::ptr::null())
        })?;
        Ok(Self { inner })
    }

    pub fn wait(&self, mutex: &RawMutex) -> Result<()> {
        check("cond_wait", unsafe {
            libc::pthread_cond_wait(self.inner.get(), mutex.inner.get())
        })
    }

    pub fn signal(&self) -> Result<()> {
        check("cond_signal", unsafe {
            libc::pthread_cond_signal(self.inner.get())
        })
    }
}

impl Drop for RawCondvar {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_cond_destroy(self.inner.get());
        }
    }
}
