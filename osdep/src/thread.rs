use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use crate::error::Result;

cfg_match::cfg_match! {
    unix => {
        mod pthread;
        use pthread as sys;
    }
    windows => {
        mod win32;
        use win32 as sys;
    }
}

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a thread started by [`spawn`].
///
/// Threads are detached when they are created: a token can be compared and logged, but not joined or cancelled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadToken(sys::RawToken);

// SAFETY: the token is only an identifier, never dereferenced
unsafe impl Send for ThreadToken {}
unsafe impl Sync for ThreadToken {}

/// Returns the token of the calling thread
#[must_use]
pub fn current_token() -> ThreadToken {
    ThreadToken(sys::current())
}

/// Configuration for a new thread
#[derive(Clone, Debug, Default)]
pub struct Builder {
    stack_size: Option<usize>,
}

impl Builder {
    /// A builder that uses the host's default thread settings
    #[must_use]
    pub const fn new() -> Self {
        Self { stack_size: None }
    }

    /// Sets the size of the new thread's stack, in bytes. The host may round it up
    #[must_use]
    pub const fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Starts a detached thread running `f`.
    ///
    /// The thread may begin running before this returns. A panic escaping `f` is caught and logged on that thread.
    ///
    /// # Errors
    /// Returns [`Error::Resource`](crate::Error::Resource), already logged, if the host cannot create the thread.
    /// No thread was started in that case, and `f` has been dropped.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, f: F) -> Result<ThreadToken> {
        let entry: Box<Entry> = Box::new(Box::new(f));
        let arg = Box::into_raw(entry).cast::<c_void>();
        match unsafe { sys::spawn(self.stack_size, arg) } {
            Ok(raw) => {
                tracing::trace!(token = ?raw, "spawned thread");
                Ok(ThreadToken(raw))
            }
            Err(err) => {
                // The thread never started, so the entry point is still ours
                drop(unsafe { Box::from_raw(arg.cast::<Entry>()) });
                Err(err)
            }
        }
    }
}

/// Starts a detached thread running `f`, with the host's default thread settings.
///
/// See [`Builder::spawn`].
///
/// # Errors
/// Returns [`Error::Resource`](crate::Error::Resource), already logged, if the host cannot create the thread.
pub fn spawn<F: FnOnce() + Send + 'static>(f: F) -> Result<ThreadToken> {
    Builder::new().spawn(f)
}

/// Runs the entry point passed to [`sys::spawn`], on the new thread
///
/// # Safety
/// `arg` must be the pointer produced by [`Builder::spawn`], and this must be called once for it
unsafe fn run_entry(arg: *mut c_void) {
    let entry = Box::from_raw(arg.cast::<Entry>());
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || entry())) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::error!(token = ?sys::current(), %message, "detached thread panicked");
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::{Duration, Instant};

    use super::{current_token, spawn, Builder};
    use crate::test_util::init_test_logging;

    fn wait_for(flag: &AtomicBool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if flag.load(Ordering::Acquire) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_spawn_sets_flag() {
        init_test_logging();
        let flag = Arc::new(AtomicBool::new(false));
        let set = Arc::clone(&flag);
        spawn(move || set.store(true, Ordering::Release)).unwrap();
        assert!(wait_for(&flag));
    }

    #[test]
    fn test_token_matches_thread() {
        let (tx, rx) = mpsc::channel();
        let token = spawn(move || tx.send(current_token()).unwrap()).unwrap();
        let seen = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(seen, token);
        assert_ne!(token, current_token());
    }

    #[test]
    fn test_builder_stack_size() {
        let flag = Arc::new(AtomicBool::new(false));
        let set = Arc::clone(&flag);
        Builder::new()
            .stack_size(1024 * 1024)
            .spawn(move || {
                let buf = [1u8; 64 * 1024];
                set.store(std::hint::black_box(buf)[0] == 1, Ordering::Release);
            })
            .unwrap();
        assert!(wait_for(&flag));
    }

    #[test]
    fn test_panicking_thread_is_contained() {
        init_test_logging();
        spawn(|| panic!("entry point panicked")).unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let set = Arc::clone(&flag);
        spawn(move || set.store(true, Ordering::Release)).unwrap();
        assert!(wait_for(&flag));
    }
}
