use core::marker::PhantomData;

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

/// A non-reentrant mutual exclusion lock over the host's native mutex.
///
/// Unlike [`std::sync::Mutex`], it guards no data of its own: it orders whatever the threads that share it agree it orders.
/// Acquisition is not fair. The owning thread must not lock it again; on unix this is reported as
/// [`Error::ConsistencyViolation`](crate::Error::ConsistencyViolation), on windows it is not detected.
pub struct Mutex {
    raw: sys::RawMutex,
}

impl Mutex {
    /// Creates and initializes a new mutex
    ///
    /// # Errors
    /// Returns [`Error::Resource`](crate::Error::Resource) if the host cannot provide another mutex
    pub fn new() -> Result<Self> {
        sys::RawMutex::new().map(|raw| Self { raw })
    }

    /// Blocks until the calling thread owns the mutex.
    ///
    /// The mutex is released when the returned guard is dropped or passed to [`MutexGuard::unlock`].
    ///
    /// # Errors
    /// Returns an error, already logged, if the native lock fails
    pub fn lock(&self) -> Result<MutexGuard<'_>> {
        self.raw.lock()?;
        Ok(MutexGuard::new(self))
    }

    /// Acquires the mutex if no thread owns it, without blocking
    ///
    /// # Errors
    /// Returns an error, already logged, if the native lock fails for a reason other than contention
    pub fn try_lock(&self) -> Result<Option<MutexGuard<'_>>> {
        Ok(self.raw.try_lock()?.then(|| MutexGuard::new(self)))
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

/// Proof that the current thread owns a [`Mutex`].
///
/// Dropping the guard unlocks the mutex; an unlock failure is logged. Use [`MutexGuard::unlock`] to observe it instead.
#[must_use = "the mutex is unlocked as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    // The owning thread has to be the one that unlocks
    _not_send: PhantomData<*const ()>,
}

impl<'a> MutexGuard<'a> {
    const fn new(mutex: &'a Mutex) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    /// The mutex this guard holds
    #[must_use]
    pub const fn mutex(&self) -> &'a Mutex {
        self.mutex
    }

    /// Unlocks the mutex, reporting any failure
    ///
    /// # Errors
    /// Returns an error, already logged, if the native unlock fails
    pub fn unlock(self) -> Result<()> {
        let mutex = self.mutex;
        core::mem::forget(self);
        mutex.raw.unlock()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        // Already logged
        let _ = self.mutex.raw.unlock();
    }
}

impl core::fmt::Debug for MutexGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MutexGuard").finish_non_exhaustive()
    }
}

/// A condition variable, used together with one [`Mutex`] for its whole lifetime.
///
/// Keeping the pairing is up to the caller. [`Condvar::signal`] wakes at most one waiter and there is no broadcast.
///
/// When [`Condvar::MULTIPLE_WAITERS`] is `false` (windows, where this is emulated with a single auto-reset event),
/// at most one thread may wait on an instance at a time: a second concurrent waiter gets
/// [`Error::ConsistencyViolation`](crate::Error::ConsistencyViolation).
/// On every host, a signal sent while nothing waits may be lost, and waits may wake spuriously,
/// so waiters should recheck their condition, as [`Condvar::wait_while`] does.
pub struct Condvar {
    raw: sys::RawCondvar,
}

impl Condvar {
    /// Whether more than one thread may block in [`Condvar::wait`] on the same instance
    pub const MULTIPLE_WAITERS: bool = sys::MULTIPLE_WAITERS;

    /// Creates and initializes a new condition variable
    ///
    /// # Errors
    /// Returns [`Error::Resource`](crate::Error::Resource) if the host cannot provide another condition variable
    pub fn new() -> Result<Self> {
        sys::RawCondvar::new().map(|raw| Self { raw })
    }

    /// Releases the mutex held by `guard`, blocks until signaled, and reacquires the mutex before returning.
    ///
    /// # Errors
    /// Returns an error, already logged, if the native wait fails.
    /// The mutex is held by `guard` again when this returns, whether or not it failed.
    pub fn wait(&self, guard: &mut MutexGuard<'_>) -> Result<()> {
        self.raw.wait(&guard.mutex.raw)
    }

    /// Waits for as long as `condition` returns `true`, checking it with the mutex held before each wait.
    ///
    /// # Errors
    /// Returns the first error from [`Condvar::wait`]
    pub fn wait_while<F: FnMut() -> bool>(
        &self,
        guard: &mut MutexGuard<'_>,
        mut condition: F,
    ) -> Result<()> {
        while condition() {
            self.wait(guard)?;
        }
        Ok(())
    }

    /// Wakes at most one thread blocked in [`Condvar::wait`]
    ///
    /// # Errors
    /// Returns an error, already logged, if the native signal fails
    pub fn signal(&self) -> Result<()> {
        self.raw.signal()
    }
}

impl core::fmt::Debug for Condvar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Condvar")
            .field("multiple_waiters", &Self::MULTIPLE_WAITERS)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use core::cell::UnsafeCell;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use super::{Condvar, Mutex};
    use crate::test_util::init_test_logging;

    struct Counter {
        mutex: Mutex,
        done: Condvar,
        count: UnsafeCell<usize>,
        finished: UnsafeCell<usize>,
    }

    // SAFETY: `count` and `finished` are only accessed with `mutex` held
    unsafe impl Sync for Counter {}

    fn count_with_threads(threads: usize) -> usize {
        let counter = Arc::new(Counter {
            mutex: Mutex::new().unwrap(),
            done: Condvar::new().unwrap(),
            count: UnsafeCell::new(0),
            finished: UnsafeCell::new(0),
        });
        for _ in 0..threads {
            let counter = Arc::clone(&counter);
            crate::thread::spawn(move || {
                for _ in 0..1000 {
                    let guard = counter.mutex.lock().unwrap();
                    unsafe { *counter.count.get() += 1 };
                    guard.unlock().unwrap();
                }
                let _guard = counter.mutex.lock().unwrap();
                unsafe { *counter.finished.get() += 1 };
                counter.done.signal().unwrap();
            })
            .unwrap();
        }
        let mut guard = counter.mutex.lock().unwrap();
        counter
            .done
            .wait_while(&mut guard, || unsafe { *counter.finished.get() } < threads)
            .unwrap();
        unsafe { *counter.count.get() }
    }

    #[test]
    fn test_mutex_counter_1() {
        init_test_logging();
        assert_eq!(count_with_threads(1), 1000);
    }

    #[test]
    fn test_mutex_counter_2() {
        assert_eq!(count_with_threads(2), 2000);
    }

    #[test]
    fn test_mutex_counter_10() {
        assert_eq!(count_with_threads(10), 10_000);
    }

    #[test]
    fn test_mutex_counter_100() {
        assert_eq!(count_with_threads(100), 100_000);
    }

    #[test]
    fn test_try_lock_contended() {
        let mutex = Mutex::new().unwrap();
        let guard = mutex.lock().unwrap();
        let acquired = std::thread::scope(|s| {
            s.spawn(|| mutex.try_lock().unwrap().is_some()).join().unwrap()
        });
        assert!(!acquired);
        drop(guard);
        assert!(mutex.try_lock().unwrap().is_some());
    }

    #[test]
    #[cfg(unix)]
    fn test_relock_is_consistency_violation() {
        init_test_logging();
        let mutex = Mutex::new().unwrap();
        let _guard = mutex.lock().unwrap();
        let err = mutex.lock().unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_signal_wakes_waiter() {
        init_test_logging();
        struct Shared {
            mutex: Mutex,
            cond: Condvar,
            waiting: AtomicBool,
            ready: AtomicBool,
            waits: AtomicUsize,
        }
        let shared = Arc::new(Shared {
            mutex: Mutex::new().unwrap(),
            cond: Condvar::new().unwrap(),
            waiting: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            waits: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::channel();
        let waiter = Arc::clone(&shared);
        std::thread::spawn(move || {
            let mut guard = waiter.mutex.lock().unwrap();
            waiter.waiting.store(true, Ordering::Release);
            while !waiter.ready.load(Ordering::Acquire) {
                waiter.waits.fetch_add(1, Ordering::Relaxed);
                waiter.cond.wait(&mut guard).unwrap();
            }
            // The mutex must be held again: nobody else can take it now
            let held = std::thread::scope(|s| {
                s.spawn(|| waiter.mutex.try_lock().unwrap().is_none())
                    .join()
                    .unwrap()
            });
            drop(guard);
            tx.send(held).unwrap();
        });

        while !shared.waiting.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
        {
            // The waiter holds the mutex from setting `waiting` until it is inside `wait`
            let guard = shared.mutex.lock().unwrap();
            shared.ready.store(true, Ordering::Release);
            shared.cond.signal().unwrap();
            guard.unlock().unwrap();
        }

        let held = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(held);
        assert!(shared.waits.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_signal_without_waiter() {
        let cond = Condvar::new().unwrap();
        cond.signal().unwrap();
    }

    #[test]
    #[cfg(windows)]
    fn test_second_waiter_rejected() {
        init_test_logging();
        assert!(!Condvar::MULTIPLE_WAITERS);
        struct Shared {
            mutex: Mutex,
            cond: Condvar,
            waiting: AtomicBool,
            ready: AtomicBool,
        }
        let shared = Arc::new(Shared {
            mutex: Mutex::new().unwrap(),
            cond: Condvar::new().unwrap(),
            waiting: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::channel();
        let waiter = Arc::clone(&shared);
        std::thread::spawn(move || {
            let mut guard = waiter.mutex.lock().unwrap();
            waiter.waiting.store(true, Ordering::Relaxed);
            let res = waiter
                .cond
                .wait_while(&mut guard, || !waiter.ready.load(Ordering::Relaxed));
            drop(guard);
            tx.send(res.is_ok()).unwrap();
        });

        while !shared.waiting.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(1));
        }
        // The first waiter only releases the mutex after registering itself as the waiter
        let mut guard = shared.mutex.lock().unwrap();
        let err = shared.cond.wait(&mut guard).unwrap_err();
        assert!(!err.is_recoverable());
        shared.ready.store(true, Ordering::Relaxed);
        shared.cond.signal().unwrap();
        drop(guard);

        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
    }
}
