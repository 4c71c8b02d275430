use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};
use std::ffi::c_void;
use std::sync::Once;

use libc::{c_int, siginfo_t};

use super::{Fault, FaultKind};

pub const CONTAINED: bool = true;

extern "C" {
    fn osdep_guarded_call(
        landing: *mut *mut c_void,
        f: unsafe extern "C" fn(*mut c_void),
        data: *mut c_void,
    ) -> c_int;
    fn osdep_land(landing: *mut c_void) -> !;
}

const SIGNALS: [c_int; 4] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE];

thread_local! {
    // The jump buffer of the innermost guarded call on this thread, or null outside of one
    static LANDING: Cell<*mut c_void> = const { Cell::new(core::ptr::null_mut()) };
    static FAULT: Cell<Option<Fault>> = const { Cell::new(None) };
}

// Dispositions that were installed before ours, for faults outside of any guarded call.
// Each slot is written once, before our handler is installed for that signal, and only read afterwards.
struct PreviousHandlers {
    actions: UnsafeCell<[MaybeUninit<libc::sigaction>; SIGNALS.len()]>,
    saved: [AtomicBool; SIGNALS.len()],
}

unsafe impl Sync for PreviousHandlers {}

#[allow(clippy::declare_interior_mutable_const)]
const UNSAVED: AtomicBool = AtomicBool::new(false);

static PREVIOUS: PreviousHandlers = PreviousHandlers {
    actions: UnsafeCell::new([MaybeUninit::uninit(); SIGNALS.len()]),
    saved: [UNSAVED; SIGNALS.len()],
};

static INSTALL: Once = Once::new();

fn install_handlers() {
    INSTALL.call_once(|| unsafe {
        for (index, &signum) in SIGNALS.iter().enumerate() {
            let slot = (*PREVIOUS.actions.get())[index].as_mut_ptr();
            if libc::sigaction(signum, core::ptr::null(), slot) != 0 {
                tracing::error!(signum, error = %std::io::Error::last_os_error(), "failed to query signal disposition");
                continue;
            }
            PREVIOUS.saved[index].store(true, Ordering::Release);

            let mut action: libc::sigaction = core::mem::zeroed();
            action.sa_sigaction = handle_fault as *const () as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signum, &action, core::ptr::null_mut()) != 0 {
                tracing::error!(signum, error = %std::io::Error::last_os_error(), "failed to install fault handler");
            }
        }
        tracing::debug!(signals = ?SIGNALS, "installed fault handlers");
    });
}

const fn kind_of(signum: c_int) -> FaultKind {
    match signum {
        libc::SIGSEGV => FaultKind::AccessViolation,
        libc::SIGBUS => FaultKind::BusError,
        libc::SIGILL => FaultKind::IllegalInstruction,
        libc::SIGFPE => FaultKind::Arithmetic,
        #[allow(clippy::cast_sign_loss)]
        other => FaultKind::Other(other as u32),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn si_addr(info: &siginfo_t) -> *mut c_void {
    info.si_addr()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn si_addr(info: &siginfo_t) -> *mut c_void {
    info.si_addr
}

// Only async-signal-safe work in here: no allocation, no locks, no logging
unsafe extern "C" fn handle_fault(signum: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let landing = LANDING
        .try_with(Cell::get)
        .unwrap_or(core::ptr::null_mut());
    if landing.is_null() {
        forward(signum, info, context);
        return;
    }

    let address = info
        .as_ref()
        .map(|info| si_addr(info) as usize)
        .filter(|&addr| addr != 0);
    let _ = FAULT.try_with(|slot| {
        slot.set(Some(Fault {
            kind: kind_of(signum),
            address,
        }));
    });
    // Disarmed until the guarded call's boundary restores the outer landing site
    let _ = LANDING.try_with(|slot| slot.set(core::ptr::null_mut()));
    osdep_land(landing);
}

// Kernel-generated fault codes are positive; codes from `kill`, `raise` and `sigqueue` are not
#[cfg(any(target_os = "linux", target_os = "android"))]
const fn is_user_code(code: c_int) -> bool {
    code <= 0
}

// The BSDs number `SI_USER` and its siblings from 0x10001
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const fn is_user_code(code: c_int) -> bool {
    code <= 0 || code > 0x10000
}

unsafe fn sent_by_process(info: *const siginfo_t) -> bool {
    info.as_ref().map_or(true, |info| is_user_code(info.si_code))
}

unsafe fn set_default(signum: c_int) {
    let mut default: libc::sigaction = core::mem::zeroed();
    default.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut default.sa_mask);
    libc::sigaction(signum, &default, core::ptr::null_mut());
}

unsafe fn forward(signum: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let Some(index) = SIGNALS.iter().position(|&s| s == signum) else {
        return;
    };
    let previous = if PREVIOUS.saved[index].load(Ordering::Acquire) {
        (*PREVIOUS.actions.get())[index].assume_init()
    } else {
        core::mem::zeroed()
    };

    match previous.sa_sigaction {
        libc::SIG_IGN if sent_by_process(info) => {}
        libc::SIG_DFL if sent_by_process(info) => {
            // Still blocked in here, so it is delivered under the default action once this returns
            set_default(signum);
            libc::raise(signum);
        }
        libc::SIG_DFL | libc::SIG_IGN => {
            // A real fault cannot be ignored; returning re-executes the faulting instruction under the default action
            set_default(signum);
        }
        handler if previous.sa_flags & libc::SA_SIGINFO != 0 => {
            let handler = core::mem::transmute::<
                libc::sighandler_t,
                unsafe extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
            >(handler);
            handler(signum, info, context);
        }
        handler => {
            let handler =
                core::mem::transmute::<libc::sighandler_t, unsafe extern "C" fn(c_int)>(handler);
            handler(signum);
        }
    }
}

// Restores the enclosing call's landing site when the guarded call ends, however it ends
struct Boundary {
    outer: *mut c_void,
}

impl Boundary {
    fn arm() -> Self {
        install_handlers();
        FAULT.with(|slot| slot.set(None));
        Self {
            outer: LANDING.with(Cell::get),
        }
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        LANDING.with(|slot| slot.set(self.outer));
    }
}

pub unsafe fn guarded(f: unsafe extern "C" fn(*mut c_void), data: *mut c_void) -> Option<Fault> {
    let boundary = Boundary::arm();
    let returned = osdep_guarded_call(LANDING.with(Cell::as_ptr), f, data) != 0;
    drop(boundary);
    let fault = FAULT.with(Cell::take);
    if returned {
        None
    } else {
        Some(fault.unwrap_or(Fault {
            kind: FaultKind::Other(0),
            address: None,
        }))
    }
}

#[cfg(test)]
mod test {
    use core::cell::Cell;
    use std::ffi::c_void;

    use super::{guarded, LANDING};

    unsafe extern "C" fn noop(_: *mut c_void) {}

    unsafe extern "C" fn nested(data: *mut c_void) {
        let seen = &mut *data.cast::<[*mut c_void; 2]>();
        seen[0] = LANDING.with(Cell::get);
        let _ = guarded(noop, core::ptr::null_mut());
        seen[1] = LANDING.with(Cell::get);
    }

    #[test]
    fn test_landing_cleared_after_return() {
        assert!(unsafe { guarded(noop, core::ptr::null_mut()) }.is_none());
        assert!(LANDING.with(Cell::get).is_null());
    }

    #[test]
    fn test_nested_return_restores_outer_landing() {
        let mut seen = [core::ptr::null_mut::<c_void>(); 2];
        let fault = unsafe { guarded(nested, core::ptr::addr_of_mut!(seen).cast()) };
        assert!(fault.is_none());
        assert!(!seen[0].is_null());
        assert_eq!(seen[0], seen[1]);
        assert!(LANDING.with(Cell::get).is_null());
    }
}
