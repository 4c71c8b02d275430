//! A call into a semi-trusted module can crash: dereference a bad pointer, execute garbage.
//! Calling it through this module turns such a synchronous fault into an ordinary [`Outcome::Faulted`]
//! instead of terminating the host.
//!
//! Each call goes `NotStarted -> Invoking -> {Completed, Faulted}`. The boundary is armed immediately before the call and
//! disarmed immediately after it, whatever the outcome, so a fault outside of a call is never caught.
//!
//! ## What a contained fault leaves behind
//!
//! Containment unwinds exactly the frames between the boundary and the faulting instruction, without running
//! destructors or cleanup in them. Nothing else is restored:
//! * side effects the callee already made stay made,
//! * memory the callee allocated, and locks it held, are leaked as they are (including locks inside the allocator or the C runtime),
//! * faults on other threads, asynchronous signals, and stack overflows are not contained.
//!
//! The host can keep running and keep making calls, but a module that faulted should be treated as broken.

use core::fmt;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{Error, Result};

cfg_match::cfg_match! {
    all(unix, osdep_fault_boundary) => {
        mod posix;
        use posix as sys;
    }
    all(windows, osdep_fault_boundary) => {
        mod seh;
        use seh as sys;
    }
    _ => {
        mod unguarded;
        use unguarded as sys;
    }
}

/// Whether calls on this host really run inside a fault boundary.
///
/// `false` on hosts without a boundary implementation (such as non-MSVC windows), where calls are made unguarded.
pub const CONTAINED: bool = sys::CONTAINED;

/// The kind of a contained fault
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Access to unmapped or protected memory (`SIGSEGV`, `EXCEPTION_ACCESS_VIOLATION`)
    AccessViolation,
    /// Misaligned or non-existent physical access (`SIGBUS`, `EXCEPTION_DATATYPE_MISALIGNMENT`)
    BusError,
    /// An undefined or privileged instruction (`SIGILL`, `EXCEPTION_ILLEGAL_INSTRUCTION`)
    IllegalInstruction,
    /// An arithmetic trap such as integer division by zero (`SIGFPE`, `EXCEPTION_INT_DIVIDE_BY_ZERO`)
    Arithmetic,
    /// Any other fault, with the host's signal number or exception code
    Other(u32),
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessViolation => f.write_str("access violation"),
            Self::BusError => f.write_str("bus error"),
            Self::IllegalInstruction => f.write_str("illegal instruction"),
            Self::Arithmetic => f.write_str("arithmetic fault"),
            Self::Other(code) => write!(f, "fault {code:#x}"),
        }
    }
}

/// A fault that occurred during a guarded call
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fault {
    /// What went wrong
    pub kind: FaultKind,
    /// The address involved: the inaccessible address for memory faults, the instruction otherwise, if known
    pub address: Option<usize>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "{} at {addr:#x}", self.kind),
            None => fmt::Display::fmt(&self.kind, f),
        }
    }
}

/// How a guarded call ended
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub enum Outcome {
    /// The callee returned normally
    Completed,
    /// The callee faulted, and the fault was contained
    Faulted(Fault),
}

impl Outcome {
    /// Whether the callee returned normally
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Converts a fault into [`Error::FaultContained`]
    ///
    /// # Errors
    /// Returns [`Error::FaultContained`] for [`Outcome::Faulted`]
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Faulted(fault) => Err(Error::FaultContained(fault)),
        }
    }
}

impl From<core::result::Result<(), Fault>> for Outcome {
    fn from(res: core::result::Result<(), Fault>) -> Self {
        match res {
            Ok(()) => Self::Completed,
            Err(fault) => Self::Faulted(fault),
        }
    }
}

/// Calls `f` inside a fault boundary
///
/// # Safety
/// `f` must be sound to call with no arguments, other than possibly faulting.
/// If it faults, the caller must not depend on any state `f` may have left inconsistent (see the [module docs](self)).
pub unsafe fn call(f: unsafe extern "C" fn()) -> Outcome {
    unsafe extern "C" fn nullary(data: *mut c_void) {
        let f = core::mem::transmute::<*mut c_void, unsafe extern "C" fn()>(data);
        f();
    }
    call_with(nullary, f as *mut c_void)
}

/// Calls `f(data)` inside a fault boundary
///
/// # Safety
/// `f` must be sound to call with `data`, other than possibly faulting.
/// If it faults, the caller must not depend on any state `f` may have left inconsistent (see the [module docs](self)).
pub unsafe fn call_with(f: unsafe extern "C" fn(*mut c_void), data: *mut c_void) -> Outcome {
    tracing::trace!(callee = ?(f as *const c_void), "invoking guarded call");
    match sys::guarded(f, data) {
        None => Outcome::Completed,
        Some(fault) => {
            let _ = Error::FaultContained(fault).logged();
            Outcome::Faulted(fault)
        }
    }
}

struct Invocation<F, R> {
    f: Option<F>,
    result: Option<std::thread::Result<R>>,
}

unsafe extern "C" fn run_invocation<F: FnOnce() -> R, R>(data: *mut c_void) {
    let invocation = &mut *data.cast::<Invocation<F, R>>();
    if let Some(f) = invocation.f.take() {
        invocation.result = Some(panic::catch_unwind(AssertUnwindSafe(f)));
    }
}

/// Runs `f` inside a fault boundary and returns its result, for entry points that take arguments or return values.
///
/// A panic in `f` is carried out of the boundary and resumed once it is disarmed.
///
/// A fault abandons every frame between the boundary and the faulting instruction without running anything in them.
/// Rust only permits that for frames with nothing left to drop, so `f` must capture only data without drop glue
/// (checked in debug builds), and nothing it runs may hold a value with drop glue on its stack at a point where it can fault.
/// Keep owned values outside of `f` and pass plain data or references in.
///
/// # Errors
/// Returns the [`Fault`] if `f` faulted
///
/// # Safety
/// Everything `f` calls must be sound to call, other than possibly faulting.
/// No frame `f` has live at the time of a fault may have a value still to be dropped. The capture check above only covers `f` itself.
/// If it faults, the caller must not depend on any state `f` may have left inconsistent (see the [module docs](self)).
pub unsafe fn invoke<R, F: FnOnce() -> R>(f: F) -> core::result::Result<R, Fault> {
    debug_assert!(
        !core::mem::needs_drop::<F>(),
        "closures passed to fault::invoke must not capture values that need dropping"
    );
    let mut invocation = Invocation {
        f: Some(f),
        result: None,
    };
    let outcome = call_with(
        run_invocation::<F, R>,
        core::ptr::addr_of_mut!(invocation).cast::<c_void>(),
    );
    match (outcome, invocation.result.take()) {
        (Outcome::Completed, Some(Ok(val))) => Ok(val),
        (Outcome::Completed, Some(Err(payload))) => panic::resume_unwind(payload),
        (Outcome::Faulted(fault), _) => Err(fault),
        (Outcome::Completed, None) => unreachable!("guarded call completed without running its closure"),
    }
}
