use std::ffi::{c_void, OsStr};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

cfg_match::cfg_match! {
    unix => {
        mod dlcfn;
        use dlcfn as sys;
    }
    windows => {
        mod libloaderapi;
        use libloaderapi as sys;
    }
}

mod last_error;

pub use last_error::{last_error, take_last_error};

bitflags::bitflags! {
    /// Options for [`Handle::open_with`].
    ///
    /// The empty set binds every symbol at load time and keeps the module's symbols private to it.
    /// Flags the host loader has no equivalent for are ignored.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Defer binding of function references until they are first called
        const LAZY = 0x01;
        /// Make the module's symbols available to modules loaded later
        const GLOBAL = 0x02;
        /// Never unload the module, even once closed
        const NODELETE = 0x04;
        /// Only succeed if the module is already loaded
        const NOLOAD = 0x08;
    }
}

///
/// An unsafe helper trait used by [`Handle::function_sym`]
///
/// # Safety
/// [`Self`] must be a fn pointer type.
/// Implementing this trait in downstream code is not supported.
pub unsafe trait FnPtr: Copy {
    /// Converts a raw symbol address into a function pointer, or `None` if `p` is null
    ///
    /// # Safety
    /// This can produce a safe function pointer.
    /// The function must be callable within the lifetime of the owning module, must match the ABI of the symbol,
    /// and, if safe, must have defined behaviour for all statically valid inputs
    unsafe fn from_raw_ptr(p: *mut c_void) -> Option<Self>;

    /// The address of the function
    fn addr(self) -> *const c_void;
}

macro_rules! impl_fn_ptr {
    ($abi:tt; $(($($id:ident),*)),*) => {
        $(
            unsafe impl<R, $($id),*> FnPtr for extern $abi fn($($id),*) -> R {
                unsafe fn from_raw_ptr(p: *mut c_void) -> Option<Self> {
                    core::mem::transmute::<*mut c_void, Option<Self>>(p)
                }

                fn addr(self) -> *const c_void {
                    self as *const c_void
                }
            }

            unsafe impl<R, $($id),*> FnPtr for unsafe extern $abi fn($($id),*) -> R {
                unsafe fn from_raw_ptr(p: *mut c_void) -> Option<Self> {
                    core::mem::transmute::<*mut c_void, Option<Self>>(p)
                }

                fn addr(self) -> *const c_void {
                    self as *const c_void
                }
            }
        )*
    };
}

macro_rules! impl_fn_ptrs_for_abis {
    ($($abi:tt),*) => {
        $(
            impl_fn_ptr! {
                $abi;
                (),
                (A),
                (A, B),
                (A, B, C),
                (A, B, C, D),
                (A, B, C, D, E),
                (A, B, C, D, E, F)
            }
        )*
    };
}

#[cfg(windows)]
impl_fn_ptrs_for_abis!("C", "C-unwind", "system");

#[cfg(not(windows))]
impl_fn_ptrs_for_abis!("C", "C-unwind");

/// A type that models a handle to a dynamically loaded library.
///
/// A handle is owned by whoever opened it. Closing it, with [`Handle::close`] or by dropping it, unloads the module
/// and leaves every pointer resolved from it dangling.
pub struct Handle {
    raw: sys::RawHandle,
    path: PathBuf,
}

impl Handle {
    /// Obtains a Handle to a file with a given name. This may be an absolute or relative path, or a full library file name (in which case, it is searched for in a platform specific manner).
    ///
    /// Equivalent to [`Handle::open_with`] with [`OpenFlags::empty()`].
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the module cannot be found or fails to initialize.
    /// The description is also recorded for [`last_error`].
    pub fn open<S: AsRef<OsStr> + ?Sized>(s: &S) -> Result<Self> {
        Self::open_with(s, OpenFlags::empty())
    }

    /// Obtains a Handle to a file with a given name, using `flags` to control how the module is bound.
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the module cannot be found or fails to initialize.
    /// The description is also recorded for [`last_error`].
    pub fn open_with<S: AsRef<OsStr> + ?Sized>(s: &S, flags: OpenFlags) -> Result<Self> {
        let path = PathBuf::from(s.as_ref());
        match sys::RawHandle::open(s.as_ref(), flags) {
            Ok(raw) => {
                tracing::debug!(path = %path.display(), ?flags, "opened module");
                Ok(Self { raw, path })
            }
            Err(message) => {
                last_error::record(&message);
                Err(Error::Load {
                    path: path.display().to_string(),
                    message,
                }
                .logged())
            }
        }
    }

    /// Obtains a Handle to the host program itself.
    ///
    /// Closing this handle never unloads anything, so functions and references obtained from it remain valid.
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the current program cannot be accessed.
    pub fn open_self() -> Result<Self> {
        match sys::RawHandle::open_self() {
            Ok(raw) => Ok(Self {
                raw,
                path: PathBuf::new(),
            }),
            Err(message) => {
                last_error::record(&message);
                Err(Error::Load {
                    path: String::from("<self>"),
                    message,
                }
                .logged())
            }
        }
    }

    /// The path or name this handle was opened with. Empty for [`Handle::open_self`]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Given the name of a symbol, returns its address if the module exports it, or `None` otherwise.
    ///
    /// A missing symbol is not a failure: it is not logged as an error and does not change [`last_error`].
    #[must_use]
    pub fn raw_sym<S: AsRef<OsStr> + ?Sized>(&self, s: &S) -> Option<*mut c_void> {
        let name = s.as_ref();
        let p = self.raw.get_sym_raw(name);
        if p.is_null() {
            tracing::debug!(path = %self.path.display(), symbol = ?name, "symbol not found");
            None
        } else {
            tracing::trace!(path = %self.path.display(), symbol = ?name, addr = ?p, "resolved symbol");
            Some(p)
        }
    }

    /// Given the name of a symbol, returns a reference to the data of that symbol if it exists, or None otherwise
    ///
    /// # Safety
    ///
    /// This function statically bounds the lifetime of the returned reference to avoid dangling references.
    /// However, care must still be taken to avoid undefined behaviour.
    /// * The type of the data must be at least the same size as and compatible with `T` (in particular, the memory at the symbol must not produce an invalid value of `T`)
    /// * The symbol must not be mutated for the lifetime of `T` in any code
    pub unsafe fn data_sym<T, S: AsRef<OsStr> + ?Sized>(&self, s: &S) -> Option<&T> {
        self.raw_sym(s).and_then(|p| p.cast::<T>().as_ref())
    }

    /// Given the name of a symbol, returns a function pointer to that symbol if it exists, or None otherwise
    ///
    /// # Safety
    ///
    /// This function does *not* statically bound the lifetime of the function (as rust has no native mechanism for that).
    /// Thus, the caller is responsible for ensuring that the returned pointer (which may be a safe function pointer) is not called after closing the Handle.
    ///
    /// In addition to lifetime concerns, the following restrictions are placed on the symbol, and apply when calling the function pointer:
    /// * The symbol must reside in executable memory and that memory may not be modified by any code after obtaining fn pointer,
    /// * The symbol must have the ABI given by `F`, including its parameters and ABI tag, and
    /// * The function must be called with arguments that produce valid values of the corresponding parameter types, and the return value must be a valid value of the return type
    ///
    /// Calls into modules that are not fully trusted should go through [`crate::fault`].
    ///
    /// # Notes
    /// Due to limitations of the rust type system, this may only be called with (safe or unsafe) function pointer types with up to 6 parameters, and that use the `extern "C"`,
    /// `extern "C-unwind"`, or (on windows) `extern "system"` ABIs.
    pub unsafe fn function_sym<F: FnPtr, S: AsRef<OsStr> + ?Sized>(&self, s: &S) -> Option<F> {
        self.raw_sym(s).and_then(|p| F::from_raw_ptr(p))
    }

    /// Closes the handle, unloading the module if this was its last reference.
    ///
    /// Every pointer obtained from this handle is dangling after this call, even if it fails.
    ///
    /// # Errors
    /// Returns [`Error::Close`] if the host loader reports a failure. The description is also recorded for [`last_error`].
    pub fn close(mut self) -> Result<()> {
        self.close_raw()
    }

    fn close_raw(&mut self) -> Result<()> {
        match self.raw.close() {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "closed module");
                Ok(())
            }
            Err(message) => {
                last_error::record(&message);
                Err(Error::Close {
                    path: self.path.display().to_string(),
                    message,
                }
                .logged())
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.raw.is_open() {
            let _ = self.close_raw();
        }
    }
}

impl core::fmt::Debug for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Addresses below this are never the entry of a function in a loaded module
const LOWEST_VALID_ADDRESS: usize = 0x1_0000;

/// A cheap check that `p` could be the address of code, before trusting it as callable.
///
/// Rejects null and addresses in the first 64KiB, then asks the host whether the address lies inside a loaded module
/// (on unix) or inside committed, executable memory (on windows).
///
/// This is a filter for obviously bogus addresses, not a guarantee that calling `p` is sound.
#[must_use]
pub fn looks_valid(p: *const c_void) -> bool {
    if (p as usize) < LOWEST_VALID_ADDRESS {
        return false;
    }
    sys::looks_valid(p)
}

/// Returns the path of the loaded module that contains the address `p`, if any.
#[must_use]
pub fn module_path(p: *const c_void) -> Option<PathBuf> {
    if p.is_null() {
        return None;
    }
    sys::module_path(p)
}
