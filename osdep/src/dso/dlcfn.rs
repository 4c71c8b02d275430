use std::{
    ffi::{c_void, CStr, CString, OsStr},
    os::unix::ffi::OsStrExt,
    path::PathBuf,
};

use libc::c_int;

use super::OpenFlags;

pub struct RawHandle {
    hdl: *mut c_void,
}

// SAFETY: a dlopen handle is a process-wide reference, usable from any thread
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

fn dlerror_message() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        String::from("unknown dynamic loader error")
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

fn mode(flags: OpenFlags) -> c_int {
    let mut mode = if flags.contains(OpenFlags::LAZY) {
        libc::RTLD_LAZY
    } else {
        libc::RTLD_NOW
    };
    mode |= if flags.contains(OpenFlags::GLOBAL) {
        libc::RTLD_GLOBAL
    } else {
        libc::RTLD_LOCAL
    };
    if flags.contains(OpenFlags::NODELETE) {
        mode |= libc::RTLD_NODELETE;
    }
    if flags.contains(OpenFlags::NOLOAD) {
        mode |= libc::RTLD_NOLOAD;
    }
    mode
}

impl RawHandle {
    pub fn open(s: &OsStr, flags: OpenFlags) -> Result<Self, String> {
        let cstr = CString::new(s.as_bytes())
            .map_err(|_| String::from("module path contains an interior nul byte"))?;
        let hdl = unsafe { libc::dlopen(cstr.as_ptr(), mode(flags)) };
        if hdl.is_null() {
            Err(dlerror_message())
        } else {
            Ok(Self { hdl })
        }
    }

    pub fn open_self() -> Result<Self, String> {
        let hdl = unsafe { libc::dlopen(core::ptr::null(), libc::RTLD_NOW) };
        if hdl.is_null() {
            Err(dlerror_message())
        } else {
            Ok(Self { hdl })
        }
    }

    pub const fn is_open(&self) -> bool {
        !self.hdl.is_null()
    }

    pub fn get_sym_raw(&self, s: &OsStr) -> *mut c_void {
        // An interior nul can't name any export
        let Ok(cstr) = CString::new(s.as_bytes()) else {
            return core::ptr::null_mut();
        };
        unsafe { libc::dlsym(self.hdl, cstr.as_ptr()) }
    }

    pub fn close(&mut self) -> Result<(), String> {
        let hdl = core::mem::replace(&mut self.hdl, core::ptr::null_mut());
        if hdl.is_null() || unsafe { libc::dlclose(hdl) } == 0 {
            Ok(())
        } else {
            Err(dlerror_message())
        }
    }
}

fn dladdr(p: *const c_void) -> Option<libc::Dl_info> {
    let mut info = core::mem::MaybeUninit::<libc::Dl_info>::zeroed();
    if unsafe { libc::dladdr(p, info.as_mut_ptr()) } == 0 {
        None
    } else {
        Some(unsafe { info.assume_init() })
    }
}

pub fn looks_valid(p: *const c_void) -> bool {
    dladdr(p).is_some()
}

pub fn module_path(p: *const c_void) -> Option<PathBuf> {
    let info = dladdr(p)?;
    if info.dli_fname.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    Some(PathBuf::from(OsStr::from_bytes(name.to_bytes())))
}
