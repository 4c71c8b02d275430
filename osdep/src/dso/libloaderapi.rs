use std::{
    ffi::{c_void, CString, OsStr, OsString},
    os::{
        raw::c_char,
        windows::ffi::{OsStrExt, OsStringExt},
    },
    path::PathBuf,
};

use super::OpenFlags;

#[allow(non_snake_case)]
#[link(name = "kernel32")]
extern "system" {
    fn LoadLibraryW(lpLibFileName: *const u16) -> *mut c_void; // (LPCWSTR) -> HMODULE
    fn FreeLibrary(hLibModule: *mut c_void) -> i32; // (HMODULE) -> BOOL
    fn GetProcAddress(hLibModule: *mut c_void, lpProcName: *const c_char) -> *mut c_void; // (HMODULE, LPCSTR) -> FARPROC
    fn GetModuleHandleExW(dwFlags: u32, lpModuleName: *const u16, phModule: *mut *mut c_void) -> i32; // (DWORD, LPCWSTR, HMODULE*) -> BOOL
    fn GetModuleFileNameW(hModule: *mut c_void, lpFilename: *mut u16, nSize: u32) -> u32; // (HMODULE, LPWSTR, DWORD) -> DWORD
    fn VirtualQuery(
        lpAddress: *const c_void,
        lpBuffer: *mut MemoryBasicInformation,
        dwLength: usize,
    ) -> usize; // (LPCVOID, PMEMORY_BASIC_INFORMATION, SIZE_T) -> SIZE_T
}

const GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT: u32 = 0x2;
const GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS: u32 = 0x4;

const MAX_LONG_PATH: usize = 32_768;

const MEM_COMMIT: u32 = 0x1000;
const PAGE_GUARD: u32 = 0x100;
const PAGE_EXECUTE_ANY: u32 = 0x10 | 0x20 | 0x40 | 0x80;

#[repr(C)]
#[allow(dead_code)]
struct MemoryBasicInformation {
    base_address: *mut c_void,
    allocation_base: *mut c_void,
    allocation_protect: u32,
    #[cfg(target_pointer_width = "64")]
    partition_id: u16,
    region_size: usize,
    state: u32,
    protect: u32,
    kind: u32,
}

pub struct RawHandle {
    hdl: *mut c_void,
    // Handles from `GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT` hold no reference to release
    owned: bool,
}

// SAFETY: an HMODULE is a process-wide reference, usable from any thread
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

fn last_error_message() -> String {
    std::io::Error::last_os_error().to_string()
}

fn wide(s: &OsStr) -> Vec<u16> {
    let mut buf = OsStrExt::encode_wide(s).collect::<Vec<_>>();
    buf.push(0);
    buf
}

impl RawHandle {
    pub fn open(s: &OsStr, flags: OpenFlags) -> Result<Self, String> {
        let ignored = flags - OpenFlags::NOLOAD;
        if !ignored.is_empty() {
            tracing::debug!(?ignored, "loader flags have no win32 equivalent");
        }
        let name = wide(s);
        if name[..name.len() - 1].contains(&0) {
            return Err(String::from("module path contains an interior nul character"));
        }
        let hdl = if flags.contains(OpenFlags::NOLOAD) {
            // Takes a reference, released by `FreeLibrary` like `LoadLibraryW`'s
            let mut hdl = core::ptr::null_mut();
            if unsafe { GetModuleHandleExW(0, name.as_ptr(), &mut hdl) } == 0 {
                return Err(last_error_message());
            }
            hdl
        } else {
            unsafe { LoadLibraryW(name.as_ptr()) }
        };
        if hdl.is_null() {
            Err(last_error_message())
        } else {
            Ok(Self { hdl, owned: true })
        }
    }

    pub fn open_self() -> Result<Self, String> {
        let mut hdl = core::ptr::null_mut();
        if unsafe {
            GetModuleHandleExW(
                GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
                core::ptr::null(),
                &mut hdl,
            )
        } == 0
        {
            Err(last_error_message())
        } else {
            Ok(Self { hdl, owned: false })
        }
    }

    pub const fn is_open(&self) -> bool {
        !self.hdl.is_null()
    }

    pub fn get_sym_raw(&self, s: &OsStr) -> *mut c_void {
        // Export names are narrow strings; anything else can't name an export
        let Some(cstr) = s.to_str().and_then(|s| CString::new(s).ok()) else {
            return core::ptr::null_mut();
        };
        unsafe { GetProcAddress(self.hdl, cstr.as_ptr()) }
    }

    pub fn close(&mut self) -> Result<(), String> {
        let hdl = core::mem::replace(&mut self.hdl, core::ptr::null_mut());
        // FreeLibrary returns nonzero on success
        if hdl.is_null() || !self.owned || unsafe { FreeLibrary(hdl) } != 0 {
            Ok(())
        } else {
            Err(last_error_message())
        }
    }
}

pub fn looks_valid(p: *const c_void) -> bool {
    let mut info = core::mem::MaybeUninit::<MemoryBasicInformation>::zeroed();
    let len = unsafe {
        VirtualQuery(
            p,
            info.as_mut_ptr(),
            core::mem::size_of::<MemoryBasicInformation>(),
        )
    };
    if len == 0 {
        return false;
    }
    let info = unsafe { info.assume_init() };
    info.state == MEM_COMMIT
        && (info.protect & PAGE_GUARD) == 0
        && (info.protect & PAGE_EXECUTE_ANY) != 0
}

pub fn module_path(p: *const c_void) -> Option<PathBuf> {
    let mut hdl = core::ptr::null_mut();
    if unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            p.cast::<u16>(),
            &mut hdl,
        )
    } == 0
    {
        return None;
    }
    let mut buf = vec![0u16; 260];
    loop {
        let len = unsafe { GetModuleFileNameW(hdl, buf.as_mut_ptr(), buf.len() as u32) } as usize;
        if len == 0 {
            return None;
        } else if len < buf.len() {
            buf.truncate(len);
            return Some(PathBuf::from(OsString::from_wide(&buf)));
        }
        // Truncated, try again with more room
        let grown = buf.len() * 2;
        if grown > MAX_LONG_PATH {
            return None;
        }
        buf.resize(grown, 0);
    }
}
