use std::ffi::c_void;

use super::{Fault, FaultKind};

pub const CONTAINED: bool = true;

const EXCEPTION_ACCESS_VIOLATION: u32 = 0xC000_0005;
const EXCEPTION_IN_PAGE_ERROR: u32 = 0xC000_0006;
const EXCEPTION_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
const EXCEPTION_PRIV_INSTRUCTION: u32 = 0xC000_0096;
const EXCEPTION_DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
const EXCEPTION_INT_DIVIDE_BY_ZERO: u32 = 0xC000_0094;

#[repr(C)]
struct FaultRecord {
    code: u32,
    address: *mut c_void,
}

extern "C" {
    fn osdep_guarded_call(
        f: unsafe extern "C" fn(*mut c_void),
        data: *mut c_void,
        out: *mut FaultRecord,
    ) -> i32;
}

const fn kind_of(code: u32) -> FaultKind {
    match code {
        EXCEPTION_ACCESS_VIOLATION | EXCEPTION_IN_PAGE_ERROR => FaultKind::AccessViolation,
        EXCEPTION_DATATYPE_MISALIGNMENT => FaultKind::BusError,
        EXCEPTION_ILLEGAL_INSTRUCTION | EXCEPTION_PRIV_INSTRUCTION => {
            FaultKind::IllegalInstruction
        }
        EXCEPTION_INT_DIVIDE_BY_ZERO => FaultKind::Arithmetic,
        other => FaultKind::Other(other),
    }
}

// The `__except` frame in the helper is the whole boundary: it is armed while `osdep_guarded_call` is on the stack
pub unsafe fn guarded(f: unsafe extern "C" fn(*mut c_void), data: *mut c_void) -> Option<Fault> {
    let mut record = FaultRecord {
        code: 0,
        address: core::ptr::null_mut(),
    };
    if osdep_guarded_call(f, data, &mut record) != 0 {
        return None;
    }
    Some(Fault {
        kind: kind_of(record.code),
        address: Some(record.address as usize).filter(|&addr| addr != 0),
    })
}

#[cfg(test)]
mod test {
    use super::kind_of;
    use crate::fault::FaultKind;

    #[test]
    fn test_exception_codes() {
        assert_eq!(kind_of(0xC000_0005), FaultKind::AccessViolation);
        assert_eq!(kind_of(0xC000_001D), FaultKind::IllegalInstruction);
        assert_eq!(kind_of(0xC000_0094), FaultKind::Arithmetic);
        assert_eq!(kind_of(0xC000_00FD), FaultKind::Other(0xC000_00FD));
    }
}
