use std::io;

use windows_sys::Win32::Foundation::EXCEPTION_IN_PAGE_ERROR;
use windows_sys::Win32::System::Diagnostics::Debug::{AddVectoredExceptionHandler, EXCEPTION_POINTERS};

use super::claim_fault;

const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;
const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

pub unsafe fn install_handler() -> io::Result<()> {
    if AddVectoredExceptionHandler(1, Some(exception_handler)).is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

unsafe extern "system" fn exception_handler(pointers: *mut EXCEPTION_POINTERS) -> i32 {
    let record = (*pointers).ExceptionRecord;
    let context = (*pointers).ContextRecord;

    let code = (*record).ExceptionCode;
    if code != EXCEPTION_IN_PAGE_ERROR {
        return EXCEPTION_CONTINUE_SEARCH;
    }

    match claim_fault((*context).Rip as usize) {
        Some(landing_pad) => {
            (*context).Rax = code as u32 as u64;
            (*context).Rip = landing_pad as u64;
            EXCEPTION_CONTINUE_EXECUTION
        }
        None => EXCEPTION_CONTINUE_SEARCH,
    }
}
