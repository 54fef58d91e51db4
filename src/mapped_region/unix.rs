use std::ffi::{c_void, CString};
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use libc;

use crate::err::{ErrCode, INVALID_ARGUMENT};

/// Close the descriptor on exit scope. The mapping outlives it.
struct Handle(i32);

impl Handle {
    fn open(name: &CString) -> Result<Handle, ErrCode> {
        match unsafe { libc::open(name.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) } {
            -1 => Err(ErrCode::last_error()),
            fd => Ok(Handle(fd)),
        }
    }

    fn size(&self) -> Result<u64, ErrCode> {
        unsafe {
            let mut st: libc::stat = mem::zeroed();
            match libc::fstat(self.0, &mut st) {
                -1 => Err(ErrCode::last_error()),
                _ => Ok(st.st_size as u64),
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe { libc::close(self.0); }
    }
}

/// Maps all of `path` read-only. Returns the base address and length.
pub fn map_file(path: &Path, shared: bool) -> io::Result<(*mut c_void, usize)> {
    let name = CString::new(path.as_os_str().as_bytes()).map_err(|_| io::Error::from(INVALID_ARGUMENT))?;
    let fd = Handle::open(&name)?;

    let size = usize::try_from(fd.size()?)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file does not fit in the address space"))?;
    if size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "cannot map an empty file"));
    }

    let flags = if shared { libc::MAP_SHARED } else { libc::MAP_PRIVATE };
    match unsafe { libc::mmap(ptr::null_mut(), size, libc::PROT_READ, flags, fd.0, 0) } {
        libc::MAP_FAILED => Err(ErrCode::last_error().into()),
        base => Ok((base, size)),
    }
}

pub unsafe fn unmap(base: *mut c_void, size: usize) -> io::Result<()> {
    match libc::munmap(base, size) {
        -1 => Err(ErrCode::last_error().into()),
        _ => Ok(()),
    }
}
