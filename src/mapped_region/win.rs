use std::ffi::c_void;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{CloseHandle, GENERIC_READ, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, GetFileSizeEx, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READONLY,
};

/// Owned kernel handle, closed on drop.
pub struct Handle(HANDLE);

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0); }
    }
}

/// Maps all of `path` read-only. The file-mapping object has to stay open
/// for as long as the view exists, so it is returned alongside the view.
pub fn map_file(path: &Path, _shared: bool) -> io::Result<(*mut c_void, usize, Handle)> {
    let name: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();

    let file = unsafe {
        CreateFileW(name.as_ptr(),
                    GENERIC_READ,
                    FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                    ptr::null(),
                    OPEN_EXISTING,
                    0,
                    ptr::null_mut())
    };
    if file == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    let file = Handle(file);

    let mut size: i64 = 0;
    if unsafe { GetFileSizeEx(file.0, &mut size) } == 0 {
        return Err(io::Error::last_os_error());
    }
    let size = usize::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file does not fit in the address space"))?;
    if size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "cannot map an empty file"));
    }

    let mapping = unsafe { CreateFileMappingW(file.0, ptr::null(), PAGE_READONLY, 0, 0, ptr::null()) };
    if mapping.is_null() {
        return Err(io::Error::last_os_error());
    }
    let mapping = Handle(mapping);

    let view = unsafe { MapViewOfFile(mapping.0, FILE_MAP_READ, 0, 0, size) };
    if view.Value.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok((view.Value, size, mapping))
}

/// Unmaps the view. The file-mapping object is closed separately, after this.
pub unsafe fn unmap(base: *mut c_void) -> io::Result<()> {
    match UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: base }) {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}
