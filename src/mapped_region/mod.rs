use std::ffi::c_void;
use std::fmt;
use std::mem;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::err::{Error, ReadFault};
use crate::fault;

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod win;

/// Host page size in bytes.
#[cfg(unix)]
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// How the mapping is released. Chosen by the platform's open path.
enum Teardown {
    #[cfg(unix)]
    Unmap,
    /// The file-mapping object is closed after the view is unmapped.
    #[cfg(windows)]
    UnmapView { _mapping: win::Handle },
}

/// A read-only mapping of a whole file.
///
/// `size` is captured when the file is mapped and never re-checked. If the
/// file shrinks afterwards, reads past the new end fault; the read methods
/// report that as [`ReadFault`].
pub struct MappedRegion {
    base: *mut c_void,
    size: usize,
    teardown: Teardown,
}

// The mapping is never written through, so shared reads need no locking.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Maps `path` private and read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MappedRegion, Error> {
        FileMapping::new(path).open()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.base as *const u8
    }

    /// Offsets at which an 8-byte value can be read, or `None` when the
    /// region is shorter than 8 bytes.
    pub fn valid_offsets(&self) -> Option<RangeInclusive<usize>> {
        self.size.checked_sub(mem::size_of::<i64>()).map(|last| 0..=last)
    }

    /// Address of `offset`, provided `width` bytes fit from there. Only does
    /// pointer arithmetic.
    pub fn ptr_at(&self, offset: usize, width: usize) -> Result<*const u8, Error> {
        match offset.checked_add(width) {
            Some(end) if end <= self.size => Ok(unsafe { self.as_ptr().add(offset) }),
            _ => Err(Error::OutOfBounds {
                offset: offset,
                width: width,
                size: self.size,
            }),
        }
    }

    /// Copies `buf.len()` bytes starting at `offset` inside a recovery point.
    ///
    /// # Panics
    ///
    /// If the range is out of bounds, the fault handler is not installed, or
    /// the thread is already inside a guarded read.
    pub fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<(), ReadFault> {
        let src = match self.ptr_at(offset, buf.len()) {
            Ok(src) => src,
            Err(err) => panic!("{}", err),
        };
        unsafe { fault::guarded_copy(src, buf) }.map_err(|code| {
            tracing::debug!(offset, len = buf.len(), code, "guarded read faulted");
            ReadFault {
                offset: offset,
                len: buf.len(),
                code: code,
            }
        })
    }

    /// Reads a native-endian `T` at `offset`.
    pub fn read<T: Scalar>(&self, offset: usize) -> Result<T, ReadFault> {
        let mut raw = [0u8; 16];
        let raw = &mut raw[..T::WIDTH];
        self.read_into(offset, raw)?;
        Ok(T::from_ne_slice(raw))
    }

    /// Reads a native-endian `i64` at `offset`.
    pub fn read_i64(&self, offset: usize) -> Result<i64, ReadFault> {
        self.read::<i64>(offset)
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let result = match self.teardown {
            #[cfg(unix)]
            Teardown::Unmap => unsafe { unix::unmap(self.base, self.size) },
            #[cfg(windows)]
            Teardown::UnmapView { .. } => unsafe { win::unmap(self.base) },
        };
        match result {
            Ok(()) => tracing::trace!(size = self.size, "unmapped region"),
            Err(err) => tracing::warn!(size = self.size, error = %err, "failed to unmap region"),
        }
    }
}

/// Fixed-width integers that can be read out of a region.
pub trait Scalar: Copy + private::Sealed {
    const WIDTH: usize;

    #[doc(hidden)]
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

mod private {
    pub trait Sealed {}
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl private::Sealed for $t {}

            impl Scalar for $t {
                const WIDTH: usize = mem::size_of::<$t>();

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// Builder for a read-only file mapping.
///
/// ```no_run
/// let region = safe_mmap::FileMapping::new("objects.pack").open()?;
/// # Ok::<(), safe_mmap::Error>(())
/// ```
pub struct FileMapping {
    path: PathBuf,
    shared: bool,
}

impl FileMapping {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileMapping {
            path: path.as_ref().to_path_buf(),
            shared: false,
        }
    }

    /// Copy-on-write mapping. The default.
    pub fn private(mut self) -> Self {
        self.shared = false;
        self
    }

    /// Shared mapping; other processes' writes to the file become visible.
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    #[cfg(unix)]
    pub fn open(self) -> Result<MappedRegion, Error> {
        let (base, size) = unix::map_file(&self.path, self.shared).map_err(|err| self.open_error(err))?;
        tracing::debug!(path = %self.path.display(), size, shared = self.shared, "mapped file");
        Ok(MappedRegion {
            base: base,
            size: size,
            teardown: Teardown::Unmap,
        })
    }

    #[cfg(windows)]
    pub fn open(self) -> Result<MappedRegion, Error> {
        let (base, size, mapping) = win::map_file(&self.path, self.shared).map_err(|err| self.open_error(err))?;
        tracing::debug!(path = %self.path.display(), size, shared = self.shared, "mapped file");
        Ok(MappedRegion {
            base: base,
            size: size,
            teardown: Teardown::UnmapView { _mapping: mapping },
        })
    }

    fn open_error(&self, err: std::io::Error) -> Error {
        tracing::debug!(path = %self.path.display(), error = %err, "failed to map file");
        Error::Open {
            path: self.path.clone(),
            source: err,
        }
    }
}
