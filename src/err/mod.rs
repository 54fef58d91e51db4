use std::io;
use std::path::PathBuf;

#[cfg(unix)]
pub use self::unix::*;

#[cfg(unix)]
mod unix;

/// Errors reported by the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file could not be stat'd, opened, or mapped.
    #[error("failed to map {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `offset + width` does not fit inside the region.
    #[error("offset {offset} with width {width} is out of bounds for a region of {size} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        size: usize,
    },

    /// The process-wide fault handler could not be registered.
    #[error("failed to install fault handler: {0}")]
    InstallHandler(#[source] io::Error),

    #[error(transparent)]
    Fault(#[from] ReadFault),
}

/// A guarded read touched memory the operating system could not back.
///
/// `code` is the signal number on POSIX and the exception code on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("read of {len} bytes at offset {offset} faulted (code {code})")]
pub struct ReadFault {
    pub offset: usize,
    pub len: usize,
    pub code: i32,
}

#[cfg(unix)]
#[test]
fn test_errcode() {
    let err: io::Error = INVALID_ARGUMENT.into();
    assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[test]
fn test_error_display() {
    let err = Error::OutOfBounds { offset: 9, width: 8, size: 16 };
    assert_eq!(err.to_string(), "offset 9 with width 8 is out of bounds for a region of 16 bytes");

    let fault = ReadFault { offset: 4096, len: 8, code: 7 };
    assert_eq!(fault.to_string(), "read of 8 bytes at offset 4096 faulted (code 7)");
    assert_eq!(Error::from(fault).to_string(), fault.to_string());
}
