use std::fmt;
use std::io;
use libc;

/// Raw `errno` value.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ErrCode(i32);

impl ErrCode {
    pub fn last_error() -> Self {
        ErrCode(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl fmt::Debug for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ErrCode({}: {})", self.0, io::Error::from_raw_os_error(self.0))
    }
}

impl From<ErrCode> for io::Error {
    fn from(ec: ErrCode) -> Self {
        io::Error::from_raw_os_error(ec.0)
    }
}

pub const INVALID_ARGUMENT: ErrCode = ErrCode(libc::EINVAL);
