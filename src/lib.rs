//! Fault-tolerant reads from memory-mapped files.
//!
//! A file mapping can stop being backed by storage after it was created: the
//! file is truncated, a network mount disappears, or the disk returns an I/O
//! error. The next access to the affected page then raises `SIGBUS` (or an
//! in-page exception on Windows) rather than returning an error, which
//! normally kills the process.
//!
//! This crate maps files read-only and reads fixed-width integers from them
//! so that such a fault comes back as a [`ReadFault`] value.
//!
//! ```no_run
//! use safe_mmap::MappedRegion;
//!
//! safe_mmap::install_fault_handler()?;
//!
//! let region = MappedRegion::open("objects.pack")?;
//! match region.read_i64(16) {
//!     Ok(value) => println!("{}", value),
//!     Err(fault) => eprintln!("storage went away: {}", fault),
//! }
//! # Ok::<(), safe_mmap::Error>(())
//! ```
//!
//! [`install_fault_handler`] must run once before any read, on any thread.
//! Reads panic if it has not. Out-of-bounds offsets and nested reads on one
//! thread are programming errors and panic too.

extern crate libc;

mod err;
pub use self::err::{Error, ReadFault};

mod fault;
pub use self::fault::RecoveryPoint;

mod mapped_region;
pub use self::mapped_region::*;

/// Installs the process-wide handler that turns faults inside guarded reads
/// into [`ReadFault`]s. Faults anywhere else keep their default behavior.
///
/// Call it once at startup, before any thread reads from a region. Further
/// calls are no-ops.
pub fn install_fault_handler() -> Result<(), Error> {
    fault::install()
}

/// Whether [`install_fault_handler`] has completed successfully.
pub fn is_fault_handler_installed() -> bool {
    fault::is_installed()
}
