//! Recovery from synchronous memory faults during mapped reads.
//!
//! A read from a file mapping can fault after the mapping was created: the
//! file was truncated, a network mount went away, or the device returned an
//! I/O error. The operating system reports that as `SIGBUS`/`SIGSEGV` (POSIX)
//! or `EXCEPTION_IN_PAGE_ERROR` (Windows) instead of an error code.
//!
//! Reads go through a small assembly copy routine (see `arch`). Before the
//! copy the calling thread arms its [`RecoveryPoint`]. The process-wide
//! handler installed by [`install`] only intercepts a fault when the faulting
//! thread is armed and the faulting instruction belongs to the copy routine;
//! it then resumes the thread at the routine's landing pad, which returns the
//! fault code. Every other fault keeps its normal disposition.
//!
//! | Platform | Mechanism |
//! |----------|-----------|
//! | Linux    | `SIGBUS`/`SIGSEGV` via `sigaction` |
//! | macOS    | `SIGBUS`/`SIGSEGV` via `sigaction` |
//! | Windows  | vectored exception handler |

#[cfg(not(any(
    all(any(target_os = "linux", target_os = "macos"), any(target_arch = "x86_64", target_arch = "aarch64")),
    all(windows, target_arch = "x86_64"),
)))]
compile_error!("fault recovery is only implemented for Linux/macOS on x86_64/aarch64 and Windows on x86_64");

mod arch;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
use self::unix as sys;

#[cfg(windows)]
mod win;

#[cfg(windows)]
use self::win as sys;

use std::marker::PhantomData;
use std::sync::atomic::{compiler_fence, AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::err::Error;

thread_local! {
    // Const-initialized and without a destructor, so reading it from the
    // signal handler never runs lazy initialization.
    static ARMED: AtomicBool = const { AtomicBool::new(false) };
}

/// Whether the handler is currently installed.
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

static INSTALL: OnceLock<Result<(), i32>> = OnceLock::new();

/// Installs the process-wide fault handler.
///
/// Idempotent. Must complete before the first guarded read on any thread;
/// guarded reads panic if it has not.
pub(crate) fn install() -> Result<(), Error> {
    let result = INSTALL.get_or_init(|| {
        let result = unsafe { sys::install_handler() };
        match result {
            Ok(()) => {
                HANDLER_INSTALLED.store(true, Ordering::Release);
                tracing::debug!("fault handler installed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install fault handler");
                Err(err.raw_os_error().unwrap_or(0))
            }
        }
    });
    match *result {
        Ok(()) => Ok(()),
        Err(code) => Err(Error::InstallHandler(std::io::Error::from_raw_os_error(code))),
    }
}

/// Whether [`install`] has completed successfully.
pub(crate) fn is_installed() -> bool {
    HANDLER_INSTALLED.load(Ordering::Acquire)
}

/// Decides whether a fault at `pc` belongs to a guarded read.
fn owns_fault(armed: bool, pc: usize) -> bool {
    armed && arch::in_copy(pc)
}

/// Called from the platform handler on the faulting thread. Disarms the
/// thread and returns the landing pad to resume at, or `None` when the fault
/// must keep its normal disposition.
///
/// Only touches the const-initialized thread local, which is
/// async-signal-safe.
fn claim_fault(pc: usize) -> Option<usize> {
    let armed = ARMED.try_with(|armed| armed.load(Ordering::Relaxed)).unwrap_or(false);
    if !owns_fault(armed, pc) {
        return None;
    }
    let _ = ARMED.try_with(|armed| armed.store(false, Ordering::Relaxed));
    Some(arch::landing_pad())
}

/// The calling thread's recovery point.
///
/// At most one can be armed per thread; arming a second one panics. The
/// recovery point is disarmed when dropped, whichever way the read ended.
pub struct RecoveryPoint {
    // Bound to the thread that armed it.
    _not_send: PhantomData<*const ()>,
}

impl RecoveryPoint {
    /// Arms the calling thread's recovery point.
    ///
    /// # Panics
    ///
    /// If a recovery point is already armed on this thread.
    pub(crate) fn arm() -> RecoveryPoint {
        ARMED.with(|armed| {
            assert!(!armed.load(Ordering::Relaxed), "nested guarded read on the same thread");
            armed.store(true, Ordering::Relaxed);
        });
        compiler_fence(Ordering::SeqCst);
        RecoveryPoint { _not_send: PhantomData }
    }

    /// Whether the calling thread has an armed recovery point.
    pub fn is_armed() -> bool {
        ARMED.with(|armed| armed.load(Ordering::Relaxed))
    }

    /// Copies `dst.len()` bytes from `src`, returning the fault code if the
    /// source could not be read.
    ///
    /// # Safety
    ///
    /// `src` must point into a live mapping with at least `dst.len()` bytes
    /// left.
    ///
    /// # Panics
    ///
    /// If the fault handler is not installed.
    pub(crate) unsafe fn copy(&self, src: *const u8, dst: &mut [u8]) -> Result<(), i32> {
        assert!(is_installed(), "fault handler not installed");
        match arch::guarded_copy(dst.as_mut_ptr(), src, dst.len()) {
            0 => Ok(()),
            code => Err(code),
        }
    }
}

impl Drop for RecoveryPoint {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        ARMED.with(|armed| armed.store(false, Ordering::Relaxed));
    }
}

/// Copies `dst.len()` bytes from `src` inside a fresh recovery point.
///
/// # Panics
///
/// If the handler is not installed or a recovery point is already armed on
/// this thread.
///
/// # Safety
///
/// `src` must point into a live mapping with at least `dst.len()` bytes
/// left.
pub(crate) unsafe fn guarded_copy(src: *const u8, dst: &mut [u8]) -> Result<(), i32> {
    let point = RecoveryPoint::arm();
    point.copy(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        install().unwrap();
        install().unwrap();
        assert!(is_installed());
    }

    #[test]
    fn test_recovery_point_disarms_on_drop() {
        assert!(!RecoveryPoint::is_armed());
        {
            let _point = RecoveryPoint::arm();
            assert!(RecoveryPoint::is_armed());
        }
        assert!(!RecoveryPoint::is_armed());
    }

    #[test]
    #[should_panic(expected = "nested guarded read")]
    fn test_nested_recovery_point_panics() {
        let _outer = RecoveryPoint::arm();
        let _inner = RecoveryPoint::arm();
    }

    #[test]
    fn test_recovery_point_is_per_thread() {
        let _point = RecoveryPoint::arm();
        let other = std::thread::spawn(RecoveryPoint::is_armed).join().unwrap();
        assert!(!other);
        assert!(RecoveryPoint::is_armed());
    }

    #[test]
    fn test_owns_fault() {
        let pc = arch::copy_start();
        assert!(owns_fault(true, pc));
        assert!(!owns_fault(false, pc));
        assert!(!owns_fault(true, test_owns_fault as usize));
    }

    #[test]
    fn test_claim_fault_requires_armed_thread() {
        let pc = arch::copy_start();
        assert_eq!(claim_fault(pc), None);

        let point = RecoveryPoint::arm();
        assert_eq!(claim_fault(test_claim_fault_requires_armed_thread as usize), None);
        assert!(RecoveryPoint::is_armed());
        assert_eq!(claim_fault(pc), Some(arch::landing_pad()));
        assert!(!RecoveryPoint::is_armed());
        drop(point);
        assert!(!RecoveryPoint::is_armed());
    }

    #[test]
    fn test_guarded_copy() {
        install().unwrap();
        let src = 0x0102_0304_0506_0708u64.to_ne_bytes();
        let mut dst = [0u8; 8];
        unsafe { guarded_copy(src.as_ptr(), &mut dst) }.unwrap();
        assert_eq!(dst, src);
        assert!(!RecoveryPoint::is_armed());
    }
}
