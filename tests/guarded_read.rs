extern crate libc;
extern crate safe_mmap;
extern crate tempfile;

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use safe_mmap::{Error, MappedRegion, RecoveryPoint};
use tempfile::NamedTempFile;

fn temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn open(file: &NamedTempFile) -> MappedRegion {
    safe_mmap::install_fault_handler().unwrap();
    MappedRegion::open(file.path()).unwrap()
}

/// Two pages: `first` at offset 0, `second` at the start of the second page.
#[cfg(unix)]
fn two_pages(first: i64, second: i64) -> NamedTempFile {
    let ps = safe_mmap::page_size();
    let mut bytes = vec![0u8; 2 * ps];
    bytes[..8].copy_from_slice(&first.to_ne_bytes());
    bytes[ps..ps + 8].copy_from_slice(&second.to_ne_bytes());
    temp_file(&bytes)
}

#[test]
fn test_sixteen_byte_file() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&42i64.to_ne_bytes());
    bytes.extend_from_slice(&[0u8; 8]);
    let file = temp_file(&bytes);
    let region = open(&file);

    assert_eq!(region.size(), 16);
    assert_eq!(region.read_i64(0), Ok(42));
    assert_eq!(region.read_i64(8), Ok(0));
    assert!(matches!(region.ptr_at(9, 8), Err(Error::OutOfBounds { .. })));
}

#[test]
fn test_every_offset_matches_file_contents() {
    let bytes: Vec<u8> = (0..257u32).map(|i| (i * 31 + 7) as u8).collect();
    let file = temp_file(&bytes);
    let region = open(&file);

    let contents = fs::read(file.path()).unwrap();
    for offset in region.valid_offsets().unwrap() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&contents[offset..offset + 8]);
        assert_eq!(region.read_i64(offset), Ok(i64::from_ne_bytes(raw)), "offset {}", offset);
    }
}

#[test]
fn test_out_of_bounds_panics_without_arming() {
    let file = temp_file(&[0u8; 16]);
    let region = open(&file);

    for &offset in &[9usize, 16, usize::MAX - 3] {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| region.read_i64(offset)));
        assert!(result.is_err(), "offset {}", offset);
        assert!(!RecoveryPoint::is_armed());
    }
    assert_eq!(region.read_i64(8), Ok(0));
}

#[test]
fn test_concurrent_reads() {
    let bytes: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let file = temp_file(&bytes);
    let region = Arc::new(open(&file));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let region = Arc::clone(&region);
            let bytes = bytes.clone();
            thread::spawn(move || {
                for offset in (t..4088).step_by(7) {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&bytes[offset..offset + 8]);
                    assert_eq!(region.read_i64(offset), Ok(i64::from_ne_bytes(raw)));
                }
                assert!(!RecoveryPoint::is_armed());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[cfg(unix)]
#[test]
fn test_fault_after_truncation() {
    let ps = safe_mmap::page_size();
    let file = two_pages(42, 99);
    let region = open(&file);

    assert_eq!(region.read_i64(ps), Ok(99));
    file.as_file().set_len(ps as u64).unwrap();

    let fault = region.read_i64(ps).unwrap_err();
    assert_eq!(fault.offset, ps);
    assert_eq!(fault.len, 8);
    assert!(fault.code == libc::SIGBUS || fault.code == libc::SIGSEGV);
    assert!(!RecoveryPoint::is_armed());

    // Same thread, right after the fault.
    assert_eq!(region.read_i64(0), Ok(42));
    assert!(!RecoveryPoint::is_armed());
}

#[cfg(unix)]
#[test]
fn test_read_straddling_truncation_point() {
    let ps = safe_mmap::page_size();
    let file = two_pages(1, 2);
    let region = open(&file);
    file.as_file().set_len(ps as u64).unwrap();

    let fault = region.read::<u32>(ps + 16).unwrap_err();
    assert_eq!(fault.len, 4);

    let mut buf = [0u8; 16];
    let fault = region.read_into(ps - 8, &mut buf).unwrap_err();
    assert_eq!(fault.offset, ps - 8);
    assert_eq!(fault.len, 16);

    assert!(region.read_i64(ps - 8).is_ok());
}

#[cfg(unix)]
#[test]
fn test_concurrent_faults_do_not_interfere() {
    let ps = safe_mmap::page_size();
    let file = two_pages(42, 99);
    let region = Arc::new(open(&file));
    file.as_file().set_len(ps as u64).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                for i in 0..200 {
                    if (i + t) % 2 == 0 {
                        assert!(region.read_i64(ps + i % 64).is_err());
                    } else {
                        assert_eq!(region.read_i64(0), Ok(42));
                    }
                    assert!(!RecoveryPoint::is_armed());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[cfg(unix)]
#[test]
fn test_drop_after_faults() {
    let ps = safe_mmap::page_size();
    let file = two_pages(5, 6);
    let region = open(&file);
    file.as_file().set_len(0).unwrap();

    for _ in 0..3 {
        assert!(region.read_i64(ps).is_err());
        assert!(region.read_i64(0).is_err());
    }
    drop(region);

    // The file is still usable once extended again.
    file.as_file().set_len(2 * ps as u64).unwrap();
    let region = MappedRegion::open(file.path()).unwrap();
    assert_eq!(region.read_i64(0), Ok(0));
}

/// A fault outside a guarded read must still kill the process. Runs itself
/// in a child process.
#[cfg(unix)]
#[test]
fn test_unguarded_fault_is_not_intercepted() {
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    const CHILD: &str = "SAFE_MMAP_UNGUARDED_CHILD";

    if std::env::var_os(CHILD).is_some() {
        let ps = safe_mmap::page_size();
        let file = two_pages(1, 2);
        let region = open(&file);
        file.as_file().set_len(0).unwrap();
        let value = unsafe { std::ptr::read_volatile(region.as_ptr().add(ps)) };
        println!("survived with {}", value);
        std::process::exit(0);
    }

    let status = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "test_unguarded_fault_is_not_intercepted", "--test-threads=1", "--nocapture"])
        .env(CHILD, "1")
        .status()
        .unwrap();
    assert!(!status.success());
    let signal = status.signal();
    assert!(signal == Some(libc::SIGBUS) || signal == Some(libc::SIGSEGV), "{:?}", status);
}
