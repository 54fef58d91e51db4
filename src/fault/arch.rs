//! Guarded copy routine.
//!
//! `safe_mmap_guarded_copy(dst, src, len)` copies `len` bytes and returns 0.
//! Every instruction that may touch `src` lies in `[insn, end)`. When the
//! fault handler sees a fault inside that range on a thread with an armed
//! recovery point, it moves the program counter to the landing pad and puts
//! the fault code into the return register, so the call returns that code
//! instead.

#[cfg(target_vendor = "apple")]
macro_rules! asm_sym {
    ($name:literal) => {
        concat!("_", $name)
    };
}

#[cfg(not(target_vendor = "apple"))]
macro_rules! asm_sym {
    ($name:literal) => {
        $name
    };
}

// System V: rdi = dst, rsi = src, rdx = len. Direction flag is clear on entry.
#[cfg(all(target_arch = "x86_64", unix))]
std::arch::global_asm!(
    ".text",
    ".p2align 4",
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy")),
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy_insn")),
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy_end")),
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy_fixup")),
    concat!(asm_sym!("safe_mmap_guarded_copy"), ":"),
    "mov rcx, rdx",
    concat!(asm_sym!("safe_mmap_guarded_copy_insn"), ":"),
    "rep movsb",
    concat!(asm_sym!("safe_mmap_guarded_copy_end"), ":"),
    "xor eax, eax",
    "ret",
    concat!(asm_sym!("safe_mmap_guarded_copy_fixup"), ":"),
    "ret",
);

// Win64: rcx = dst, rdx = src, r8 = len. rdi and rsi are callee-saved, and
// the landing pad restores them as well.
#[cfg(all(target_arch = "x86_64", windows))]
std::arch::global_asm!(
    ".text",
    ".p2align 4",
    ".globl safe_mmap_guarded_copy",
    ".globl safe_mmap_guarded_copy_insn",
    ".globl safe_mmap_guarded_copy_end",
    ".globl safe_mmap_guarded_copy_fixup",
    "safe_mmap_guarded_copy:",
    "push rdi",
    "push rsi",
    "mov rdi, rcx",
    "mov rsi, rdx",
    "mov rcx, r8",
    "safe_mmap_guarded_copy_insn:",
    "rep movsb",
    "safe_mmap_guarded_copy_end:",
    "xor eax, eax",
    "pop rsi",
    "pop rdi",
    "ret",
    "safe_mmap_guarded_copy_fixup:",
    "pop rsi",
    "pop rdi",
    "ret",
);

// AAPCS64: x0 = dst, x1 = src, x2 = len.
#[cfg(target_arch = "aarch64")]
std::arch::global_asm!(
    ".text",
    ".p2align 4",
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy")),
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy_insn")),
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy_end")),
    concat!(".globl ", asm_sym!("safe_mmap_guarded_copy_fixup")),
    concat!(asm_sym!("safe_mmap_guarded_copy"), ":"),
    "cbz x2, 2f",
    concat!(asm_sym!("safe_mmap_guarded_copy_insn"), ":"),
    "1:",
    "ldrb w3, [x1], #1",
    "strb w3, [x0], #1",
    "subs x2, x2, #1",
    "b.ne 1b",
    "2:",
    concat!(asm_sym!("safe_mmap_guarded_copy_end"), ":"),
    "mov w0, #0",
    "ret",
    concat!(asm_sym!("safe_mmap_guarded_copy_fixup"), ":"),
    "ret",
);

extern "C" {
    fn safe_mmap_guarded_copy(dst: *mut u8, src: *const u8, len: usize) -> i32;
    fn safe_mmap_guarded_copy_insn();
    fn safe_mmap_guarded_copy_end();
    fn safe_mmap_guarded_copy_fixup();
}

/// Copies `len` bytes from `src` to `dst`, returning 0 or the fault code.
///
/// # Safety
///
/// `dst` must be valid for `len` bytes of writes. `src` must point into a
/// live mapping of at least `len` bytes. The caller must hold an armed
/// `RecoveryPoint`, otherwise a fault is not recovered.
#[inline]
pub unsafe fn guarded_copy(dst: *mut u8, src: *const u8, len: usize) -> i32 {
    safe_mmap_guarded_copy(dst, src, len)
}

/// First instruction of the copy loop.
#[inline]
pub fn copy_start() -> usize {
    safe_mmap_guarded_copy_insn as usize
}

/// Whether `pc` is an instruction of the copy loop that may fault on `src`.
#[inline]
pub fn in_copy(pc: usize) -> bool {
    let end = safe_mmap_guarded_copy_end as usize;
    copy_start() <= pc && pc < end
}

/// Address the handler redirects a recovered fault to.
#[inline]
pub fn landing_pad() -> usize {
    safe_mmap_guarded_copy_fixup as usize
}
