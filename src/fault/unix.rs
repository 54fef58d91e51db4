use std::io;
use std::mem;
use std::ptr;
use std::sync::OnceLock;

use libc;

use super::claim_fault;

/// Signals a failed read from a file mapping can raise.
const SIGNALS: [libc::c_int; 2] = [libc::SIGBUS, libc::SIGSEGV];

/// Dispositions that were in place before ours, one per entry of `SIGNALS`.
struct PreviousActions([libc::sigaction; 2]);

unsafe impl Send for PreviousActions {}
unsafe impl Sync for PreviousActions {}

impl PreviousActions {
    fn get(&self, signal: libc::c_int) -> Option<&libc::sigaction> {
        SIGNALS.iter().position(|&s| s == signal).map(|i| &self.0[i])
    }
}

static PREVIOUS: OnceLock<PreviousActions> = OnceLock::new();

pub unsafe fn install_handler() -> io::Result<()> {
    // Record the old dispositions before ours can run.
    let mut previous: [libc::sigaction; 2] = mem::zeroed();
    for (signal, old) in SIGNALS.iter().zip(previous.iter_mut()) {
        if libc::sigaction(*signal, ptr::null(), old) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    let _ = PREVIOUS.set(PreviousActions(previous));

    let mut action: libc::sigaction = mem::zeroed();
    action.sa_sigaction = fault_handler as usize;
    // SA_ONSTACK keeps stack overflow reports working when we forward them.
    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
    libc::sigemptyset(&mut action.sa_mask);

    for signal in SIGNALS.iter() {
        if libc::sigaction(*signal, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn fault_handler(signal: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    unsafe {
        let uc = context as *mut libc::ucontext_t;
        match claim_fault(program_counter(uc)) {
            Some(landing_pad) => resume_at(uc, landing_pad, signal),
            None => forward(signal, info, context),
        }
    }
}

/// Hands a fault we do not own to whoever had the signal before us.
unsafe fn forward(signal: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let previous = PREVIOUS.get().and_then(|actions| actions.get(signal));
    match previous {
        Some(action) if action.sa_sigaction != libc::SIG_DFL && action.sa_sigaction != libc::SIG_IGN => {
            if action.sa_flags & libc::SA_SIGINFO != 0 {
                let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                    mem::transmute(action.sa_sigaction);
                handler(signal, info, context);
            } else {
                let handler: extern "C" fn(libc::c_int) = mem::transmute(action.sa_sigaction);
                handler(signal);
            }
        }
        _ => {
            // Back to the default action; returning re-executes the faulting
            // instruction, which then terminates the process.
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(signal, &action, ptr::null_mut());
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
unsafe fn program_counter(uc: *mut libc::ucontext_t) -> usize {
    (*uc).uc_mcontext.gregs[libc::REG_RIP as usize] as usize
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
unsafe fn resume_at(uc: *mut libc::ucontext_t, pc: usize, code: libc::c_int) {
    let gregs = &mut (*uc).uc_mcontext.gregs;
    gregs[libc::REG_RAX as usize] = code as libc::greg_t;
    gregs[libc::REG_RIP as usize] = pc as libc::greg_t;
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
unsafe fn program_counter(uc: *mut libc::ucontext_t) -> usize {
    (*uc).uc_mcontext.pc as usize
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
unsafe fn resume_at(uc: *mut libc::ucontext_t, pc: usize, code: libc::c_int) {
    let mcontext = &mut (*uc).uc_mcontext;
    mcontext.regs[0] = code as u64;
    mcontext.pc = pc as u64;
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
unsafe fn program_counter(uc: *mut libc::ucontext_t) -> usize {
    (*(*uc).uc_mcontext).__ss.__rip as usize
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
unsafe fn resume_at(uc: *mut libc::ucontext_t, pc: usize, code: libc::c_int) {
    let state = &mut (*(*uc).uc_mcontext).__ss;
    state.__rax = code as u64;
    state.__rip = pc as u64;
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe fn program_counter(uc: *mut libc::ucontext_t) -> usize {
    (*(*uc).uc_mcontext).__ss.__pc as usize
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe fn resume_at(uc: *mut libc::ucontext_t, pc: usize, code: libc::c_int) {
    let state = &mut (*(*uc).uc_mcontext).__ss;
    state.__x[0] = code as u64;
    state.__pc = pc as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_actions_lookup() {
        let actions = PreviousActions(unsafe { mem::zeroed() });
        assert!(actions.get(libc::SIGBUS).is_some());
        assert!(actions.get(libc::SIGSEGV).is_some());
        assert!(actions.get(libc::SIGINT).is_none());
    }

    #[test]
    fn test_handler_is_registered() {
        super::super::install().unwrap();
        for signal in SIGNALS.iter() {
            let mut current: libc::sigaction = unsafe { mem::zeroed() };
            assert_eq!(unsafe { libc::sigaction(*signal, ptr::null(), &mut current) }, 0);
            assert_eq!(current.sa_sigaction, fault_handler as usize);
            assert!(current.sa_flags & libc::SA_SIGINFO != 0);
        }
    }
}
