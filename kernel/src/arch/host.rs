//! Recording arch double for the host test harness
//!
//! Mirrors the surface of the bare-metal shim. State-changing operations are
//! recorded in atomics so tests can assert on them; inputs (CR2, the status a
//! user program "halts" with) are injectable.

#![allow(clippy::missing_safety_doc)]

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static IF_STATE: AtomicBool = AtomicBool::new(true);
static LAST_CR3: AtomicUsize = AtomicUsize::new(0);
static CR3_LOADS: AtomicUsize = AtomicUsize::new(0);
static CR2_VALUE: AtomicUsize = AtomicUsize::new(0);
static PAGING_ENABLED: AtomicBool = AtomicBool::new(false);
static KERNEL_ESP0: AtomicUsize = AtomicUsize::new(0);
static IDT_BASE: AtomicUsize = AtomicUsize::new(0);
static IDT_LIMIT: AtomicUsize = AtomicUsize::new(0);
static RUN_USER_STATUS: AtomicUsize = AtomicUsize::new(0);
static RUN_USER_CALLS: AtomicUsize = AtomicUsize::new(0);
static LAST_RUN_ENTRY: AtomicUsize = AtomicUsize::new(0);
static LAST_UNWIND_SP: AtomicUsize = AtomicUsize::new(0);
static LAST_UNWIND_STATUS: AtomicUsize = AtomicUsize::new(0);
static UNWIND_CALLS: AtomicUsize = AtomicUsize::new(0);
static LAST_SWITCH_LOAD: AtomicUsize = AtomicUsize::new(0);

// ---------------------------------------------------------------------------
// Port I/O
// ---------------------------------------------------------------------------

pub fn outb(_port: u16, _value: u8) {}

pub fn inb(_port: u16) -> u8 {
    0
}

pub fn io_wait() {}

// ---------------------------------------------------------------------------
// Interrupt flag
// ---------------------------------------------------------------------------

pub fn cli() {
    IF_STATE.store(false, Ordering::SeqCst);
}

pub fn sti() {
    IF_STATE.store(true, Ordering::SeqCst);
}

pub fn save_flags() -> usize {
    if IF_STATE.load(Ordering::SeqCst) {
        super::EFLAGS_IF
    } else {
        0
    }
}

pub fn restore_flags(flags: usize) {
    IF_STATE.store(flags & super::EFLAGS_IF != 0, Ordering::SeqCst);
}

pub fn interrupts_enabled() -> bool {
    IF_STATE.load(Ordering::SeqCst)
}

pub fn wait_for_interrupt() {}

pub fn halt_loop() -> ! {
    panic!("halt_loop reached on host");
}

// ---------------------------------------------------------------------------
// Control registers and descriptor tables
// ---------------------------------------------------------------------------

pub fn init() {}

pub fn load_cr3(directory_pa: usize) {
    LAST_CR3.store(directory_pa, Ordering::SeqCst);
    CR3_LOADS.fetch_add(1, Ordering::SeqCst);
}

pub fn reload_cr3() {
    CR3_LOADS.fetch_add(1, Ordering::SeqCst);
}

pub fn current_cr3() -> usize {
    LAST_CR3.load(Ordering::SeqCst)
}

pub fn read_cr2() -> usize {
    CR2_VALUE.load(Ordering::SeqCst)
}

pub fn enable_paging() {
    PAGING_ENABLED.store(true, Ordering::SeqCst);
}

pub fn set_kernel_stack(esp0: usize) {
    KERNEL_ESP0.store(esp0, Ordering::SeqCst);
}

pub fn get_kernel_stack() -> usize {
    KERNEL_ESP0.load(Ordering::SeqCst)
}

pub fn install_idt(base: usize, limit: u16) {
    IDT_BASE.store(base, Ordering::SeqCst);
    IDT_LIMIT.store(limit as usize, Ordering::SeqCst);
}

/// Address of the interrupt linkage stub for `vector`.
///
/// The host double hands out distinct synthetic addresses so gate-encoding
/// tests can tell vectors apart.
pub fn vector_stub(vector: u8) -> usize {
    0x0010_0000 + (vector as usize) * 0x10
}

// ---------------------------------------------------------------------------
// Context switching and user-mode entry
// ---------------------------------------------------------------------------

/// # Safety
///
/// Host double: records the swap; `save` must be valid for writes.
pub unsafe extern "C" fn switch_context(save: *mut usize, load: usize) {
    // SAFETY: Caller contract, as on the real shim.
    unsafe { *save = load.wrapping_add(1) };
    LAST_SWITCH_LOAD.store(load, Ordering::SeqCst);
}

pub fn prepare_initial_context(kstack_top: usize, _entry: usize, _user_esp: usize) -> usize {
    // Same arithmetic as the real frame builder: four callee-saved slots,
    // a return target, and the two trampoline operands.
    kstack_top - 28
}

/// Host stand-in for entering a user program: records the call and returns
/// the pre-configured halt status immediately, as if the child ran to
/// completion.
///
/// # Safety
///
/// `resume_slot` must be valid for writes, as on the real shim.
pub unsafe extern "C" fn run_user(entry: usize, _user_esp: usize, resume_slot: *mut usize) -> usize {
    LAST_RUN_ENTRY.store(entry, Ordering::SeqCst);
    RUN_USER_CALLS.fetch_add(1, Ordering::SeqCst);
    // SAFETY: Caller contract.
    unsafe { *resume_slot = 0xC0DE };
    RUN_USER_STATUS.load(Ordering::SeqCst)
}

/// # Safety
///
/// Host double: records the unwind and returns (the real shim never does).
pub unsafe extern "C" fn return_to_context(resume_sp: usize, status: usize) {
    LAST_UNWIND_SP.store(resume_sp, Ordering::SeqCst);
    LAST_UNWIND_STATUS.store(status, Ordering::SeqCst);
    UNWIND_CALLS.fetch_add(1, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

pub fn console_init() {}

pub fn console_write_fmt(args: fmt::Arguments) {
    std::print!("{}", args);
}

// ---------------------------------------------------------------------------
// Test instrumentation
// ---------------------------------------------------------------------------

pub mod test_control {
    use super::*;

    static ARCH_STATE: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Serialize tests that assert on the recording statics; the standard
    /// harness runs tests concurrently.
    pub fn lock_arch() -> std::sync::MutexGuard<'static, ()> {
        ARCH_STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_cr3() -> usize {
        LAST_CR3.load(Ordering::SeqCst)
    }

    pub fn cr3_load_count() -> usize {
        CR3_LOADS.load(Ordering::SeqCst)
    }

    pub fn set_cr2(value: usize) {
        CR2_VALUE.store(value, Ordering::SeqCst);
    }

    pub fn last_kernel_stack() -> usize {
        KERNEL_ESP0.load(Ordering::SeqCst)
    }

    pub fn idt_registration() -> (usize, usize) {
        (
            IDT_BASE.load(Ordering::SeqCst),
            IDT_LIMIT.load(Ordering::SeqCst),
        )
    }

    /// Configure the status the next `run_user` calls report.
    pub fn set_run_user_status(status: usize) {
        RUN_USER_STATUS.store(status, Ordering::SeqCst);
    }

    pub fn run_user_calls() -> usize {
        RUN_USER_CALLS.load(Ordering::SeqCst)
    }

    pub fn last_run_entry() -> usize {
        LAST_RUN_ENTRY.load(Ordering::SeqCst)
    }

    pub fn last_unwind() -> (usize, usize) {
        (
            LAST_UNWIND_SP.load(Ordering::SeqCst),
            LAST_UNWIND_STATUS.load(Ordering::SeqCst),
        )
    }

    pub fn unwind_calls() -> usize {
        UNWIND_CALLS.load(Ordering::SeqCst)
    }

    pub fn last_switch_load() -> usize {
        LAST_SWITCH_LOAD.load(Ordering::SeqCst)
    }
}
