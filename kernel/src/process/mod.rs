//! Process management
//!
//! A fixed arena of [`MAX_TASKS`] process slots keyed by small integer id.
//! Each slot owns an 8 KiB kernel stack carved out of the top of the kernel
//! 4 MiB page (downward from 8 MiB), an open-file table, and the captured
//! kernel contexts the scheduler and the execute/halt unwind use. The
//! current process is a dedicated cell, never derived from the stack
//! pointer.

mod exec;
mod pcb;

pub mod files;
pub mod loader;

pub use exec::{
    boot_into_first_shell, exception_kill, parse_command, spawn_parked_shell, system_execute,
    system_halt, Command, EXCEPTION_STATUS,
};
pub use pcb::{FileDescriptor, Pcb, ProcessTable, TABLE};

use core::sync::atomic::{AtomicUsize, Ordering};

/// Fixed process-slot count.
pub const MAX_TASKS: usize = 6;

/// Per-process kernel stack size.
pub const KSTACK_SIZE: usize = 8192;

/// Kernel stacks grow down from the end of the kernel 4 MiB page.
pub const KSTACK_REGION_TOP: usize = crate::mm::KERNEL_END;

/// Open-file slots per process; 0 and 1 are the terminal.
pub const FILE_ARRAY_SIZE: usize = 8;

/// Capacity of the saved command-tail buffer.
pub const MAX_ARGS: usize = 1024;

/// Longest accepted program name.
pub const MAX_COMMAND_LEN: usize = 32;

/// Process identifier: the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub usize);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top of `pid`'s kernel stack (exclusive; the stack grows down from here).
pub const fn kernel_stack_top(pid: usize) -> usize {
    KSTACK_REGION_TOP - KSTACK_SIZE * pid
}

const NO_PROCESS: usize = usize::MAX;

static CURRENT: AtomicUsize = AtomicUsize::new(NO_PROCESS);

/// The running process, if any (none only during early boot).
pub fn current_pid() -> Option<usize> {
    match CURRENT.load(Ordering::SeqCst) {
        NO_PROCESS => None,
        pid => Some(pid),
    }
}

pub fn set_current(pid: usize) {
    CURRENT.store(pid, Ordering::SeqCst);
}

#[cfg(not(target_os = "none"))]
pub fn clear_current_for_tests() {
    CURRENT.store(NO_PROCESS, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stacks_tile_downward_from_8_mib() {
        assert_eq!(kernel_stack_top(0), 0x80_0000);
        assert_eq!(kernel_stack_top(1), 0x7F_E000);
        assert_eq!(kernel_stack_top(5), 0x7F_6000);
        // The lowest stack still lives inside the kernel page.
        assert!(kernel_stack_top(MAX_TASKS - 1) - KSTACK_SIZE > crate::mm::KERNEL_BASE);
    }
}
