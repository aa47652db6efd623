//! Round-robin scheduler over the virtual terminals
//!
//! Every timer tick rotates execution to the next terminal's foreground
//! process: acknowledge the timer, advance the terminal cursor, install the
//! incoming process's page directory and kernel stack, and swap kernel
//! contexts. Terminals whose foreground process is parked on an unfired
//! wait latch are skipped.
//!
//! Within one terminal, user-mode operations are serialized; across
//! terminals the only guarantee is the rotation order itself.

pub mod wait;

use core::cell::UnsafeCell;

use crate::arch;
use crate::drivers::{rtc, terminal};
use crate::mm::PAGING;
use crate::process::{self, kernel_stack_top, MAX_TASKS};

/// Saved kernel context per process slot, written by the context-switch
/// assembly through a raw pointer (so it cannot live under the PCB lock).
struct ContextCell(UnsafeCell<usize>);

// SAFETY: Written only from the tick handler and the parked-shell spawn
// path, both with interrupts masked on a single CPU.
unsafe impl Sync for ContextCell {}

static CONTEXTS: [ContextCell; MAX_TASKS] = {
    const CELL: ContextCell = ContextCell(UnsafeCell::new(0));
    [CELL; MAX_TASKS]
};

/// Record `pid`'s suspended kernel context (parked-shell spawn path).
pub fn store_context(pid: usize, context: usize) {
    // SAFETY: See ContextCell.
    unsafe { *CONTEXTS[pid].0.get() = context };
}

pub fn context(pid: usize) -> usize {
    // SAFETY: See ContextCell.
    unsafe { *CONTEXTS[pid].0.get() }
}

fn context_ptr(pid: usize) -> *mut usize {
    CONTEXTS[pid].0.get()
}

/// True if `tid`'s foreground process is parked on an unfired latch.
fn is_parked(tid: usize) -> bool {
    terminal::line_wait(tid).is_parked() || rtc::wait_slot(tid).is_parked()
}

/// Choose the terminal to run next: strict rotation, skipping parked or
/// vacant terminals. Falls back to `current` when nothing else is ready.
pub fn pick_next(current: usize) -> usize {
    for step in 1..=terminal::NUM_TERMINALS {
        let candidate = (current + step) % terminal::NUM_TERMINALS;
        if terminal::foreground(candidate).is_some() && !is_parked(candidate) {
            return candidate;
        }
    }
    current
}

/// The timer-tick scheduler body. Runs in interrupt context (IF clear).
pub fn tick() {
    let current_tid = terminal::current_index();
    let next_tid = pick_next(current_tid);
    if next_tid == current_tid {
        return;
    }

    let Some(next_pid) = terminal::foreground(next_tid) else {
        return;
    };
    let Some(current_pid) = process::current_pid() else {
        return;
    };
    if next_pid == current_pid {
        return;
    }

    terminal::set_current_index(next_tid);
    PAGING.lock().load(next_pid);
    arch::set_kernel_stack(kernel_stack_top(next_pid));
    process::set_current(next_pid);

    // SAFETY: Both slots hold contexts produced by this switch or by the
    // parked-shell spawn; interrupts are masked for the whole handler.
    unsafe {
        arch::switch_context(context_ptr(current_pid), context(next_pid));
    }
    // Running again: some later tick switched back to this stack.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_terminals() {
        for tid in 0..terminal::NUM_TERMINALS {
            terminal::clear_foreground(tid);
            terminal::line_wait(tid).clear();
            rtc::wait_slot(tid).clear();
        }
    }

    #[test]
    fn rotation_is_strict_round_robin() {
        let _arch = crate::arch::test_control::lock_arch();
        reset_terminals();
        terminal::set_foreground(0, 0);
        terminal::set_foreground(1, 1);
        terminal::set_foreground(2, 2);

        assert_eq!(pick_next(0), 1);
        assert_eq!(pick_next(1), 2);
        assert_eq!(pick_next(2), 0);
        reset_terminals();
    }

    #[test]
    fn parked_and_vacant_terminals_are_skipped() {
        let _arch = crate::arch::test_control::lock_arch();
        reset_terminals();
        terminal::set_foreground(0, 0);
        terminal::set_foreground(1, 1);
        terminal::set_foreground(2, 2);

        // Terminal 1's reader is parked mid-line.
        terminal::line_wait(1).parked_for_test();
        assert_eq!(pick_next(0), 2);

        // Terminal 2 parked on the RTC as well: nothing else runnable.
        rtc::wait_slot(2).parked_for_test();
        assert_eq!(pick_next(0), 0);

        // A vacant terminal never wins.
        reset_terminals();
        terminal::set_foreground(0, 4);
        assert_eq!(pick_next(0), 0);
        reset_terminals();
    }

    #[test]
    fn tick_switches_paging_stack_and_current() {
        let _arch = crate::arch::test_control::lock_arch();
        reset_terminals();
        crate::mm::PAGING.lock().init_all_slots();
        terminal::set_foreground(0, 0);
        terminal::set_foreground(1, 1);
        terminal::set_foreground(2, 2);
        terminal::set_current_index(0);
        process::set_current(0);
        store_context(1, 0xAAA0);

        tick();

        assert_eq!(terminal::current_index(), 1);
        assert_eq!(process::current_pid(), Some(1));
        assert_eq!(
            crate::arch::test_control::last_cr3(),
            crate::mm::PAGING.lock().directory_address(1)
        );
        assert_eq!(
            crate::arch::test_control::last_kernel_stack(),
            kernel_stack_top(1)
        );
        assert_eq!(crate::arch::test_control::last_switch_load(), 0xAAA0);

        process::clear_current_for_tests();
        reset_terminals();
    }
}
