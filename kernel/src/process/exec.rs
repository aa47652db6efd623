//! execute and halt
//!
//! `execute` claims a slot, loads the image into that slot's user page,
//! points the TSS at the slot's kernel stack, parks the caller's kernel
//! context, and irets to ring 3. The parked context is the rendezvous:
//! when the child halts (or is killed), the unwind resumes it with the
//! child's status as `execute`'s return value.
//!
//! Root shells (one per terminal) have no parent context; halting one
//! immediately re-executes `shell` in the same slot so a terminal never
//! goes idle.

use core::cell::UnsafeCell;

use crate::arch;
use crate::drivers::terminal;
use crate::error::{KernelError, KernelResult};
use crate::mm::{self, PAGING};

use super::{
    files, kernel_stack_top, loader, ProcessId, MAX_COMMAND_LEN, MAX_TASKS, TABLE,
};

/// Status reported when a process dies on a CPU exception.
pub const EXCEPTION_STATUS: usize = 256;

/// A kernel-context word written by the context-switch assembly.
///
/// Lives outside the PCB mutex because the saving side (naked assembly)
/// stores through a raw pointer while no lock can be held.
#[repr(transparent)]
struct ContextCell(UnsafeCell<usize>);

// SAFETY: Cells are only accessed with interrupts masked on a single CPU:
// the execute/halt pair and the scheduler are mutually exclusive.
unsafe impl Sync for ContextCell {}

impl ContextCell {
    const fn new() -> Self {
        ContextCell(UnsafeCell::new(0))
    }
}

/// Where `run_user` parks the caller when slot `pid` starts executing.
static EXEC_RESUME: [ContextCell; MAX_TASKS] = [const { ContextCell::new() }; MAX_TASKS];

fn exec_resume_ptr(pid: usize) -> *mut usize {
    EXEC_RESUME[pid].0.get()
}

fn exec_resume(pid: usize) -> usize {
    // SAFETY: Read with interrupts masked; the writer (run_user) completed
    // before the owning process could possibly halt.
    unsafe { *EXEC_RESUME[pid].0.get() }
}

/// Parsed command line: a bounded program name and the argument tail.
pub struct Command<'a> {
    name: [u8; MAX_COMMAND_LEN],
    name_len: usize,
    pub tail: &'a [u8],
}

impl<'a> Command<'a> {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }
}

/// Split a command line: leading spaces, a program name of at most 32
/// bytes (longer is a hard failure, not a truncation), then the tail with
/// its leading spaces stripped.
pub fn parse_command(command: &[u8]) -> KernelResult<Command<'_>> {
    let start = command
        .iter()
        .position(|&b| b != b' ')
        .ok_or(KernelError::InvalidArgument { what: "command" })?;
    let rest = &command[start..];
    let name_end = rest
        .iter()
        .position(|&b| b == b' ' || b == 0)
        .unwrap_or(rest.len());
    if name_end == 0 || name_end > MAX_COMMAND_LEN {
        return Err(KernelError::InvalidArgument {
            what: "program name",
        });
    }

    let mut name = [0u8; MAX_COMMAND_LEN];
    name[..name_end].copy_from_slice(&rest[..name_end]);

    let after = &rest[name_end..];
    let tail_start = after
        .iter()
        .position(|&b| b != b' ')
        .unwrap_or(after.len());
    let mut tail = &after[tail_start..];
    if let Some(nul) = tail.iter().position(|&b| b == 0) {
        tail = &tail[..nul];
    }

    Ok(Command {
        name,
        name_len: name_end,
        tail,
    })
}

/// The execute system call.
///
/// Returns the child's halt status (0..255), [`EXCEPTION_STATUS`] if the
/// child died on an exception, or -1 on a bad image or slot exhaustion.
pub fn system_execute(command: &[u8]) -> isize {
    match execute_inner(command) {
        Ok(status) => status,
        Err(error) => {
            log::debug!(target: "process", "execute failed: {}", error);
            error.to_syscall()
        }
    }
}

fn execute_inner(command: &[u8]) -> KernelResult<isize> {
    arch::cli();

    let parsed = parse_command(command)?;
    // Validate the image before any state is committed; a bad image must
    // not consume a slot.
    let (inode, entry) = loader::read_header(parsed.name())?;

    let pid = TABLE.alloc()?;
    let caller = super::current_pid();
    // A caller that is this very slot means the slot was just vacated by a
    // halting root shell; the restart is parentless too.
    let root = caller.is_none() || caller == Some(pid);
    let terminal_id = if root {
        pid
    } else {
        let parent = caller.unwrap();
        TABLE.with(parent, |pcb| pcb.terminal)
    };

    TABLE.with(pid, |pcb| {
        pcb.parent = if root { None } else { caller.map(ProcessId) };
        pcb.terminal = terminal_id;
        pcb.set_args(parsed.tail);
    });
    terminal::set_foreground(terminal_id, pid);

    {
        let mut paging = PAGING.lock();
        paging.init_slot(pid);
        paging.load(pid);
    }
    if let Err(error) = loader::load_program(inode) {
        // Give the slot back and reinstate the caller's world.
        TABLE.deactivate(pid);
        if let Some(parent) = caller {
            terminal::set_foreground(terminal_id, parent);
            PAGING.lock().load(parent);
        }
        return Err(error);
    }

    arch::set_kernel_stack(kernel_stack_top(pid));
    super::set_current(pid);

    // Park this kernel context in the child's resume cell and drop to ring
    // 3. On hardware this call returns only when the child halts.
    let status =
        unsafe { arch::run_user(entry, mm::USER_STACK_TOP, exec_resume_ptr(pid)) };
    Ok(status as isize)
}

/// The halt system call; also the exception-kill path.
///
/// Tears the process down and unwinds into the parent's parked `execute`
/// context. For a parentless root shell, re-executes `shell` in the same
/// slot instead. The return value is only observable on the host double
/// (hardware never returns here).
pub fn system_halt(status: usize) -> isize {
    arch::cli();

    let Some(pid) = super::current_pid() else {
        return -1;
    };

    if files::close_all().is_err() {
        log::warn!(target: "process", "halt: descriptor teardown failed for {}", pid);
    }

    let (parent, terminal_id) = TABLE.with(pid, |pcb| (pcb.parent, pcb.terminal));

    {
        let mut paging = PAGING.lock();
        paging.clear_vidmap(pid);
    }

    match parent {
        Some(ProcessId(parent_pid)) => {
            terminal::set_foreground(terminal_id, parent_pid);
            {
                let mut paging = PAGING.lock();
                paging.load(parent_pid);
            }
            arch::set_kernel_stack(kernel_stack_top(parent_pid));
            TABLE.deactivate(pid);
            super::set_current(parent_pid);

            unwind_to_parent(exec_resume(pid), status)
        }
        None => {
            // Root shell: free the slot and restart the shell there.
            TABLE.deactivate(pid);
            system_execute(b"shell");
            -1
        }
    }
}

#[cfg(target_os = "none")]
fn unwind_to_parent(resume_sp: usize, status: usize) -> isize {
    // SAFETY: The parent is blocked inside run_user on its own kernel
    // stack; the resume cell holds that context.
    unsafe { arch::return_to_context(resume_sp, status) }
}

/// The host double records the unwind and lets halt return.
#[cfg(not(target_os = "none"))]
fn unwind_to_parent(resume_sp: usize, status: usize) -> isize {
    // SAFETY: Recording double; always safe.
    unsafe { arch::return_to_context(resume_sp, status) };
    0
}

/// Terminate the current process after a user-mode exception.
pub fn exception_kill() -> isize {
    system_halt(EXCEPTION_STATUS)
}

/// Create a root shell for `tid` in the parked state: slot claimed, image
/// loaded, initial kernel context prepared for the scheduler's first
/// switch into it.
pub fn spawn_parked_shell(tid: usize) -> KernelResult<usize> {
    let (inode, entry) = loader::read_header(b"shell")?;
    let pid = TABLE.alloc()?;

    TABLE.with(pid, |pcb| {
        pcb.parent = None;
        pcb.terminal = tid;
    });
    terminal::set_foreground(tid, pid);

    {
        let mut paging = PAGING.lock();
        paging.init_slot(pid);
        paging.load(pid);
    }
    loader::load_program(inode)?;

    let context =
        arch::prepare_initial_context(kernel_stack_top(pid), entry, mm::USER_STACK_TOP);
    crate::sched::store_context(pid, context);

    log::info!(target: "process", "shell {} parked for terminal {}", pid, tid);
    Ok(pid)
}

/// Hand the CPU to the first parked shell. Never returns on hardware.
#[cfg(target_os = "none")]
pub fn boot_into_first_shell() -> ! {
    let pid = terminal::foreground(0).expect("terminal 0 has no shell");
    {
        let mut paging = PAGING.lock();
        paging.load(pid);
    }
    arch::set_kernel_stack(kernel_stack_top(pid));
    super::set_current(pid);
    terminal::set_current_index(0);

    let mut discard = 0usize;
    // SAFETY: The target context was prepared by spawn_parked_shell; the
    // boot stack is abandoned for good.
    unsafe {
        arch::switch_context(&mut discard as *mut usize, crate::sched::context(pid));
    }
    unreachable!("boot context resumed");
}

#[cfg(not(target_os = "none"))]
pub fn boot_into_first_shell() {
    let pid = terminal::foreground(0).expect("terminal 0 has no shell");
    super::set_current(pid);
    terminal::set_current_index(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing() {
        let parsed = parse_command(b"  cat   frame0.txt").unwrap();
        assert_eq!(parsed.name(), b"cat");
        assert_eq!(parsed.tail, b"frame0.txt");

        let bare = parse_command(b"ls").unwrap();
        assert_eq!(bare.name(), b"ls");
        assert_eq!(bare.tail, b"");

        let nul_terminated = parse_command(b"shell\0garbage").unwrap();
        assert_eq!(nul_terminated.name(), b"shell");
        assert_eq!(nul_terminated.tail, b"");

        assert!(parse_command(b"   ").is_err());
        assert!(parse_command(&[b'x'; 40]).is_err());

        // Exactly 32 bytes is the longest accepted name.
        let max = [b'a'; 32];
        assert_eq!(parse_command(&max).unwrap().name().len(), 32);
    }

    #[test]
    fn tail_keeps_interior_spaces() {
        let parsed = parse_command(b"grep  foo bar").unwrap();
        assert_eq!(parsed.name(), b"grep");
        assert_eq!(parsed.tail, b"foo bar");
    }
}
