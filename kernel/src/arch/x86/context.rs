// Kernel context switching and ring transitions
//
// A suspended kernel context is a stack-pointer snapshot: the four
// callee-saved registers pushed onto the owning kernel stack, with the
// return address above them. Three consumers share the shape:
//
// - the scheduler's per-tick switch between terminal foreground processes,
// - `run_user`, which parks the caller's context so a child's halt can
//   resume it with the child's status as the return value,
// - prepared initial contexts for the parked root shells, whose first
//   "resume" falls through a trampoline straight into user mode.

use core::arch::naked_asm;

/// Swap kernel stacks: park the current context in `*save`, resume `load`.
///
/// # Safety
///
/// `load` must be a context snapshot previously produced by this function or
/// by [`prepare_initial_context`], on a live kernel stack.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(save: *mut usize, load: usize) {
    naked_asm!(
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "mov edx, [esp + 24]", // load
        "mov eax, [esp + 20]", // save
        "mov [eax], esp",
        "mov esp, edx",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
    );
}

/// Build the initial suspended context for a root shell that has never run.
///
/// The snapshot resumes through [`initial_entry`], which drops into user
/// mode at `entry` with the given user stack pointer.
pub fn prepare_initial_context(kstack_top: usize, entry: usize, user_esp: usize) -> usize {
    let words = [
        0usize, // edi
        0,      // esi
        0,      // ebx
        0,      // ebp
        initial_entry as usize,
        entry,
        user_esp,
    ];
    let base = kstack_top - core::mem::size_of_val(&words);
    // SAFETY: The caller owns the target kernel stack and the slot is not
    // yet visible to the scheduler; the seven words fit below the stack top.
    unsafe {
        core::ptr::copy_nonoverlapping(words.as_ptr(), base as *mut usize, words.len());
    }
    base
}

/// Resume target for prepared contexts: pops the entry point and user stack
/// left on the kernel stack and irets to ring 3 with IF forced set.
#[unsafe(naked)]
extern "C" fn initial_entry() {
    naked_asm!(
        "pop ecx", // entry point
        "pop edx", // user stack pointer
        "mov ax, 0x2B",
        "mov ds, ax",
        "mov es, ax",
        "push 0x2B",
        "push edx",
        "pushfd",
        "or dword ptr [esp], 0x200",
        "push 0x23",
        "push ecx",
        "iretd",
    );
}

/// Enter a user program, parking the calling kernel context in
/// `*resume_slot` first. Returns, eventually, with the status word a later
/// [`return_to_context`] delivers -- the contract behind a child's halt
/// reappearing as the parent's `execute` return value.
///
/// # Safety
///
/// `entry`/`user_esp` must lie in the current address space's user window;
/// TSS.ESP0 must already name the child's kernel stack.
#[unsafe(naked)]
pub unsafe extern "C" fn run_user(entry: usize, user_esp: usize, resume_slot: *mut usize) -> usize {
    naked_asm!(
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "mov eax, [esp + 28]", // resume_slot
        "mov [eax], esp",
        "mov ecx, [esp + 20]", // entry
        "mov edx, [esp + 24]", // user_esp
        "mov ax, 0x2B",
        "mov ds, ax",
        "mov es, ax",
        "push 0x2B",
        "push edx",
        "pushfd",
        "or dword ptr [esp], 0x200",
        "push 0x23",
        "push ecx",
        "iretd",
    );
}

/// Resume a context parked by [`run_user`], making that `run_user` call
/// return `status`. Never returns to the caller.
///
/// # Safety
///
/// `resume_sp` must be a snapshot produced by `run_user` on a kernel stack
/// that is still intact (the owning process blocked in `execute`).
#[unsafe(naked)]
pub unsafe extern "C" fn return_to_context(resume_sp: usize, status: usize) -> ! {
    naked_asm!(
        "mov eax, [esp + 8]", // status
        "mov ecx, [esp + 4]", // resume_sp
        "mov esp, ecx",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
    );
}

