//! Freestanding 32-bit x86 implementation of the platform shim

mod boot;
mod context;
mod gdt;
mod io;
mod linkage;
mod serial;

use core::arch::asm;
use core::fmt;

pub use context::{prepare_initial_context, return_to_context, run_user, switch_context};
pub use io::{inb, io_wait, outb};
pub use linkage::vector_stub;

// ---------------------------------------------------------------------------
// Interrupt flag
// ---------------------------------------------------------------------------

pub fn cli() {
    // SAFETY: Masking maskable interrupts is always permitted in ring 0 and
    // has no memory effects beyond ordering, which the compiler barrier
    // (nomem is deliberately not used) preserves.
    unsafe {
        asm!("cli", options(nostack, preserves_flags));
    }
}

pub fn sti() {
    // SAFETY: See `cli`. Unmasking is the symmetric operation.
    unsafe {
        asm!("sti", options(nostack, preserves_flags));
    }
}

pub fn save_flags() -> usize {
    let flags: usize;
    // SAFETY: pushfd/pop reads EFLAGS into a register; the stack pointer is
    // restored by the pop.
    unsafe {
        asm!("pushfd", "pop {}", out(reg) flags);
    }
    flags
}

pub fn restore_flags(flags: usize) {
    // SAFETY: push/popfd writes EFLAGS from the given value. Callers only
    // pass values previously obtained from `save_flags`.
    unsafe {
        asm!("push {}", "popfd", in(reg) flags);
    }
}

pub fn interrupts_enabled() -> bool {
    save_flags() & super::EFLAGS_IF != 0
}

/// Enable interrupts and halt until the next one arrives.
///
/// Used by the parked blocking-read loops: the timer keeps firing, the
/// scheduler keeps rotating, and the loop re-checks its latch on resume.
pub fn wait_for_interrupt() {
    // SAFETY: sti;hlt is the canonical idle sequence; the one-instruction
    // shadow after sti guarantees no interrupt is lost before the halt.
    unsafe {
        asm!("sti", "hlt", options(nostack, preserves_flags));
    }
}

pub fn halt_loop() -> ! {
    loop {
        // SAFETY: hlt with interrupts masked parks the CPU permanently;
        // this is the fatal-error termination path.
        unsafe {
            asm!("cli", "hlt", options(nostack, preserves_flags));
        }
    }
}

// ---------------------------------------------------------------------------
// Control registers
// ---------------------------------------------------------------------------

pub fn load_cr3(directory_pa: usize) {
    // SAFETY: Writing CR3 installs a new page directory and flushes the
    // non-global TLB. The caller guarantees `directory_pa` addresses a
    // 4 KiB-aligned, fully initialized page directory.
    unsafe {
        asm!("mov cr3, {}", in(reg) directory_pa, options(nostack, preserves_flags));
    }
}

pub fn reload_cr3() {
    // SAFETY: Rewriting CR3 with its current value is the IA-32 full TLB
    // flush for non-global entries; no state other than the TLB changes.
    unsafe {
        asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
}

pub fn current_cr3() -> usize {
    let cr3: usize;
    // SAFETY: Reading CR3 is side-effect free in ring 0.
    unsafe {
        asm!("mov {}, cr3", out(reg) cr3, options(nostack, preserves_flags));
    }
    cr3
}

pub fn read_cr2() -> usize {
    let cr2: usize;
    // SAFETY: CR2 holds the faulting linear address after a page fault;
    // reading it is side-effect free.
    unsafe {
        asm!("mov {}, cr2", out(reg) cr2, options(nostack, preserves_flags));
    }
    cr2
}

/// Turn on 4 MiB pages (CR4.PSE) and paging with supervisor write protect
/// (CR0.PG, CR0.WP). Called once at boot, after CR3 holds the first
/// directory.
pub fn enable_paging() {
    // SAFETY: The boot path guarantees CR3 was loaded with an identity
    // mapping covering the executing kernel before paging is switched on,
    // so the instruction stream stays mapped across the CR0 write.
    unsafe {
        asm!(
            "mov {tmp}, cr4",
            "or {tmp}, 0x10",        // PSE
            "mov cr4, {tmp}",
            "mov {tmp}, cr0",
            "or {tmp}, 0x80010000",  // PG | WP
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        );
    }
}

// ---------------------------------------------------------------------------
// Descriptor tables
// ---------------------------------------------------------------------------

pub fn init() {
    gdt::init();
}

pub use gdt::{get_kernel_stack, set_kernel_stack};

/// Load the IDTR with a table image built by the interrupt module.
pub fn install_idt(base: usize, limit: u16) {
    #[repr(C, packed)]
    struct DescriptorPointer {
        limit: u16,
        base: u32,
    }
    let pointer = DescriptorPointer {
        limit,
        base: base as u32,
    };
    // SAFETY: The pointer references a static, fully initialized IDT image
    // whose lifetime covers all further execution.
    unsafe {
        asm!("lidt [{}]", in(reg) &pointer, options(nostack, preserves_flags));
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

pub fn console_init() {
    serial::init();
}

pub fn console_write_fmt(args: fmt::Arguments) {
    serial::write_fmt(args);
}
