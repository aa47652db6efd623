//! Platform shim
//!
//! The only assembly and port I/O in the tree. Everything above this module
//! is platform-independent: it sees a small surface of control-register,
//! descriptor-table, context-switch, and I/O operations.
//!
//! Two implementations share that surface:
//! - [`x86`]: the real thing, compiled only for freestanding 32-bit x86;
//! - [`host`]: a recording double used by the unit tests on the build host.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::*;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use host::*;

/// Kernel code segment selector (GDT index 2, RPL 0).
pub const KERNEL_CS: usize = 0x10;
/// Kernel data segment selector (GDT index 3, RPL 0).
pub const KERNEL_DS: usize = 0x18;
/// User code segment selector (GDT index 4, RPL 3).
pub const USER_CS: usize = 0x23;
/// User data segment selector (GDT index 5, RPL 3).
pub const USER_DS: usize = 0x2B;
/// Task state segment selector (GDT index 6).
pub const TSS_SELECTOR: usize = 0x30;

/// EFLAGS interrupt-enable bit.
pub const EFLAGS_IF: usize = 0x200;

/// Run a closure with interrupts masked, restoring the previous state.
///
/// This is the critical-section primitive used everywhere a lock shared with
/// interrupt handlers is taken from non-handler context.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let flags = save_flags();
    cli();
    let ret = f();
    restore_flags(flags);
    ret
}
