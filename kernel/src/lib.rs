//! Triton kernel library
//!
//! Core of a small preemptively-multitasked kernel for 32-bit x86: three
//! text-mode virtual terminals, a fixed table of at most six processes, a
//! numbered system-call surface on `int 0x80`, and a boot-block file system
//! loaded as a multiboot module.
//!
//! The crate builds two ways:
//! - freestanding (`target_os = "none"`): the real kernel, with the platform
//!   shim in [`arch`] providing port I/O, control-register access, and the
//!   interrupt/context-switch assembly;
//! - hosted: everything outside the shim is platform-independent and runs
//!   under the standard test harness against a recording arch double.

#![no_std]

extern crate alloc;

// On bare metal the Rust heap is backed by a fixed region handed to
// linked_list_allocator at boot. On the host target (unit tests, tooling)
// the system allocator is used so test code can allocate normally.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Get a reference to the bare-metal heap allocator.
#[cfg(target_os = "none")]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

#[macro_use]
pub mod print;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod interrupts;
pub mod logging;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;

// Re-exports used by the boot path and the integration tests.
pub use error::{KernelError, KernelResult};
pub use process::ProcessId;
