//! Kernel binary
//!
//! The multiboot entry lives in the library's arch layer; this crate
//! contributes the panic handler for freestanding builds. Hosted builds of
//! the binary exist only so the workspace compiles everywhere; the kernel
//! proper is exercised through the library tests.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

use triton_kernel as _;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    triton_kernel::println!("kernel panic: {}", info);
    triton_kernel::drivers::terminal::fatal_banner("kernel panic")
}

#[cfg(not(target_os = "none"))]
fn main() {
    println!(
        "triton-kernel {}: freestanding kernel image; build for the bare-metal target",
        env!("CARGO_PKG_VERSION")
    );
}
