//! Rust-heap region
//!
//! Backs the `alloc` crate on bare metal through the crate-level
//! `linked_list_allocator` global. Distinct from the slab region, which
//! serves the malloc/free syscall surface.

/// Heap size for kernel-internal allocations.
pub const HEAP_SIZE: usize = 1024 * 1024;

#[cfg(target_os = "none")]
static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[cfg(target_os = "none")]
pub fn init() {
    let start = &raw mut HEAP_MEMORY as *mut u8;
    // SAFETY: HEAP_MEMORY is a dedicated static handed to the allocator
    // exactly once, before any allocation happens.
    unsafe {
        crate::get_allocator().lock().init(start, HEAP_SIZE);
    }
    log::info!(target: "mm", "kernel heap: {} KiB", HEAP_SIZE / 1024);
}

/// Host builds use the system allocator; nothing to do.
#[cfg(not(target_os = "none"))]
pub fn init() {}
