//! Memory management
//!
//! Fixed physical layout, per-process paging, the slab allocator behind the
//! malloc/free syscalls, and the Rust-heap region for `alloc`.
//!
//! Physical map:
//!
//! | Range             | Use                                      |
//! |-------------------|------------------------------------------|
//! | 0xB8000           | text-mode video memory                   |
//! | 1 MiB - 2 MiB     | DMA channel blocks                       |
//! | 4 MiB - 8 MiB     | kernel image + per-process kernel stacks |
//! | 8 MiB + id*4 MiB  | per-process user page                    |
//! | 32 MiB - 36 MiB   | slab object caches                       |

pub mod heap;
pub mod paging;
pub mod slab;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub const PAGE_SIZE: usize = 0x1000;
pub const LARGE_PAGE_SIZE: usize = 0x40_0000;

/// Text-mode video memory.
pub const VIDEO_MEM_BASE: usize = 0xB8000;

/// DMA channel window, identity mapped in the kernel page table.
pub const DMA_BLOCK_START: usize = 0x10_0000;
pub const DMA_BLOCK_END: usize = 0x20_0000;

/// Kernel 4 MiB super-page.
pub const KERNEL_BASE: usize = 0x40_0000;
pub const KERNEL_END: usize = 0x80_0000;

/// Slab cache region.
pub const CACHE_BASE: usize = 0x200_0000;
pub const CACHE_END: usize = 0x240_0000;

/// First per-process user page; process `id` gets `USER_PHYS_BASE + id*4MiB`.
pub const USER_PHYS_BASE: usize = KERNEL_END;

/// User window: one 4 MiB super-page at 128 MiB.
pub const USER_VIRT_BASE: usize = 0x0800_0000;
pub const USER_VIRT_END: usize = USER_VIRT_BASE + LARGE_PAGE_SIZE;

/// Program image load address and initial user stack pointer.
pub const USER_IMAGE_VIRT: usize = 0x0804_8000;
pub const USER_STACK_TOP: usize = USER_VIRT_END - 4;

/// User-visible video page at 132 MiB.
pub const USER_VIDEO_VIRT: usize = 0x084B_8000;

/// User heap window; slab pages appear here offset from their physical home.
pub const USER_HEAP_BASE: usize = 0x0880_0000;
pub const USER_HEAP_OFFSET: usize = USER_HEAP_BASE - CACHE_BASE;

/// True iff `addr` lies inside the user super-page window.
pub fn user_window_contains(addr: usize) -> bool {
    (USER_VIRT_BASE..USER_VIRT_END).contains(&addr)
}

bitflags::bitflags! {
    /// Allocation flags for [`kmalloc`]/[`kfree`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KmemFlags: u32 {
        /// Mask interrupts around the whole operation (handler-safe path).
        const ATOMIC = 1 << 0;
        /// Identity-map the object into every process's directory.
        const KERNEL = 1 << 1;
        /// Map the object into the current process's heap window.
        const USER = 1 << 2;
    }
}

/// Global paging arena; one page-directory bundle per process slot.
pub static PAGING: Mutex<paging::PagingArena> = Mutex::new(paging::PagingArena::new());

/// Global slab allocator over the cache region.
pub static SLAB: slab::SlabAllocator = slab::SlabAllocator::new();

/// Boot-time memory setup: heap region, paging arena, first directory.
pub fn init() {
    heap::init();
    let mut paging = PAGING.lock();
    paging.init_all_slots();
    paging.load(0);
    log::info!(target: "mm", "paging arena initialized, directory 0 loaded");
}

fn kmalloc_inner(size: usize, flags: KmemFlags) -> KernelResult<usize> {
    let pa = if size <= slab::MAX_OBJECT_SIZE {
        SLAB.alloc(size)
            .ok_or(KernelError::ResourceExhausted { resource: "slab" })?
    } else {
        // Large requests go to the page allocator, which is a stub.
        slab::page_alloc(order_for(size)).ok_or(KernelError::ResourceExhausted {
            resource: "page allocator",
        })?
    };

    // The paging lock is shared with the timer tick; take it only with
    // interrupts masked.
    crate::arch::without_interrupts(|| {
        let mut paging = PAGING.lock();
        if flags.contains(KmemFlags::KERNEL) {
            for pid in 0..crate::process::MAX_TASKS {
                paging.map_page(
                    pa,
                    pa,
                    pid,
                    paging::MapFlags::FOUR_KB | paging::MapFlags::SLAB | paging::MapFlags::KERNEL,
                )?;
            }
            Ok(pa)
        } else if flags.contains(KmemFlags::USER) {
            let pid = crate::process::current_pid().ok_or(KernelError::NotInitialized {
                subsystem: "process table",
            })?;
            let va = pa + USER_HEAP_OFFSET;
            paging.map_page(
                va,
                pa,
                pid,
                paging::MapFlags::FOUR_KB | paging::MapFlags::SLAB | paging::MapFlags::USER,
            )?;
            Ok(va)
        } else {
            Err(KernelError::InvalidArgument {
                what: "kmalloc flags",
            })
        }
    })
}

/// Allocate `size` bytes of dynamic kernel memory.
///
/// Returns the virtual address visible to the caller named by `flags`
/// (identity for `KERNEL`, the 136 MiB heap window for `USER`).
pub fn kmalloc(size: usize, flags: KmemFlags) -> KernelResult<usize> {
    if flags.contains(KmemFlags::ATOMIC) {
        crate::arch::without_interrupts(|| kmalloc_inner(size, flags))
    } else {
        kmalloc_inner(size, flags)
    }
}

fn kfree_inner(va: usize, flags: KmemFlags) -> KernelResult<()> {
    let pa = if flags.contains(KmemFlags::USER) {
        va.wrapping_sub(USER_HEAP_OFFSET)
    } else {
        va
    };

    if (CACHE_BASE..CACHE_END).contains(&pa) {
        SLAB.free(pa)?;
    } else {
        return Err(KernelError::InvalidArgument {
            what: "kfree pointer",
        });
    }

    crate::arch::without_interrupts(|| {
        let mut paging = PAGING.lock();
        if flags.contains(KmemFlags::KERNEL) {
            for pid in 0..crate::process::MAX_TASKS {
                paging.mark_page_not_present(pa, pid);
            }
            Ok(())
        } else if flags.contains(KmemFlags::USER) {
            let pid = crate::process::current_pid().ok_or(KernelError::NotInitialized {
                subsystem: "process table",
            })?;
            paging.mark_page_not_present(va, pid);
            Ok(())
        } else {
            Err(KernelError::InvalidArgument { what: "kfree flags" })
        }
    })
}

/// Release memory from [`kmalloc`]. The unmapping mirrors the allocation
/// flags; backing pages are never returned to a free list (the region is a
/// fixed carve-out).
pub fn kfree(va: usize, flags: KmemFlags) -> KernelResult<()> {
    if flags.contains(KmemFlags::ATOMIC) {
        crate::arch::without_interrupts(|| kfree_inner(va, flags))
    } else {
        kfree_inner(va, flags)
    }
}

fn order_for(size: usize) -> u8 {
    let mut order = 0;
    let mut pages = size.div_ceil(PAGE_SIZE);
    while pages > 1 {
        pages = pages.div_ceil(2);
        order += 1;
    }
    order
}
