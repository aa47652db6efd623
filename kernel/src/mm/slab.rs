//! Slab object caches
//!
//! The 4 MiB region at 32 MiB is carved into eight size caches of 128 pages
//! each. Every page is covered by a bitmap (one bit per object) behind its
//! own spin lock; an object's address encodes everything `free` needs: bits
//! 22..12 select the page (and therefore the cache), the low 12 bits the
//! object within it.
//!
//! The allocator itself only does arithmetic and bitmap bookkeeping -- it
//! never touches the region -- so callers decide how the memory becomes
//! visible (see `mm::kmalloc`). Requests over [`MAX_OBJECT_SIZE`] fall
//! through to the page allocator, which is a stub that always refuses.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use super::{CACHE_BASE, CACHE_END, PAGE_SIZE};

/// Object sizes, one cache per entry.
pub const OBJECT_SIZES: [usize; 8] = [1, 4, 8, 16, 32, 64, 256, 512];

/// Largest slab-served request; anything bigger goes to the page allocator.
pub const MAX_OBJECT_SIZE: usize = 512;

/// Pages per cache. 8 caches x 128 pages x 4 KiB = the whole 4 MiB region.
pub const PAGES_PER_CACHE: usize = 128;

/// Bitmap bytes covering one page at the smallest object size.
const BITMAP_BYTES: usize = PAGE_SIZE / 8;

struct PageBitmap {
    bits: [u8; BITMAP_BYTES],
}

impl PageBitmap {
    const fn new() -> Self {
        PageBitmap {
            bits: [0; BITMAP_BYTES],
        }
    }

    /// Find and claim the first clear bit below `limit`.
    fn claim_first_free(&mut self, limit: usize) -> Option<usize> {
        for bit in 0..limit {
            let byte = bit / 8;
            let mask = 1u8 << (bit % 8);
            if self.bits[byte] & mask == 0 {
                self.bits[byte] |= mask;
                return Some(bit);
            }
        }
        None
    }

    fn release(&mut self, bit: usize) {
        self.bits[bit / 8] &= !(1u8 << (bit % 8));
    }

    fn is_claimed(&self, bit: usize) -> bool {
        self.bits[bit / 8] & (1u8 << (bit % 8)) != 0
    }
}

struct Cache {
    object_size: usize,
    pages: [Mutex<PageBitmap>; PAGES_PER_CACHE],
}

impl Cache {
    const fn new(object_size: usize) -> Self {
        Cache {
            object_size,
            pages: [const { Mutex::new(PageBitmap::new()) }; PAGES_PER_CACHE],
        }
    }

    fn objects_per_page(&self) -> usize {
        PAGE_SIZE / self.object_size
    }
}

/// The eight-cache allocator over the slab region.
pub struct SlabAllocator {
    caches: [Cache; OBJECT_SIZES.len()],
}

impl SlabAllocator {
    pub const fn new() -> Self {
        SlabAllocator {
            caches: [
                Cache::new(1),
                Cache::new(4),
                Cache::new(8),
                Cache::new(16),
                Cache::new(32),
                Cache::new(64),
                Cache::new(256),
                Cache::new(512),
            ],
        }
    }

    fn cache_index_for(size: usize) -> Option<usize> {
        OBJECT_SIZES.iter().position(|&object| size <= object)
    }

    /// Physical base address of page `page` of cache `cache`.
    fn page_base(cache: usize, page: usize) -> usize {
        CACHE_BASE + (cache * PAGES_PER_CACHE + page) * PAGE_SIZE
    }

    /// Allocate an object of at least `size` bytes; returns its physical
    /// address, aligned to the cache's object size.
    pub fn alloc(&self, size: usize) -> Option<usize> {
        let cache_index = Self::cache_index_for(size)?;
        let cache = &self.caches[cache_index];
        let limit = cache.objects_per_page();

        for (page_index, page) in cache.pages.iter().enumerate() {
            let claimed = page.lock().claim_first_free(limit);
            if let Some(object) = claimed {
                return Some(
                    Self::page_base(cache_index, page_index) + object * cache.object_size,
                );
            }
        }
        None
    }

    /// Release the object at `pa`, decoding cache and slot from the address.
    pub fn free(&self, pa: usize) -> KernelResult<()> {
        if !(CACHE_BASE..CACHE_END).contains(&pa) {
            return Err(KernelError::InvalidArgument {
                what: "slab pointer",
            });
        }
        let page_global = (pa & 0x003F_F000) >> 12;
        let cache_index = page_global / PAGES_PER_CACHE;
        let page_index = page_global % PAGES_PER_CACHE;
        let cache = &self.caches[cache_index];
        let object = (pa & (PAGE_SIZE - 1)) / cache.object_size;

        let mut bitmap = cache.pages[page_index].lock();
        if !bitmap.is_claimed(object) {
            return Err(KernelError::InvalidArgument {
                what: "slab double free",
            });
        }
        bitmap.release(object);
        Ok(())
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Buddy page allocator for requests beyond the slab sizes. Not wired to
/// backing memory; every request is refused.
pub fn page_alloc(_order: u8) -> Option<usize> {
    None
}

pub fn page_free(_pa: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::boxed::Box;
    use std::vec::Vec;

    #[test]
    fn size_class_rounding() {
        assert_eq!(SlabAllocator::cache_index_for(0), Some(0));
        assert_eq!(SlabAllocator::cache_index_for(1), Some(0));
        assert_eq!(SlabAllocator::cache_index_for(2), Some(1));
        assert_eq!(SlabAllocator::cache_index_for(65), Some(6));
        assert_eq!(SlabAllocator::cache_index_for(512), Some(7));
        assert_eq!(SlabAllocator::cache_index_for(513), None);
    }

    #[test]
    fn alloc_stays_in_region_and_aligned() {
        let slab = Box::new(SlabAllocator::new());
        for &size in &OBJECT_SIZES {
            let pa = slab.alloc(size).unwrap();
            assert!((CACHE_BASE..CACHE_END).contains(&pa));
            assert_eq!(pa % size, 0, "size {} misaligned", size);
        }
    }

    #[test]
    fn outstanding_allocations_are_disjoint() {
        let slab = Box::new(SlabAllocator::new());
        let mut taken: Vec<(usize, usize)> = Vec::new();
        for _ in 0..64 {
            let pa = slab.alloc(48).unwrap(); // rounds to the 64-byte cache
            for &(start, len) in &taken {
                assert!(pa + 64 <= start || start + len <= pa);
            }
            taken.push((pa, 64));
        }
    }

    #[test]
    fn free_makes_the_slot_reusable() {
        let slab = Box::new(SlabAllocator::new());
        let first = slab.alloc(512).unwrap();
        slab.free(first).unwrap();
        let second = slab.alloc(512).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn free_rejects_bad_pointers() {
        let slab = Box::new(SlabAllocator::new());
        assert!(slab.free(CACHE_BASE - 4).is_err());
        assert!(slab.free(CACHE_END).is_err());
        // Double free of a never-allocated slot.
        assert!(slab.free(CACHE_BASE).is_err());
    }

    #[test]
    fn address_decode_matches_layout() {
        let slab = Box::new(SlabAllocator::new());
        // First object of the 256-byte cache lives 6 caches in.
        let pa = slab.alloc(256).unwrap();
        assert_eq!(pa, CACHE_BASE + 6 * PAGES_PER_CACHE * PAGE_SIZE);
        slab.free(pa).unwrap();
    }

    #[test]
    fn cache_exhaustion_reports_none() {
        let slab = Box::new(SlabAllocator::new());
        // The 512-byte cache holds 128 pages x 8 objects.
        let total = PAGES_PER_CACHE * (PAGE_SIZE / 512);
        for _ in 0..total {
            assert!(slab.alloc(512).is_some());
        }
        assert_eq!(slab.alloc(512), None);
    }

    #[test]
    fn oversized_requests_hit_the_stub() {
        assert_eq!(page_alloc(0), None);
        assert_eq!(page_alloc(5), None);
    }
}
