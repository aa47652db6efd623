//! Per-process page directories
//!
//! Each process slot owns a directory and three page tables:
//!
//! - a kernel table behind directory entry 0 (4 KiB identity mappings for
//!   the video page and the DMA window),
//! - a vidmap table behind entry 33 (one populated entry, retargeted
//!   between physical video memory and a terminal back buffer),
//! - a cache table behind entry 8 (kernel view of the slab region) and,
//!   when user heap pages are mapped, entry 34 (user view at 136 MiB).
//!
//! Entry 1 is the kernel 4 MiB super-page; entry 32 the process's user
//! super-page at 128 MiB, backed by `8 MiB + id*4 MiB`.
//!
//! Kernel-range entries are stamped from a shared template when a slot is
//! (re)initialized, so every directory agrees on them bit-for-bit. The
//! kernel identity map places these statics at their physical addresses,
//! which is what lets a table's address be written straight into an entry.

use crate::arch;
use crate::error::{KernelError, KernelResult};
use crate::process::MAX_TASKS;

use super::{
    DMA_BLOCK_END, DMA_BLOCK_START, KERNEL_BASE, LARGE_PAGE_SIZE, PAGE_SIZE, USER_PHYS_BASE,
    USER_VIDEO_VIRT, USER_VIRT_BASE, VIDEO_MEM_BASE,
};

pub const ENTRY_COUNT: usize = 1024;

/// Directory index of a virtual address.
pub const fn directory_index(va: usize) -> usize {
    (va >> 22) & 0x3FF
}

/// Page-table index of a virtual address.
pub const fn table_index(va: usize) -> usize {
    (va >> 12) & 0x3FF
}

pub const PDE_KERNEL_TABLE: usize = 0; // 0 - 4 MiB
pub const PDE_KERNEL_PAGE: usize = 1; // 4 - 8 MiB
pub const PDE_CACHE_TABLE: usize = 8; // 32 - 36 MiB
pub const PDE_USER_PAGE: usize = directory_index(USER_VIRT_BASE); // 32
pub const PDE_VIDMAP_TABLE: usize = directory_index(USER_VIDEO_VIRT); // 33

bitflags::bitflags! {
    /// IA-32 directory/table entry bits (the subset this kernel writes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: usize {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const LARGE = 1 << 7;
        const GLOBAL = 1 << 8;
    }
}

/// Default entry values, matching the fixed attribute sets the rest of the
/// kernel assumes (writable supervisor/user, global kernel super-page).
pub const KERNEL_4KB: usize = 0x3;
pub const USER_4KB: usize = 0x7;
pub const KERNEL_4MB: usize = 0x183;
pub const USER_4MB: usize = 0x187;
/// Writable but not present; the reset state of every entry.
pub const BLANK: usize = 0x2;

/// One directory or table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(usize);

impl Entry {
    pub const fn blank() -> Self {
        Entry(BLANK)
    }

    pub const fn new(base: usize, attributes: usize) -> Self {
        Entry((base & !(PAGE_SIZE - 1)) | attributes)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn base(self) -> usize {
        self.0 & !(PAGE_SIZE - 1)
    }

    pub fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    pub fn is_large(self) -> bool {
        self.0 & EntryFlags::LARGE.bits() != 0
    }

    fn clear_present(&mut self) {
        self.0 &= !EntryFlags::PRESENT.bits();
    }
}

/// A 4 KiB-aligned array of 1024 entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [Entry; ENTRY_COUNT],
}

impl PageTable {
    pub const fn empty() -> Self {
        PageTable {
            entries: [Entry::blank(); ENTRY_COUNT],
        }
    }

    pub fn entry(&self, index: usize) -> Entry {
        self.entries[index]
    }

    fn set(&mut self, index: usize, entry: Entry) {
        self.entries[index] = entry;
    }

    fn clear(&mut self) {
        self.entries = [Entry::blank(); ENTRY_COUNT];
    }

    fn address(&self) -> usize {
        self as *const PageTable as usize
    }
}

/// The paging bundle owned by one process slot.
pub struct ProcessPaging {
    directory: PageTable,
    kernel_table: PageTable,
    vidmap_table: PageTable,
    cache_table: PageTable,
}

impl ProcessPaging {
    pub const fn empty() -> Self {
        ProcessPaging {
            directory: PageTable::empty(),
            kernel_table: PageTable::empty(),
            vidmap_table: PageTable::empty(),
            cache_table: PageTable::empty(),
        }
    }

    pub fn directory_address(&self) -> usize {
        self.directory.address()
    }

    pub fn directory_entry(&self, index: usize) -> Entry {
        self.directory.entry(index)
    }

    pub fn vidmap_entry(&self) -> Entry {
        self.vidmap_table.entry(table_index(USER_VIDEO_VIRT))
    }

    pub fn cache_entry(&self, index: usize) -> Entry {
        self.cache_table.entry(index)
    }

    /// Stamp the kernel-range mappings and this slot's user super-page.
    fn reset(&mut self, pid: usize, cache_template: &PageTable) {
        self.kernel_table.clear();
        self.vidmap_table.clear();
        self.directory.clear();
        self.cache_table.entries = cache_template.entries;

        for index in 0..ENTRY_COUNT {
            let pa = index * PAGE_SIZE;
            let mapped = (VIDEO_MEM_BASE..VIDEO_MEM_BASE + PAGE_SIZE).contains(&pa)
                || (DMA_BLOCK_START..DMA_BLOCK_END).contains(&pa);
            if mapped {
                self.kernel_table.set(index, Entry::new(pa, KERNEL_4KB));
            }
        }

        self.directory.set(
            PDE_KERNEL_TABLE,
            Entry::new(self.kernel_table.address(), KERNEL_4KB),
        );
        self.directory
            .set(PDE_KERNEL_PAGE, Entry::new(KERNEL_BASE, KERNEL_4MB));
        self.directory.set(
            PDE_CACHE_TABLE,
            Entry::new(self.cache_table.address(), KERNEL_4KB),
        );
        self.directory.set(
            PDE_USER_PAGE,
            Entry::new(USER_PHYS_BASE + pid * LARGE_PAGE_SIZE, USER_4MB),
        );
    }
}

bitflags::bitflags! {
    /// Flag set accepted by [`PagingArena::map_page`]: a page size, a
    /// privilege, and a backing kind. Invalid combinations are rejected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const FOUR_KB = 1 << 0;
        const FOUR_MB = 1 << 1;
        const USER = 1 << 2;
        const KERNEL = 1 << 3;
        const SLAB = 1 << 4;
        const BUDDY = 1 << 5;
    }
}

/// All process paging slots plus the shared kernel cache-table template.
pub struct PagingArena {
    slots: [ProcessPaging; MAX_TASKS],
    /// Canonical kernel-flag slab mappings; copied into a slot on reset so
    /// directories never disagree on kernel-range entries.
    cache_template: PageTable,
    current: usize,
}

impl PagingArena {
    pub const fn new() -> Self {
        PagingArena {
            slots: [const { ProcessPaging::empty() }; MAX_TASKS],
            cache_template: PageTable::empty(),
            current: 0,
        }
    }

    pub fn slot(&self, pid: usize) -> &ProcessPaging {
        &self.slots[pid]
    }

    /// Rebuild one slot's kernel mappings and user super-page.
    pub fn init_slot(&mut self, pid: usize) {
        let template = &self.cache_template;
        // Split borrow: the template is read-only while one slot is stamped.
        let template = template as *const PageTable;
        // SAFETY: `template` and `slots[pid]` are disjoint fields of self.
        let template = unsafe { &*template };
        self.slots[pid].reset(pid, template);
    }

    pub fn init_all_slots(&mut self) {
        for pid in 0..MAX_TASKS {
            self.init_slot(pid);
        }
    }

    pub fn directory_address(&self, pid: usize) -> usize {
        self.slots[pid].directory_address()
    }

    /// Install `pid`'s directory: CR3 write, full TLB flush.
    pub fn load(&mut self, pid: usize) {
        self.current = pid;
        arch::load_cr3(self.slots[pid].directory_address());
    }

    pub fn current_pid(&self) -> usize {
        self.current
    }

    fn flush_if_current(&self, pid: usize) {
        // Mutating a non-current directory needs no flush; the next CR3
        // load covers it.
        if self.current == pid {
            arch::reload_cr3();
        }
    }

    fn validate(flags: MapFlags) -> KernelResult<()> {
        let size_bits = flags & (MapFlags::FOUR_KB | MapFlags::FOUR_MB);
        let priv_bits = flags & (MapFlags::USER | MapFlags::KERNEL);
        if size_bits.bits().count_ones() != 1 || priv_bits.bits().count_ones() != 1 {
            return Err(KernelError::InvalidArgument { what: "map flags" });
        }
        if flags.contains(MapFlags::BUDDY) {
            return Err(KernelError::Unsupported {
                operation: "buddy-backed mapping",
            });
        }
        if flags.contains(MapFlags::FOUR_KB) && !flags.contains(MapFlags::SLAB) {
            return Err(KernelError::InvalidArgument { what: "map flags" });
        }
        if flags.contains(MapFlags::FOUR_MB) && flags.contains(MapFlags::SLAB) {
            return Err(KernelError::InvalidArgument { what: "map flags" });
        }
        Ok(())
    }

    /// Point the addressed entry of `pid`'s directory (and, for 4 KiB
    /// mappings, its cache table) at `pa`.
    pub fn map_page(&mut self, va: usize, pa: usize, pid: usize, flags: MapFlags) -> KernelResult<()> {
        if pid >= MAX_TASKS {
            return Err(KernelError::InvalidArgument { what: "pid" });
        }
        Self::validate(flags)?;

        let user = flags.contains(MapFlags::USER);
        let pd_index = directory_index(va);
        let pt_index = table_index(va);

        if flags.contains(MapFlags::FOUR_MB) {
            let attributes = if user { USER_4MB } else { KERNEL_4MB };
            let entry = Entry::new(pa & !(LARGE_PAGE_SIZE - 1), attributes);
            self.slots[pid].directory.set(pd_index, entry);
        } else {
            let attributes = if user { USER_4KB } else { KERNEL_4KB };
            let table_address = self.slots[pid].cache_table.address();
            self.slots[pid]
                .directory
                .set(pd_index, Entry::new(table_address, attributes));
            self.slots[pid]
                .cache_table
                .set(pt_index, Entry::new(pa, attributes));
            if !user {
                // Kernel slab mappings also go to the template so future
                // slot resets inherit them.
                self.cache_template.set(pt_index, Entry::new(pa, attributes));
            }
        }

        self.flush_if_current(pid);
        Ok(())
    }

    /// Clear the present bit for the page mapping `va`. For 4 KiB pages the
    /// table entry is cleared as well. Backing memory is untouched.
    pub fn mark_page_not_present(&mut self, va: usize, pid: usize) {
        if pid >= MAX_TASKS {
            return;
        }
        let pd_index = directory_index(va);
        let pt_index = table_index(va);

        let directory_entry = self.slots[pid].directory.entry(pd_index);
        if !directory_entry.is_present() {
            return;
        }

        if directory_entry.is_large() {
            let mut entry = directory_entry;
            entry.clear_present();
            self.slots[pid].directory.set(pd_index, entry);
        } else {
            let slot = &mut self.slots[pid];
            let table = if directory_entry.base() == slot.cache_table.address() {
                &mut slot.cache_table
            } else if directory_entry.base() == slot.vidmap_table.address() {
                &mut slot.vidmap_table
            } else if directory_entry.base() == slot.kernel_table.address() {
                &mut slot.kernel_table
            } else {
                return;
            };
            let mut entry = table.entry(pt_index);
            entry.clear_present();
            table.set(pt_index, entry);

            let mut pde = directory_entry;
            pde.clear_present();
            slot.directory.set(pd_index, pde);
        }

        self.flush_if_current(pid);
    }

    /// Open the user video window for `pid`, aimed at physical video memory.
    pub fn activate_vidmap(&mut self, pid: usize) {
        let slot = &mut self.slots[pid];
        let table_address = slot.vidmap_table.address();
        slot.directory
            .set(PDE_VIDMAP_TABLE, Entry::new(table_address, USER_4KB));
        slot.vidmap_table.set(
            table_index(USER_VIDEO_VIRT),
            Entry::new(VIDEO_MEM_BASE, USER_4KB),
        );
        self.flush_if_current(pid);
    }

    /// Re-aim `pid`'s video window at an off-screen terminal buffer.
    pub fn retarget_vidmap(&mut self, pid: usize, buffer_pa: usize) {
        self.slots[pid].vidmap_table.set(
            table_index(USER_VIDEO_VIRT),
            Entry::new(buffer_pa, USER_4KB),
        );
        self.flush_if_current(pid);
    }

    /// Tear the video window down (halt path).
    pub fn clear_vidmap(&mut self, pid: usize) {
        self.mark_page_not_present(USER_VIDEO_VIRT, pid);
    }
}

impl Default for PagingArena {
    fn default() -> Self {
        Self::new()
    }
}
