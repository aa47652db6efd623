// Global descriptor table and task state segment

use core::arch::asm;

/// IA-32 task state segment. Only `ss0`/`esp0` are live: they name the
/// kernel stack the CPU switches to on a ring 3 -> ring 0 transition.
#[repr(C, packed)]
struct TaskStateSegment {
    prev_task_link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt_selector: u32,
    iomap_base: u32,
}

static mut TSS: TaskStateSegment = TaskStateSegment {
    prev_task_link: 0,
    esp0: 0,
    ss0: super::super::KERNEL_DS as u32,
    esp1: 0,
    ss1: 0,
    esp2: 0,
    ss2: 0,
    cr3: 0,
    eip: 0,
    eflags: 0,
    eax: 0,
    ecx: 0,
    edx: 0,
    ebx: 0,
    esp: 0,
    ebp: 0,
    esi: 0,
    edi: 0,
    es: 0,
    cs: 0,
    ss: 0,
    ds: 0,
    fs: 0,
    gs: 0,
    ldt_selector: 0,
    iomap_base: core::mem::size_of::<TaskStateSegment>() as u32,
};

/// Eight descriptors: null, (spare), kernel code/data, user code/data, TSS.
/// The TSS entry is patched with the segment's address at init.
static mut GDT: [u64; 8] = [
    0,
    0,
    0x00CF_9A00_0000_FFFF, // 0x10: kernel code, flat 4 GiB
    0x00CF_9200_0000_FFFF, // 0x18: kernel data, flat 4 GiB
    0x00CF_FA00_0000_FFFF, // 0x23: user code, flat 4 GiB, DPL 3
    0x00CF_F200_0000_FFFF, // 0x2B: user data, flat 4 GiB, DPL 3
    0,                     // 0x30: TSS, patched at init
    0,
];

fn tss_descriptor(base: u32, limit: u32) -> u64 {
    let mut desc: u64 = 0;
    desc |= (limit & 0xFFFF) as u64;
    desc |= ((base & 0xFFFFFF) as u64) << 16;
    desc |= 0x89u64 << 40; // present, 32-bit available TSS
    desc |= (((limit >> 16) & 0xF) as u64) << 48;
    desc |= ((base >> 24) as u64) << 56;
    desc
}

pub fn init() {
    #[repr(C, packed)]
    struct DescriptorPointer {
        limit: u16,
        base: u32,
    }

    let tss_base = &raw const TSS as u32;
    let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;

    // SAFETY: Single-threaded boot path; nothing else references the GDT or
    // TSS statics until the tables are loaded below.
    unsafe {
        (*(&raw mut GDT))[6] = tss_descriptor(tss_base, tss_limit);
    }

    let pointer = DescriptorPointer {
        limit: (core::mem::size_of::<[u64; 8]>() - 1) as u16,
        base: &raw const GDT as u32,
    };

    // SAFETY: Loads the GDT built above, reloads every segment register from
    // it (CS via a far return), and loads the task register. The selectors
    // index descriptors that were just written.
    unsafe {
        asm!(
            "lgdt [{gdtr}]",
            "mov ax, 0x18",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push 0x10",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov ax, 0x30",
            "ltr ax",
            gdtr = in(reg) &pointer,
            out("eax") _,
        );
    }
}

/// Point TSS.ESP0 at the top of a process's kernel stack.
///
/// Called on every context switch and on execute/halt transitions, always
/// with interrupts masked.
pub fn set_kernel_stack(esp0: usize) {
    // SAFETY: The TSS is a static; the single writer runs with interrupts
    // masked and the CPU only reads the field on a privilege transition.
    unsafe {
        (*(&raw mut TSS)).esp0 = esp0 as u32;
    }
}

pub fn get_kernel_stack() -> usize {
    // SAFETY: Plain read of a static field; see `set_kernel_stack`.
    unsafe { (*(&raw const TSS)).esp0 as usize }
}
