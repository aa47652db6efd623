//! Boot sequence
//!
//! Order matters: descriptor tables before paging, paging before the IDT
//! touches any handler that might fault, the PIC before anything unmasks a
//! line, and the timer line last of all -- a tick must have parked shells
//! to switch into.

#[cfg(target_os = "none")]
use crate::{arch, drivers, fs, interrupts, logging, mm, process};

/// Offsets into the multiboot v1 info structure.
#[cfg(target_os = "none")]
mod multiboot {
    use crate::error::{KernelError, KernelResult};

    const FLAGS_OFFSET: usize = 0;
    const MODS_COUNT_OFFSET: usize = 20;
    const MODS_ADDR_OFFSET: usize = 24;

    const FLAG_MODS: u32 = 1 << 3;

    fn read_u32(addr: usize) -> u32 {
        // SAFETY: The loader hands us a live info structure in low memory,
        // identity mapped by the boot page tables.
        unsafe { *(addr as *const u32) }
    }

    /// Borrow the first boot module: the file-system image.
    pub fn module_image(info_addr: usize) -> KernelResult<&'static mut [u8]> {
        if info_addr == 0 || read_u32(info_addr + FLAGS_OFFSET) & FLAG_MODS == 0 {
            return Err(KernelError::NotFound {
                what: "multiboot modules",
            });
        }
        let count = read_u32(info_addr + MODS_COUNT_OFFSET) as usize;
        if count == 0 {
            return Err(KernelError::NotFound {
                what: "file-system module",
            });
        }
        let mods_addr = read_u32(info_addr + MODS_ADDR_OFFSET) as usize;
        let start = read_u32(mods_addr) as usize;
        let end = read_u32(mods_addr + 4) as usize;
        if end <= start {
            return Err(KernelError::BadImage {
                reason: "empty boot module",
            });
        }
        // SAFETY: The loader placed the module at [start, end) in low
        // memory; nothing else claims it and the borrow lives forever.
        Ok(unsafe { core::slice::from_raw_parts_mut(start as *mut u8, end - start) })
    }
}

/// Bring the whole system up and hand the CPU to the first shell.
#[cfg(target_os = "none")]
pub fn run(multiboot_info: usize) -> ! {
    arch::console_init();
    logging::init();
    println!("triton {}", env!("CARGO_PKG_VERSION"));

    arch::init();
    mm::init();
    arch::enable_paging();

    interrupts::init();
    interrupts::pic::init();

    drivers::pit::init();
    drivers::rtc::init();
    drivers::keyboard::init();
    drivers::audio::init();

    let image = match multiboot::module_image(multiboot_info) {
        Ok(image) => image,
        Err(error) => panic!("no file-system image: {}", error),
    };
    match fs::FsImage::parse(image) {
        Ok(parsed) => fs::install(parsed),
        Err(error) => panic!("file-system image rejected: {}", error),
    }

    drivers::terminal::init();

    for tid in 0..drivers::terminal::NUM_TERMINALS {
        if let Err(error) = process::spawn_parked_shell(tid) {
            panic!("cannot start shell for terminal {}: {}", tid, error);
        }
    }

    // Everything is in place; let the scheduler run.
    interrupts::pic::enable_irq(drivers::pit::TIMER_IRQ);
    process::boot_into_first_shell()
}

/// Host builds drive subsystems directly from the tests; there is no boot
/// path to run.
#[cfg(not(target_os = "none"))]
pub fn run(_multiboot_info: usize) {
    unreachable!("bare-metal boot path on a hosted build");
}
