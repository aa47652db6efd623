//! Real-time clock, virtualized per terminal
//!
//! The hardware ticks at a fixed 1024 Hz; each terminal divides that down
//! with its own rollover counter, so three consoles can run three apparent
//! rates from one interrupt line. A read blocks (parked, not spinning)
//! until the caller's terminal's next virtual tick.

use spin::Mutex;

use crate::arch;
use crate::drivers::{terminal, FileOperations};
use crate::error::{KernelError, KernelResult};
use crate::interrupts::pic;
use crate::process::files;
use crate::sched::wait::WaitSlot;

const RTC_IRQ: u8 = 8;

const CONTROL_PORT: u16 = 0x70;
const DATA_PORT: u16 = 0x71;

/// Register selects with NMI disabled (bit 7).
const REG_A_NMI: u8 = 0x8A;
const REG_B_NMI: u8 = 0x8B;
const REG_C: u8 = 0x0C;

/// Rate-select value for 1024 Hz periodic interrupts.
const RATE_1024_HZ: u8 = 6;

/// The hardware tick rate every virtual rate divides.
pub const HARDWARE_HZ: u32 = 1024;

/// Accepted virtual rates: powers of two in this range.
pub const MIN_RATE: u32 = 2;
pub const MAX_RATE: u32 = 1024;

static WAITS: [WaitSlot; terminal::NUM_TERMINALS] =
    [const { WaitSlot::new() }; terminal::NUM_TERMINALS];

static HW_LOCK: Mutex<()> = Mutex::new(());

pub fn wait_slot(tid: usize) -> &'static WaitSlot {
    &WAITS[tid]
}

/// Program 1024 Hz periodic interrupts and unmask the line.
pub fn init() {
    arch::without_interrupts(|| {
        let _hw = HW_LOCK.lock();

        arch::outb(CONTROL_PORT, REG_A_NMI);
        let previous = arch::inb(DATA_PORT);
        arch::outb(CONTROL_PORT, REG_A_NMI);
        arch::outb(DATA_PORT, (previous & 0xF0) | RATE_1024_HZ);

        arch::outb(CONTROL_PORT, REG_B_NMI);
        let previous = arch::inb(DATA_PORT);
        arch::outb(CONTROL_PORT, REG_B_NMI);
        // Bit 6 enables periodic interrupts.
        arch::outb(DATA_PORT, previous | 0x40);
    });

    pic::enable_irq(RTC_IRQ);
    log::info!(target: "rtc", "periodic interrupts at {} Hz", HARDWARE_HZ);
}

/// Validate a requested virtual rate.
pub fn rate_is_valid(rate: u32) -> bool {
    (MIN_RATE..=MAX_RATE).contains(&rate) && rate.is_power_of_two()
}

/// IRQ 8 entry: advance every terminal's divider, fire the latches that
/// rolled over, re-arm the chip, acknowledge.
pub fn handle_interrupt() {
    for tid in 0..terminal::NUM_TERMINALS {
        let fired = terminal::with_terminal(tid, |t| {
            t.rtc.counter += 1;
            if t.rtc.counter >= t.rtc.rollover {
                t.rtc.counter = 0;
                true
            } else {
                false
            }
        });
        if fired {
            WAITS[tid].notify();
        }
    }

    // Register C must be read or the chip stops interrupting.
    arch::outb(CONTROL_PORT, REG_C);
    arch::inb(DATA_PORT);

    pic::send_eoi(RTC_IRQ);
}

/// The RTC descriptor operations.
pub struct RtcFile;

impl FileOperations for RtcFile {
    fn open(&self, _name: &[u8]) -> KernelResult<()> {
        let tid = files::current_terminal();
        terminal::with_terminal(tid, |t| {
            t.rtc.rollover = HARDWARE_HZ / MIN_RATE;
            t.rtc.counter = 0;
        });
        Ok(())
    }

    fn close(&self, _fd: usize) -> KernelResult<()> {
        let tid = files::current_terminal();
        terminal::with_terminal(tid, |t| t.rtc.rollover = HARDWARE_HZ / MIN_RATE);
        Ok(())
    }

    /// Block until the caller's terminal's next virtual tick; reports no
    /// data, only the edge.
    fn read(&self, _fd: usize, _buf: &mut [u8]) -> KernelResult<usize> {
        let tid = files::current_terminal();
        terminal::with_terminal(tid, |t| t.rtc.counter = 0);
        WAITS[tid].clear();
        WAITS[tid].wait();
        Ok(0)
    }

    /// Set the virtual rate: a four-byte little-endian power of two in
    /// [2, 1024].
    fn write(&self, _fd: usize, buf: &[u8]) -> KernelResult<usize> {
        if buf.len() < 4 {
            return Err(KernelError::InvalidArgument { what: "rtc rate" });
        }
        let rate = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if !rate_is_valid(rate) {
            return Err(KernelError::InvalidArgument { what: "rtc rate" });
        }
        let tid = files::current_terminal();
        terminal::with_terminal(tid, |t| {
            t.rtc.rollover = HARDWARE_HZ / rate;
            t.rtc.counter = 0;
        });
        Ok(4)
    }
}
