//! Programmable interval timer
//!
//! Channel 0 in rate-generator mode drives the scheduler at [`TICK_HZ`].
//! The line is programmed here but unmasked only at the end of boot, once
//! the shells are parked and a tick has somewhere to switch to.

use crate::arch;

const PIT_FREQUENCY: u32 = 1_193_182;

const CHANNEL_0: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, rate generator.
const COMMAND_WORD: u8 = 0x36;

/// Scheduler tick rate.
pub const TICK_HZ: u32 = 100;

pub const TIMER_IRQ: u8 = 0;

pub fn init() {
    let divisor = (PIT_FREQUENCY / TICK_HZ) as u16;
    arch::outb(COMMAND, COMMAND_WORD);
    arch::outb(CHANNEL_0, (divisor & 0xFF) as u8);
    arch::outb(CHANNEL_0, (divisor >> 8) as u8);
    log::info!(target: "pit", "channel 0 at {} Hz", TICK_HZ);
}
