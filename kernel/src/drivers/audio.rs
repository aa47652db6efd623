//! DSP audio
//!
//! A minimal SoundBlaster-style digital sound processor driver behind the
//! terminal's audio ioctls: reset/probe at boot, a programmed output rate
//! for the loaded sine tone, speaker on/off for play/stop. All handshakes
//! are bounded so a missing card degrades to no-ops.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::arch;
use crate::interrupts::pic;

const DSP_RESET: u16 = 0x226;
const DSP_READ: u16 = 0x22A;
const DSP_WRITE: u16 = 0x22C;
const DSP_READ_STATUS: u16 = 0x22E;

const DSP_READY: u8 = 0xAA;

const CMD_SET_OUTPUT_RATE: u8 = 0x41;
const CMD_SPEAKER_ON: u8 = 0xD1;
const CMD_SPEAKER_OFF: u8 = 0xD3;

const SOUND_IRQ: u8 = 5;

/// Handshake bound; the card answers within a few reads or not at all.
const HANDSHAKE_SPINS: u32 = 1 << 14;

static AVAILABLE: AtomicBool = AtomicBool::new(false);

struct AudioState {
    playing: bool,
    sample_rate: u32,
}

static STATE: Mutex<AudioState> = Mutex::new(AudioState {
    playing: false,
    sample_rate: 22_050,
});

fn read_dsp() -> Option<u8> {
    for _ in 0..HANDSHAKE_SPINS {
        if arch::inb(DSP_READ_STATUS) & 0x80 != 0 {
            return Some(arch::inb(DSP_READ));
        }
    }
    None
}

fn write_dsp(value: u8) -> bool {
    for _ in 0..HANDSHAKE_SPINS {
        if arch::inb(DSP_WRITE) & 0x80 == 0 {
            arch::outb(DSP_WRITE, value);
            return true;
        }
    }
    false
}

fn reset_dsp() -> bool {
    arch::outb(DSP_RESET, 1);
    arch::io_wait();
    arch::outb(DSP_RESET, 0);
    read_dsp() == Some(DSP_READY)
}

pub fn init() {
    let present = reset_dsp();
    AVAILABLE.store(present, Ordering::SeqCst);
    if present {
        pic::enable_irq(SOUND_IRQ);
        log::info!(target: "audio", "dsp present");
    } else {
        log::info!(target: "audio", "no dsp; audio ioctls are no-ops");
    }
}

/// Program the output rate for the sine tone at `frequency` Hz.
pub fn load_sine_wave(frequency: u32) {
    let mut state = STATE.lock();
    // Oversample the requested tone; clamp into the DSP's output range.
    state.sample_rate = (frequency.max(1) * 64).clamp(5_000, 44_100);
    if !AVAILABLE.load(Ordering::SeqCst) {
        return;
    }
    write_dsp(CMD_SET_OUTPUT_RATE);
    write_dsp((state.sample_rate >> 8) as u8);
    write_dsp((state.sample_rate & 0xFF) as u8);
}

pub fn play() {
    let mut state = STATE.lock();
    state.playing = true;
    if AVAILABLE.load(Ordering::SeqCst) {
        write_dsp(CMD_SPEAKER_ON);
    }
}

pub fn stop() {
    let mut state = STATE.lock();
    state.playing = false;
    if AVAILABLE.load(Ordering::SeqCst) {
        write_dsp(CMD_SPEAKER_OFF);
    }
}

pub fn is_playing() -> bool {
    STATE.lock().playing
}

/// IRQ 5 entry: acknowledge the transfer and the controller.
pub fn handle_interrupt() {
    arch::inb(DSP_READ_STATUS);
    pic::send_eoi(SOUND_IRQ);
}
