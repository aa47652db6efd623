//! 8259A interrupt controller pair
//!
//! Master at 0x20, slave at 0xA0, cascaded on IRQ 2 and remapped to vectors
//! 0x20-0x2F. Lines are individually masked; acknowledgment uses specific
//! EOI. Before acknowledging IRQ 7 or 15 the in-service register is
//! consulted: a clear bit means the line glitched and the interrupt is
//! dropped -- no EOI for IRQ 7, master-only EOI for IRQ 15.
//!
//! The controller is written against a [`PortBus`] so the policy (init
//! sequence, mask bookkeeping, EOI forms, spurious detection) is testable
//! with a scripted bus.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::arch;

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

const ICW1: u8 = 0x11; // edge triggered, cascade, ICW4 follows
const ICW2_MASTER: u8 = 0x20;
const ICW2_SLAVE: u8 = 0x28;
const ICW3_MASTER: u8 = 0x04; // slave on line 2
const ICW3_SLAVE: u8 = 0x02;
const ICW4: u8 = 0x01; // 8086 mode

const OCW3_READ_ISR: u8 = 0x0B;

/// Specific-EOI command base; OR the level in.
const EOI: u8 = 0x60;

/// The cascade line.
pub const CASCADE_IRQ: u8 = 2;

/// Port access used by the controller; the hardware implementation goes
/// through the arch shim, tests substitute a script.
pub trait PortBus {
    fn write(&mut self, port: u16, value: u8);
    fn read(&mut self, port: u16) -> u8;
    fn settle(&mut self);
}

/// The real port bus.
pub struct HardwareBus;

impl PortBus for HardwareBus {
    fn write(&mut self, port: u16, value: u8) {
        arch::outb(port, value);
    }

    fn read(&mut self, port: u16) -> u8 {
        arch::inb(port)
    }

    fn settle(&mut self) {
        arch::io_wait();
    }
}

/// Cascaded-pair driver state.
pub struct Pic<B: PortBus> {
    bus: B,
    master_mask: u8,
    slave_mask: u8,
    spurious: u32,
}

impl<B: PortBus> Pic<B> {
    pub const fn new(bus: B) -> Self {
        Pic {
            bus,
            master_mask: 0xFF,
            slave_mask: 0xFF,
            spurious: 0,
        }
    }

    /// Full ICW sequence; every line masked, then the cascade unmasked.
    pub fn init(&mut self) {
        self.master_mask = 0xFF;
        self.slave_mask = 0xFF;

        self.bus.write(MASTER_COMMAND, ICW1);
        self.bus.settle();
        self.bus.write(MASTER_DATA, ICW2_MASTER);
        self.bus.settle();
        self.bus.write(MASTER_DATA, ICW3_MASTER);
        self.bus.settle();
        self.bus.write(MASTER_DATA, ICW4);
        self.bus.settle();

        self.bus.write(SLAVE_COMMAND, ICW1);
        self.bus.settle();
        self.bus.write(SLAVE_DATA, ICW2_SLAVE);
        self.bus.settle();
        self.bus.write(SLAVE_DATA, ICW3_SLAVE);
        self.bus.settle();
        self.bus.write(SLAVE_DATA, ICW4);
        self.bus.settle();

        self.bus.write(MASTER_DATA, self.master_mask);
        self.bus.settle();
        self.bus.write(SLAVE_DATA, self.slave_mask);
        self.bus.settle();

        self.enable_irq(CASCADE_IRQ);
    }

    /// Unmask a line (0..15).
    pub fn enable_irq(&mut self, irq: u8) {
        match irq {
            0..=7 => {
                self.master_mask &= !(1 << irq);
                self.bus.write(MASTER_DATA, self.master_mask);
            }
            8..=15 => {
                self.slave_mask &= !(1 << (irq - 8));
                self.bus.write(SLAVE_DATA, self.slave_mask);
            }
            _ => log::warn!(target: "pic", "enable_irq({}) out of range", irq),
        }
        self.bus.settle();
    }

    /// Mask a line (0..15).
    pub fn disable_irq(&mut self, irq: u8) {
        match irq {
            0..=7 => {
                self.master_mask |= 1 << irq;
                self.bus.write(MASTER_DATA, self.master_mask);
            }
            8..=15 => {
                self.slave_mask |= 1 << (irq - 8);
                self.bus.write(SLAVE_DATA, self.slave_mask);
            }
            _ => log::warn!(target: "pic", "disable_irq({}) out of range", irq),
        }
        self.bus.settle();
    }

    fn read_isr(&mut self, command_port: u16) -> u8 {
        self.bus.write(command_port, OCW3_READ_ISR);
        self.bus.read(command_port)
    }

    /// Specific EOI with spurious-line detection on 7 and 15.
    pub fn send_eoi(&mut self, irq: u8) {
        match irq {
            7 => {
                // A glitch on line 7 raises the vector with no ISR bit; it
                // must not be acknowledged at all.
                if self.read_isr(MASTER_COMMAND) & (1 << 7) == 0 {
                    self.spurious += 1;
                    return;
                }
                self.bus.write(MASTER_COMMAND, EOI | 7);
            }
            15 => {
                // Same on the slave's line 7, except the cascade really did
                // interrupt the master, which still wants its EOI.
                if self.read_isr(SLAVE_COMMAND) & (1 << 7) == 0 {
                    self.spurious += 1;
                    self.bus.write(MASTER_COMMAND, EOI | CASCADE_IRQ);
                    self.bus.settle();
                    return;
                }
                self.bus.write(SLAVE_COMMAND, EOI | 7);
                self.bus.settle();
                self.bus.write(MASTER_COMMAND, EOI | CASCADE_IRQ);
            }
            8..=14 => {
                self.bus.write(SLAVE_COMMAND, EOI | (irq - 8));
                self.bus.settle();
                self.bus.write(MASTER_COMMAND, EOI | CASCADE_IRQ);
            }
            0..=6 => {
                self.bus.write(MASTER_COMMAND, EOI | irq);
            }
            _ => log::warn!(target: "pic", "send_eoi({}) out of range", irq),
        }
        self.bus.settle();
    }

    pub fn spurious_count(&self) -> u32 {
        self.spurious
    }

    pub fn masks(&self) -> (u8, u8) {
        (self.master_mask, self.slave_mask)
    }
}

// ---------------------------------------------------------------------------
// Global instance
// ---------------------------------------------------------------------------

static PIC: Mutex<Pic<HardwareBus>> = Mutex::new(Pic::new(HardwareBus));

/// Dropped-interrupt count, mirrored out of the lock for diagnostics.
static SPURIOUS_TOTAL: AtomicU32 = AtomicU32::new(0);

pub fn init() {
    arch::without_interrupts(|| PIC.lock().init());
    log::info!(target: "pic", "8259 pair remapped to 0x20-0x2f");
}

pub fn enable_irq(irq: u8) {
    arch::without_interrupts(|| PIC.lock().enable_irq(irq));
}

pub fn disable_irq(irq: u8) {
    arch::without_interrupts(|| PIC.lock().disable_irq(irq));
}

pub fn send_eoi(irq: u8) {
    arch::without_interrupts(|| {
        let mut pic = PIC.lock();
        pic.send_eoi(irq);
        SPURIOUS_TOTAL.store(pic.spurious_count(), Ordering::Relaxed);
    });
}

pub fn spurious_count() -> u32 {
    SPURIOUS_TOTAL.load(Ordering::Relaxed)
}
