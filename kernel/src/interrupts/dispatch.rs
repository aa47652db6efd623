//! Common dispatch
//!
//! Every linkage stub lands here with a pointer to the uniform frame.
//! Vector 0x80 routes to the system-call layer (number in EAX, arguments
//! in EBX/ECX/EDX, result written back into the saved EAX). Exception
//! vectors terminate a ring 3 offender with the kill status and are fatal
//! from ring 0. Everything else indexes the handler table.

use spin::Mutex;

use crate::arch;
use crate::process;
use crate::syscall;

use super::{TrapFrame, LAST_EXCEPTION, VEC_KEYBOARD, VEC_RTC, VEC_SOUND, VEC_SYSCALL, VEC_TIMER};

pub type VectorHandler = fn();

const NO_HANDLER: Option<VectorHandler> = None;

/// Handler table, one slot per vector, populated at boot.
static HANDLERS: Mutex<[Option<VectorHandler>; 256]> = Mutex::new([NO_HANDLER; 256]);

/// Register the fixed hardware handlers.
pub fn init() {
    let mut handlers = HANDLERS.lock();
    handlers[VEC_TIMER as usize] = Some(timer_handler);
    handlers[VEC_KEYBOARD as usize] = Some(crate::drivers::keyboard::handle_interrupt);
    handlers[VEC_RTC as usize] = Some(crate::drivers::rtc::handle_interrupt);
    handlers[VEC_SOUND as usize] = Some(crate::drivers::audio::handle_interrupt);
}

/// Replace a vector's handler (tests, late driver setup).
pub fn register(vector: u8, handler: VectorHandler) {
    arch::without_interrupts(|| {
        HANDLERS.lock()[vector as usize] = Some(handler);
    });
}

fn timer_handler() {
    super::pic::send_eoi(0);
    crate::sched::tick();
}

/// Entry point called by the assembly linkage with the saved frame.
///
/// # Safety
///
/// `frame` points at the live frame the linkage stub built on the current
/// kernel stack; it is exclusively owned for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn common_interrupt_dispatch(frame: *mut TrapFrame) {
    // SAFETY: Caller contract.
    let frame = unsafe { &mut *frame };
    dispatch_frame(frame);
}

/// The platform-independent dispatcher body.
pub fn dispatch_frame(frame: &mut TrapFrame) {
    let vector = frame.vector;

    if vector == VEC_SYSCALL as usize {
        let result = syscall::dispatch(frame.eax, frame.ebx, frame.ecx, frame.edx);
        frame.eax = result as usize;
        return;
    }

    if vector <= LAST_EXCEPTION as usize {
        handle_exception(frame);
        return;
    }

    let handler = HANDLERS.lock()[vector];
    match handler {
        Some(handler) => handler(),
        None => log::warn!(target: "interrupts", "no handler for vector {:#x}", vector),
    }
}

fn exception_name(vector: usize) -> &'static str {
    match vector {
        0x00 => "divide error",
        0x01 => "debug",
        0x02 => "nmi",
        0x03 => "breakpoint",
        0x04 => "overflow",
        0x05 => "bound range",
        0x06 => "invalid opcode",
        0x07 => "device not available",
        0x08 => "double fault",
        0x0A => "invalid tss",
        0x0B => "segment not present",
        0x0C => "stack fault",
        0x0D => "general protection",
        0x0E => "page fault",
        0x10 => "x87 error",
        0x11 => "alignment check",
        0x12 => "machine check",
        0x13 => "simd error",
        _ => "reserved",
    }
}

fn handle_exception(frame: &mut TrapFrame) {
    let vector = frame.vector;

    if vector == 0x0E {
        // Page faults report the faulting linear address from CR2.
        let address = arch::read_cr2();
        log::error!(
            target: "interrupts",
            "page fault at {:#010x}, error {:#x}, eip {:#010x}",
            address,
            frame.error_code,
            frame.eip
        );
    } else {
        log::error!(
            target: "interrupts",
            "{} (vector {:#04x}), error {:#x}, eip {:#010x}",
            exception_name(vector),
            vector,
            frame.error_code,
            frame.eip
        );
    }

    if frame.from_user() {
        // Kill the offending process; its parent sees the kill status.
        process::exception_kill();
        return;
    }

    // An exception with supervisor CS means kernel state is gone.
    crate::drivers::terminal::fatal_banner(exception_name(vector));
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);

    fn counting_handler() {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn table_dispatch_reaches_registered_handler() {
        let _arch = crate::arch::test_control::lock_arch();
        register(0x2C, counting_handler);
        let before = FIRED.load(Ordering::SeqCst);
        let mut frame = TrapFrame::synthetic(0x2C);
        dispatch_frame(&mut frame);
        assert_eq!(FIRED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn unhandled_vector_is_tolerated() {
        let mut frame = TrapFrame::synthetic(0x3A);
        dispatch_frame(&mut frame);
    }

    #[test]
    fn syscall_vector_routes_to_dispatch_and_writes_eax() {
        let mut frame = TrapFrame::synthetic(VEC_SYSCALL as usize);
        frame.eax = 999; // not a system call number
        dispatch_frame(&mut frame);
        assert_eq!(frame.eax as isize, -1);
    }

    #[test]
    fn privilege_check_reads_cs() {
        let mut frame = TrapFrame::synthetic(0);
        assert!(!frame.from_user());
        frame.cs = crate::arch::USER_CS;
        assert!(frame.from_user());
    }
}
