//! PS/2 keyboard
//!
//! Scancodes (set 1) are decoded with `pc_keyboard` into key events; this
//! driver layers the console chords on top -- Alt+F2 rotates the active
//! terminal, Ctrl+L clears it, PgUp/PgDn drive the scrollback -- and
//! delivers everything else to the active terminal's line buffer. Keys go
//! only to the terminal that owns the display.

use core::sync::atomic::{AtomicU8, Ordering};

use pc_keyboard::{
    layouts::Us104Key, DecodedKey, HandleControl, KeyCode, KeyState, Keyboard, ScancodeSet1,
};
use spin::Mutex;

use crate::arch;
use crate::drivers::terminal;
use crate::interrupts::pic;

const KEYBOARD_PORT: u16 = 0x60;
const KEYBOARD_IRQ: u8 = 1;

const MOD_SHIFT: u8 = 0x01;
const MOD_CTRL: u8 = 0x02;
const MOD_ALT: u8 = 0x04;

static MODIFIERS: AtomicU8 = AtomicU8::new(0);

static DECODER: Mutex<Option<Keyboard<Us104Key, ScancodeSet1>>> = Mutex::new(None);

pub fn init() {
    let decoder = Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore);
    *DECODER.lock() = Some(decoder);
    pic::enable_irq(KEYBOARD_IRQ);
    log::info!(target: "keyboard", "scancode set 1 decoder ready");
}

fn modifiers() -> u8 {
    MODIFIERS.load(Ordering::SeqCst)
}

fn set_modifier(bit: u8, held: bool) {
    if held {
        MODIFIERS.fetch_or(bit, Ordering::SeqCst);
    } else {
        MODIFIERS.fetch_and(!bit, Ordering::SeqCst);
    }
}

/// Feed one raw scancode byte through decode and delivery.
///
/// Split from the IRQ entry so the pipeline is drivable without hardware.
pub fn process_scancode(scancode: u8) {
    let event = {
        let mut decoder = DECODER.lock();
        let Some(decoder) = decoder.as_mut() else {
            return;
        };
        match decoder.add_byte(scancode) {
            Ok(Some(event)) => event,
            _ => return,
        }
    };

    let held = event.state != KeyState::Up;
    match event.code {
        KeyCode::LShift | KeyCode::RShift => set_modifier(MOD_SHIFT, held),
        KeyCode::LControl | KeyCode::RControl => set_modifier(MOD_CTRL, held),
        KeyCode::LAlt | KeyCode::RAltGr => set_modifier(MOD_ALT, held),
        _ => {}
    }

    if event.state == KeyState::Down {
        match event.code {
            KeyCode::F2 if modifiers() & MOD_ALT != 0 => {
                terminal::next_terminal();
                return;
            }
            KeyCode::PageUp => {
                terminal::history_up();
                return;
            }
            KeyCode::PageDown => {
                terminal::history_down();
                return;
            }
            _ => {}
        }
    }

    let decoded = {
        let mut decoder = DECODER.lock();
        let Some(decoder) = decoder.as_mut() else {
            return;
        };
        decoder.process_keyevent(event)
    };

    if let Some(DecodedKey::Unicode(character)) = decoded {
        if modifiers() & MOD_CTRL != 0 && (character == 'l' || character == 'L') {
            terminal::clear_active();
            return;
        }
        if (character as u32) < 0x80 {
            terminal::key_input(character as u8);
        }
    }
}

/// IRQ 1 entry: drain the controller, decode, acknowledge.
pub fn handle_interrupt() {
    let scancode = arch::inb(KEYBOARD_PORT);
    process_scancode(scancode);
    pic::send_eoi(KEYBOARD_IRQ);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        let decoder = Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore);
        *DECODER.lock() = Some(decoder);
        MODIFIERS.store(0, Ordering::SeqCst);
    }

    fn type_keys(codes: &[u8]) {
        for &code in codes {
            process_scancode(code);
        }
    }

    #[test]
    fn typed_line_reaches_the_active_terminal() {
        let _arch = crate::arch::test_control::lock_arch();
        setup();
        let tid = terminal::active_index();
        terminal::with_terminal(tid, |t| t.clear_line());

        // 'h' down/up, 'i' down/up, Enter down/up.
        type_keys(&[0x23, 0xA3, 0x17, 0x97, 0x1C, 0x9C]);

        terminal::with_terminal(tid, |t| {
            assert_eq!(t.line_bytes(), b"hi\n");
            t.clear_line();
        });
        // The reader wake-up fired.
        assert!(terminal::line_wait(tid).try_take());
    }

    #[test]
    fn shifted_letters_decode_uppercase() {
        let _arch = crate::arch::test_control::lock_arch();
        setup();
        let tid = terminal::active_index();
        terminal::with_terminal(tid, |t| t.clear_line());

        // Shift down, 'a' down/up, shift up.
        type_keys(&[0x2A, 0x1E, 0x9E, 0xAA]);

        terminal::with_terminal(tid, |t| {
            assert_eq!(t.line_bytes(), b"A");
            t.clear_line();
        });
    }

    #[test]
    fn alt_f2_rotates_the_active_terminal() {
        let _arch = crate::arch::test_control::lock_arch();
        setup();
        crate::mm::PAGING.lock().init_all_slots();
        let before = terminal::active_index();

        // Alt down, F2 down/up, Alt up.
        type_keys(&[0x38, 0x3C, 0xBC, 0xB8]);
        assert_eq!(
            terminal::active_index(),
            (before + 1) % terminal::NUM_TERMINALS
        );

        // Rotate twice more to return to the original terminal.
        type_keys(&[0x38, 0x3C, 0xBC, 0xB8]);
        type_keys(&[0x38, 0x3C, 0xBC, 0xB8]);
        assert_eq!(terminal::active_index(), before);
    }

    #[test]
    fn ctrl_l_clears_instead_of_typing() {
        let _arch = crate::arch::test_control::lock_arch();
        setup();
        let tid = terminal::active_index();
        terminal::with_terminal(tid, |t| {
            t.clear_line();
            t.put_char(b'x', true);
        });

        // Ctrl down, 'l' down/up, Ctrl up.
        type_keys(&[0x1D, 0x26, 0xA6, 0x9D]);

        terminal::with_terminal(tid, |t| {
            assert_eq!(t.cursor(), (0, 0));
            t.clear_line();
        });
    }
}
