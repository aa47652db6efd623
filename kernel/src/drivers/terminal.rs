//! Virtual terminals
//!
//! Three logical consoles share the one text display. The *active* terminal
//! owns the screen and the keyboard; the others render into their own
//! page-aligned back buffers. Each terminal carries a line buffer for
//! blocked readers, a one-screen circular history, a left margin set by the
//! last program write (backspace stops there), and the per-console RTC
//! virtualization divider.
//!
//! Locking: every entry from process context wraps the terminal lock in
//! `arch::without_interrupts`; interrupt handlers (keyboard, RTC, timer)
//! already run with IF clear, so the spin locks never nest against a
//! handler on this single CPU.

use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch;
use crate::drivers::{audio, vga, FileOperations};
use crate::error::{KernelError, KernelResult};
use crate::mm::{PAGING, VIDEO_MEM_BASE};
use crate::process::files;
use crate::sched::wait::WaitSlot;

pub use crate::drivers::vga::{NUM_COLS, NUM_ROWS};

pub const NUM_TERMINALS: usize = 3;

/// 127 characters + newline + terminator.
pub const LINE_BUFFER_SIZE: usize = 129;

const TAB_SIZE: usize = 4;

/// Per-terminal display attributes: light green, yellow, light red.
const ATTRIBUTES: [u8; NUM_TERMINALS] = [0x0A, 0x0E, 0x0C];

const BSOD_ATTRIBUTE: u8 = 0x1F;

/// Terminal ioctl commands.
pub const IOCTL_SET_OUTPUT_MODE: u32 = 0;
pub const IOCTL_PLAY_AUDIO: u32 = 1;
pub const IOCTL_LOAD_SINEWAVE: u32 = 2;
pub const IOCTL_STOP_AUDIO: u32 = 3;

/// A saved 80x25 screen, page aligned so the user vidmap window can be
/// pointed straight at it.
#[repr(C, align(4096))]
pub struct ScreenBuffer {
    pub cells: [[u16; NUM_COLS]; NUM_ROWS],
}

impl ScreenBuffer {
    const fn new() -> Self {
        ScreenBuffer {
            cells: [[0; NUM_COLS]; NUM_ROWS],
        }
    }

    /// Physical address, valid because kernel statics are identity mapped.
    pub fn physical_address(&self) -> usize {
        self as *const ScreenBuffer as usize
    }
}

/// Per-console RTC virtualization: the hardware ticks at 1024 Hz and each
/// console sees every `rollover`-th tick.
#[derive(Debug, Clone, Copy)]
pub struct RtcVirt {
    pub rollover: u32,
    pub counter: u32,
}

impl RtcVirt {
    const DEFAULT_ROLLOVER: u32 = 512; // 2 Hz

    const fn new() -> Self {
        RtcVirt {
            rollover: Self::DEFAULT_ROLLOVER,
            counter: 0,
        }
    }
}

/// One terminal control block.
pub struct Terminal {
    id: usize,
    cursor_x: usize,
    cursor_y: usize,
    /// Left margin after the last program write; backspace stops here.
    limit_x: usize,
    attribute: u8,
    /// false = raw (no echo, no cursor), true = line mode.
    output_mode: bool,
    reading: bool,
    viewing_history: bool,
    history_index: usize,
    pub screen: ScreenBuffer,
    history: ScreenBuffer,
    line: [u8; LINE_BUFFER_SIZE],
    line_len: usize,
    foreground: Option<usize>,
    pub rtc: RtcVirt,
}

impl Terminal {
    pub fn new(id: usize) -> Self {
        Terminal {
            id,
            cursor_x: 0,
            cursor_y: 0,
            limit_x: 0,
            attribute: ATTRIBUTES[id % NUM_TERMINALS],
            output_mode: true,
            reading: false,
            viewing_history: false,
            history_index: 0,
            screen: ScreenBuffer::new(),
            history: ScreenBuffer::new(),
            line: [0; LINE_BUFFER_SIZE],
            line_len: 0,
            foreground: None,
            rtc: RtcVirt::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    pub fn line_len(&self) -> usize {
        self.line_len
    }

    pub fn line_bytes(&self) -> &[u8] {
        &self.line[..self.line_len]
    }

    fn set_cell(&mut self, x: usize, y: usize, character: u8, active: bool) {
        let value = vga::cell(character, self.attribute);
        self.screen.cells[y][x] = value;
        if active {
            vga::write_cell(y * NUM_COLS + x, value);
        }
    }

    fn push_line_byte(&mut self, byte: u8) {
        if self.line_len < LINE_BUFFER_SIZE - 2 {
            self.line[self.line_len] = byte;
            self.line_len += 1;
        }
    }

    fn advance_cursor(&mut self, active: bool) {
        self.cursor_x += 1;
        if self.cursor_x >= NUM_COLS {
            self.cursor_x = 0;
            self.cursor_y += 1;
            self.scroll_if_needed(active);
        }
    }

    fn scroll_if_needed(&mut self, active: bool) {
        if self.cursor_y < NUM_ROWS {
            return;
        }
        self.shift_screen_up(active);
        self.cursor_y = NUM_ROWS - 1;
    }

    fn shift_screen_up(&mut self, active: bool) {
        // The departing top row goes into the circular history.
        self.history.cells[self.history_index] = self.screen.cells[0];
        self.history_index = (self.history_index + 1) % NUM_ROWS;

        for row in 1..NUM_ROWS {
            self.screen.cells[row - 1] = self.screen.cells[row];
        }
        let blank = vga::cell(b' ', self.attribute);
        self.screen.cells[NUM_ROWS - 1] = [blank; NUM_COLS];
        if active {
            vga::restore_screen(&self.screen.cells);
        }
    }

    /// Put one character: backspace, newline, tab, and printables; anything
    /// else is dropped. `active` says this terminal owns the display (and
    /// therefore the keyboard, which is what feeds the line buffer).
    pub fn put_char(&mut self, character: u8, active: bool) {
        if self.viewing_history {
            return;
        }
        match character {
            b'\x08' => {
                if self.output_mode {
                    if self.cursor_x == self.limit_x {
                        return;
                    }
                    if self.cursor_x == 0 {
                        if self.cursor_y == 0 {
                            return;
                        }
                        self.cursor_y -= 1;
                        self.cursor_x = NUM_COLS - 1;
                    } else {
                        self.cursor_x -= 1;
                    }
                    let (x, y) = (self.cursor_x, self.cursor_y);
                    self.set_cell(x, y, b' ', active);
                }
                if active && self.line_len > 0 {
                    self.line_len -= 1;
                    self.line[self.line_len] = 0;
                }
            }
            b'\n' | b'\r' => {
                if self.output_mode {
                    self.cursor_x = 0;
                    self.cursor_y += 1;
                    self.scroll_if_needed(active);
                }
                if active {
                    self.push_line_byte(b'\n');
                }
            }
            b'\t' => {
                for _ in 0..TAB_SIZE {
                    if self.output_mode {
                        let (x, y) = (self.cursor_x, self.cursor_y);
                        self.set_cell(x, y, b' ', active);
                        self.advance_cursor(active);
                    }
                    if active {
                        self.push_line_byte(b' ');
                    }
                }
            }
            0x20..=0x7E => {
                if self.output_mode {
                    let (x, y) = (self.cursor_x, self.cursor_y);
                    self.set_cell(x, y, character, active);
                    self.advance_cursor(active);
                }
                if active {
                    self.push_line_byte(character);
                }
            }
            _ => return,
        }

        if self.output_mode && active {
            vga::update_cursor(self.cursor_x, self.cursor_y);
        }
    }

    /// Program output: write `buf` (NUL bytes skipped, not printed) and park
    /// the backspace margin at the final cursor column.
    pub fn write_bytes(&mut self, buf: &[u8], active: bool) -> usize {
        for &byte in buf {
            if byte == 0 {
                continue;
            }
            self.put_char(byte, active);
        }
        self.limit_x = self.cursor_x;
        buf.len()
    }

    /// Clear the screen and home the cursor. A blocked reader's typed line
    /// is re-echoed so Ctrl+L does not eat pending input.
    pub fn clear_screen(&mut self, active: bool) {
        let blank = vga::cell(b' ', self.attribute);
        self.screen.cells = [[blank; NUM_COLS]; NUM_ROWS];
        if active {
            vga::restore_screen(&self.screen.cells);
        }
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.limit_x = 0;

        if self.output_mode {
            if active {
                vga::enable_cursor(14, 15);
                vga::update_cursor(0, 0);
            }
            if self.reading && self.line_len > 0 {
                let mut pending = [0u8; LINE_BUFFER_SIZE];
                let len = self.line_len;
                pending[..len].copy_from_slice(&self.line[..len]);
                self.line_len = 0;
                self.line = [0; LINE_BUFFER_SIZE];
                for &byte in &pending[..len] {
                    self.put_char(byte, active);
                }
            }
        }
    }

    pub fn clear_line(&mut self) {
        self.line = [0; LINE_BUFFER_SIZE];
        self.line_len = 0;
    }

    /// Has the reader's completion condition been met for a `want`-byte
    /// destination buffer?
    fn line_ready(&self, want: usize) -> bool {
        (self.line_len > 0 && self.line[self.line_len - 1] == b'\n')
            || self.line_len + 1 >= want
            || self.line_len >= LINE_BUFFER_SIZE - 2
    }

    pub fn set_output_mode(&mut self, on: bool, active: bool) {
        self.output_mode = on;
        if active {
            if on {
                vga::enable_cursor(14, 15);
                vga::update_cursor(self.cursor_x, self.cursor_y);
            } else {
                vga::disable_cursor();
            }
        }
    }

    /// Replace the display with the scrollback, newest line at the bottom.
    /// Active terminal only; writes bypass the live screen buffer.
    pub fn show_history(&mut self) {
        if self.viewing_history {
            return;
        }
        self.viewing_history = true;
        vga::disable_cursor();

        let mut source = (self.history_index + NUM_ROWS - 1) % NUM_ROWS;
        for screen_row in (0..NUM_ROWS).rev() {
            for col in 0..NUM_COLS {
                vga::write_cell(
                    screen_row * NUM_COLS + col,
                    self.history.cells[source][col],
                );
            }
            source = (source + NUM_ROWS - 1) % NUM_ROWS;
        }
    }

    /// Return from scrollback to the live screen.
    pub fn show_main(&mut self) {
        if !self.viewing_history {
            return;
        }
        self.viewing_history = false;
        vga::restore_screen(&self.screen.cells);
        if self.output_mode {
            vga::enable_cursor(14, 15);
            vga::update_cursor(self.cursor_x, self.cursor_y);
        }
    }

    pub fn foreground(&self) -> Option<usize> {
        self.foreground
    }
}

// ---------------------------------------------------------------------------
// Terminal array and indices
// ---------------------------------------------------------------------------

lazy_static! {
    static ref TERMINALS: [Mutex<Terminal>; NUM_TERMINALS] = [
        Mutex::new(Terminal::new(0)),
        Mutex::new(Terminal::new(1)),
        Mutex::new(Terminal::new(2)),
    ];
}

/// The terminal whose foreground process the scheduler is running.
static CURRENT_INDEX: AtomicUsize = AtomicUsize::new(0);

/// The terminal owning the display and keyboard.
static ACTIVE_INDEX: AtomicUsize = AtomicUsize::new(0);

static LINE_WAITS: [WaitSlot; NUM_TERMINALS] =
    [const { WaitSlot::new() }; NUM_TERMINALS];

/// Run `f` on terminal `tid` with interrupts masked around the lock.
pub fn with_terminal<R>(tid: usize, f: impl FnOnce(&mut Terminal) -> R) -> R {
    arch::without_interrupts(|| f(&mut TERMINALS[tid].lock()))
}

pub fn current_index() -> usize {
    CURRENT_INDEX.load(Ordering::SeqCst)
}

pub fn set_current_index(tid: usize) {
    CURRENT_INDEX.store(tid % NUM_TERMINALS, Ordering::SeqCst);
}

pub fn active_index() -> usize {
    ACTIVE_INDEX.load(Ordering::SeqCst)
}

pub fn foreground(tid: usize) -> Option<usize> {
    with_terminal(tid, |t| t.foreground)
}

pub fn set_foreground(tid: usize, pid: usize) {
    with_terminal(tid, |t| t.foreground = Some(pid));
}

#[cfg(not(target_os = "none"))]
pub fn clear_foreground(tid: usize) {
    with_terminal(tid, |t| t.foreground = None);
}

pub fn line_wait(tid: usize) -> &'static WaitSlot {
    &LINE_WAITS[tid]
}

/// Clear and color every terminal; the active one drives the display.
pub fn init() {
    for tid in 0..NUM_TERMINALS {
        with_terminal(tid, |t| t.clear_screen(tid == active_index()));
    }
    vga::enable_cursor(14, 15);
    log::info!(target: "terminal", "{} terminals online", NUM_TERMINALS);
}

/// Print one character on the scheduler-current terminal.
pub fn putc(byte: u8) {
    let tid = current_index();
    let active = tid == active_index();
    with_terminal(tid, |t| t.put_char(byte, active));
}

/// Print a string on the scheduler-current terminal; returns the count.
pub fn puts(bytes: &[u8]) -> usize {
    let tid = current_index();
    let active = tid == active_index();
    with_terminal(tid, |t| {
        for &byte in bytes {
            t.put_char(byte, active);
        }
    });
    bytes.len()
}

// ---------------------------------------------------------------------------
// Keyboard-facing surface
// ---------------------------------------------------------------------------

/// Deliver one decoded key byte to the active terminal.
pub fn key_input(byte: u8) {
    let tid = active_index();
    with_terminal(tid, |t| t.put_char(byte, true));
    // Wake a parked reader to re-check its completion condition.
    LINE_WAITS[tid].notify();
}

/// Ctrl+L on the active terminal.
pub fn clear_active() {
    let tid = active_index();
    with_terminal(tid, |t| t.clear_screen(true));
}

/// PgUp / PgDn scrollback control on the active terminal.
pub fn history_up() {
    let tid = active_index();
    with_terminal(tid, |t| t.show_history());
}

pub fn history_down() {
    let tid = active_index();
    with_terminal(tid, |t| t.show_main());
}

/// Alt+F2: rotate keyboard and display focus to the next terminal.
///
/// The outgoing terminal's screen (including anything a vidmapped program
/// drew) is captured into its back buffer and its foreground process's
/// video window is re-aimed there; the incoming terminal takes the display
/// and physical video memory.
pub fn next_terminal() {
    arch::without_interrupts(|| {
        let old = active_index();
        let new = (old + 1) % NUM_TERMINALS;

        let old_fg = {
            let mut terminal = TERMINALS[old].lock();
            vga::save_screen(&mut terminal.screen.cells);
            terminal.foreground.map(|pid| (pid, terminal.screen.physical_address()))
        };
        if let Some((pid, buffer_pa)) = old_fg {
            PAGING.lock().retarget_vidmap(pid, buffer_pa);
        }

        ACTIVE_INDEX.store(new, Ordering::SeqCst);

        let terminal = TERMINALS[new].lock();
        if let Some(pid) = terminal.foreground {
            PAGING.lock().retarget_vidmap(pid, VIDEO_MEM_BASE);
        }
        vga::restore_screen(&terminal.screen.cells);
        if terminal.output_mode {
            vga::enable_cursor(14, 15);
            vga::update_cursor(terminal.cursor_x, terminal.cursor_y);
        } else {
            vga::disable_cursor();
        }
    });
}

// ---------------------------------------------------------------------------
// Fatal banner
// ---------------------------------------------------------------------------

/// Paint the fatal-stop screen and halt. Kernel-mode faults end here.
pub fn fatal_banner(reason: &str) -> ! {
    let blank = vga::cell(b' ', BSOD_ATTRIBUTE);
    for index in 0..vga::CELL_COUNT {
        vga::write_cell(index, blank);
    }
    let message = b"kernel fatal exception";
    let row = NUM_ROWS / 2 - 1;
    let start = row * NUM_COLS + (NUM_COLS - message.len()) / 2;
    for (offset, &byte) in message.iter().enumerate() {
        vga::write_cell(start + offset, vga::cell(byte, BSOD_ATTRIBUTE));
    }
    let detail = reason.as_bytes();
    let detail_len = detail.len().min(NUM_COLS);
    let start = (row + 1) * NUM_COLS + (NUM_COLS - detail_len) / 2;
    for (offset, &byte) in detail.iter().take(detail_len).enumerate() {
        vga::write_cell(start + offset, vga::cell(byte, BSOD_ATTRIBUTE));
    }
    vga::disable_cursor();
    arch::halt_loop()
}

// ---------------------------------------------------------------------------
// Descriptor operations
// ---------------------------------------------------------------------------

/// Line-buffered blocking read from the caller's terminal.
pub fn terminal_read(buf: &mut [u8]) -> KernelResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let tid = files::current_terminal();

    with_terminal(tid, |t| {
        t.reading = true;
        t.clear_line();
    });
    LINE_WAITS[tid].clear();

    loop {
        if with_terminal(tid, |t| t.line_ready(buf.len())) {
            break;
        }
        LINE_WAITS[tid].wait();
    }

    Ok(with_terminal(tid, |t| {
        if t.line_len == 0 || t.line[t.line_len - 1] != b'\n' {
            // Overflow return still carries the newline contract.
            t.push_line_byte(b'\n');
            if t.line[t.line_len - 1] != b'\n' {
                t.line[t.line_len - 1] = b'\n';
            }
        }
        let count = t.line_len.min(buf.len());
        buf[..count].copy_from_slice(&t.line[..count]);
        for slot in buf[count..].iter_mut() {
            *slot = 0;
        }
        t.reading = false;
        count
    }))
}

/// Write program output to the caller's terminal.
pub fn terminal_write(buf: &[u8]) -> KernelResult<usize> {
    let tid = files::current_terminal();
    let active = tid == active_index();
    Ok(with_terminal(tid, |t| t.write_bytes(buf, active)))
}

/// The terminal's descriptor-operation implementation (stdin/stdout and
/// explicitly opened terminal descriptors).
pub struct TerminalFile;

impl FileOperations for TerminalFile {
    fn read(&self, _fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
        terminal_read(buf)
    }

    fn write(&self, _fd: usize, buf: &[u8]) -> KernelResult<usize> {
        terminal_write(buf)
    }

    fn ioctl(&self, _fd: usize, command: u32, arg: usize) -> KernelResult<isize> {
        match command {
            IOCTL_SET_OUTPUT_MODE => {
                let tid = files::current_terminal();
                let active = tid == active_index();
                with_terminal(tid, |t| t.set_output_mode(arg != 0, active));
                Ok(0)
            }
            IOCTL_PLAY_AUDIO => {
                audio::play();
                Ok(0)
            }
            IOCTL_LOAD_SINEWAVE => {
                audio::load_sine_wave(arg as u32);
                Ok(0)
            }
            IOCTL_STOP_AUDIO => {
                audio::stop();
                Ok(0)
            }
            _ => Err(KernelError::InvalidArgument {
                what: "terminal ioctl",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_characters_echo_and_buffer() {
        let _arch = crate::arch::test_control::lock_arch();
        let mut t = Terminal::new(0);
        for &b in b"hi" {
            t.put_char(b, true);
        }
        assert_eq!(t.cursor(), (2, 0));
        assert_eq!(t.line_bytes(), b"hi");
        assert_eq!(vga::cell_char(t.screen.cells[0][0]), b'h');
        assert_eq!(vga::cell_char(t.screen.cells[0][1]), b'i');
    }

    #[test]
    fn inactive_terminal_keeps_state_out_of_the_line_buffer() {
        let mut t = Terminal::new(1);
        t.write_bytes(b"background", false);
        // Program output on a background terminal renders to its buffer
        // but feeds no reader.
        assert_eq!(t.line_len(), 0);
        assert_eq!(vga::cell_char(t.screen.cells[0][0]), b'b');
    }

    #[test]
    fn newline_wraps_and_tab_expands() {
        let _arch = crate::arch::test_control::lock_arch();
        let mut t = Terminal::new(0);
        t.put_char(b'\n', true);
        assert_eq!(t.cursor(), (0, 1));
        assert_eq!(t.line_bytes(), b"\n");

        t.put_char(b'\t', true);
        assert_eq!(t.cursor(), (TAB_SIZE, 1));
        assert_eq!(t.line_bytes(), b"\n    ");
    }

    #[test]
    fn backspace_respects_the_write_margin() {
        let _arch = crate::arch::test_control::lock_arch();
        let mut t = Terminal::new(0);
        t.write_bytes(b"391OS> ", true);
        let margin = t.cursor().0;
        t.clear_line();

        t.put_char(b'a', true);
        t.put_char(b'\x08', true);
        assert_eq!(t.cursor(), (margin, 0));
        assert_eq!(t.line_len(), 0);

        // At the margin, backspace is a no-op.
        t.put_char(b'\x08', true);
        assert_eq!(t.cursor(), (margin, 0));
    }

    #[test]
    fn long_lines_wrap_and_scroll_feeds_history() {
        let _arch = crate::arch::test_control::lock_arch();
        let mut t = Terminal::new(0);
        for _ in 0..NUM_COLS {
            t.put_char(b'x', true);
        }
        assert_eq!(t.cursor(), (0, 1));

        // Drive the cursor off the bottom; the screen scrolls once.
        for _ in 0..NUM_ROWS {
            t.put_char(b'\n', true);
        }
        assert_eq!(t.cursor().1, NUM_ROWS - 1);
        // The departed top row (the x's) is now in history.
        assert_eq!(vga::cell_char(t.history.cells[0][0]), b'x');
        // And no longer on screen.
        assert_ne!(vga::cell_char(t.screen.cells[0][0]), b'x');
    }

    #[test]
    fn raw_mode_suppresses_echo_but_not_the_line_buffer() {
        let mut t = Terminal::new(0);
        t.set_output_mode(false, false);
        t.put_char(b'q', true);
        assert_eq!(t.cursor(), (0, 0));
        assert_ne!(vga::cell_char(t.screen.cells[0][0]), b'q');
        assert_eq!(t.line_bytes(), b"q");
    }

    #[test]
    fn line_ready_conditions() {
        let _arch = crate::arch::test_control::lock_arch();
        let mut t = Terminal::new(0);
        assert!(!t.line_ready(128));
        t.put_char(b'o', true);
        t.put_char(b'k', true);
        assert!(!t.line_ready(128));
        t.put_char(b'\n', true);
        assert!(t.line_ready(128));

        // Tiny destination buffer completes without a newline.
        let mut t = Terminal::new(0);
        t.put_char(b'a', true);
        t.put_char(b'b', true);
        assert!(t.line_ready(3));

        // Saturation completes regardless of destination size.
        let mut t = Terminal::new(0);
        for _ in 0..LINE_BUFFER_SIZE {
            t.put_char(b'z', true);
        }
        assert_eq!(t.line_len(), LINE_BUFFER_SIZE - 2);
        assert!(t.line_ready(4096));
    }

    #[test]
    fn clear_screen_re_echoes_a_pending_read_line() {
        let _arch = crate::arch::test_control::lock_arch();
        let mut t = Terminal::new(0);
        t.reading = true;
        for &b in b"typed" {
            t.put_char(b, true);
        }
        t.clear_screen(false);
        assert_eq!(t.line_bytes(), b"typed");
        assert_eq!(t.cursor(), (5, 0));
        assert_eq!(vga::cell_char(t.screen.cells[0][0]), b't');
    }

    #[test]
    fn write_bytes_skips_nul_and_counts_all() {
        let mut t = Terminal::new(2);
        let written = t.write_bytes(b"a\0b", false);
        assert_eq!(written, 3);
        assert_eq!(vga::cell_char(t.screen.cells[0][0]), b'a');
        assert_eq!(vga::cell_char(t.screen.cells[0][1]), b'b');
    }

    #[test]
    fn history_view_blocks_output() {
        let mut t = Terminal::new(0);
        t.viewing_history = true;
        t.put_char(b'x', true);
        assert_eq!(t.cursor(), (0, 0));
        assert_eq!(t.line_len(), 0);
    }
}
