//! Kernel logging through the `log` facade
//!
//! A single [`KernelLogger`] is installed at boot; records are rendered to
//! the serial console so they survive terminal switches and user drawing.
//! `print!`/`println!` (boot banners, the fatal-exception banner path) share
//! the same sink.

use core::fmt;

use log::{LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::arch::console_write_fmt(format_args!(
                "[{:<5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Install the serial-backed logger. Safe to call once, early in boot.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    crate::arch::console_write_fmt(args);
}
