//! Device drivers and the file-operation capability seam
//!
//! A descriptor stores a tagged [`FileKind`]; [`ops`] maps the tag to the
//! kind's implementation of [`FileOperations`]. The four kinds the core
//! knows are the terminal, the virtualized RTC, regular files, and
//! directories.

pub mod audio;
pub mod keyboard;
pub mod pit;
pub mod rtc;
pub mod terminal;
pub mod vga;

use crate::error::KernelResult;

/// Descriptor tag: which driver a file descriptor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Terminal,
    Rtc,
    Regular,
    Directory,
}

/// The capability surface every descriptor kind provides.
///
/// Operations receive the descriptor index and look any per-descriptor
/// state (inode, position, modes) up in the current process's table.
pub trait FileOperations: Sync {
    fn open(&self, _name: &[u8]) -> KernelResult<()> {
        Ok(())
    }

    fn close(&self, _fd: usize) -> KernelResult<()> {
        Ok(())
    }

    fn read(&self, fd: usize, buf: &mut [u8]) -> KernelResult<usize>;

    fn write(&self, fd: usize, buf: &[u8]) -> KernelResult<usize>;

    fn ioctl(&self, _fd: usize, _command: u32, _arg: usize) -> KernelResult<isize> {
        Err(crate::error::KernelError::Unsupported { operation: "ioctl" })
    }
}

/// Dispatch a descriptor tag to its driver.
pub fn ops(kind: FileKind) -> &'static dyn FileOperations {
    match kind {
        FileKind::Terminal => &terminal::TerminalFile,
        FileKind::Rtc => &rtc::RtcFile,
        FileKind::Regular => &crate::fs::file_ops::RegularFile,
        FileKind::Directory => &crate::fs::file_ops::DirectoryFile,
    }
}
