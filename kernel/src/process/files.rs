//! Per-process open-file operations
//!
//! The descriptor layer over the [`super::TABLE`] arena: open resolves a
//! name to a [`FileKind`], claims the first free slot at or above 2, and
//! every later call re-validates the descriptor before dispatching through
//! the kind's operations. Slots 0/1 are the terminal and refuse direction
//! violations (read on stdout, write on stdin) and closing.

use crate::arch;
use crate::drivers::{self, FileKind};
use crate::error::{KernelError, KernelResult};
use crate::fs::{self, FileType};

use super::{ProcessTable, FILE_ARRAY_SIZE, TABLE};

fn current_pid() -> KernelResult<usize> {
    super::current_pid().ok_or(KernelError::NotInitialized {
        subsystem: "process table",
    })
}

fn with_current<R>(f: impl FnOnce(&mut super::Pcb) -> R) -> KernelResult<R> {
    let pid = current_pid()?;
    Ok(arch::without_interrupts(|| TABLE.with(pid, f)))
}

fn kind_of(fd: usize) -> KernelResult<FileKind> {
    if fd >= FILE_ARRAY_SIZE {
        return Err(KernelError::InvalidArgument { what: "fd" });
    }
    with_current(|pcb| pcb.files[fd].kind)?.ok_or(KernelError::InvalidArgument { what: "fd" })
}

/// Open `name`, binding a fresh descriptor.
pub fn open(name: &[u8]) -> KernelResult<usize> {
    // The RTC has no directory entry of its own in some images; the name
    // binds directly, as does a dentry of rtc type.
    let (kind, inode) = if name == b"rtc" {
        (FileKind::Rtc, 0)
    } else {
        let dentry = fs::with(|image| image.dentry_by_name(name))?;
        let kind = match dentry.file_type {
            FileType::Rtc => FileKind::Rtc,
            FileType::Directory => FileKind::Directory,
            FileType::Regular => FileKind::Regular,
        };
        (kind, dentry.inode as usize)
    };

    let fd = with_current(|pcb| {
        for fd in 0..FILE_ARRAY_SIZE {
            if !pcb.files[fd].in_use() {
                pcb.files[fd].kind = Some(kind);
                pcb.files[fd].inode = inode;
                pcb.files[fd].position = 0;
                pcb.files[fd].delete_mode = false;
                return Ok(fd);
            }
        }
        Err(KernelError::ResourceExhausted {
            resource: "open-file slots",
        })
    })??;

    drivers::ops(kind).open(name)?;
    Ok(fd)
}

/// Close `fd`. Descriptors 0 and 1 are permanently bound.
pub fn close(fd: usize) -> KernelResult<()> {
    if fd == 0 || fd == 1 {
        return Err(KernelError::InvalidArgument { what: "std fd" });
    }
    let kind = kind_of(fd)?;
    drivers::ops(kind).close(fd)?;
    with_current(|pcb| pcb.files[fd] = super::FileDescriptor::closed())?;
    Ok(())
}

/// Close every descriptor above the std pair (halt path).
pub fn close_all() -> KernelResult<()> {
    for fd in 2..FILE_ARRAY_SIZE {
        if kind_of(fd).is_ok() {
            close(fd)?;
        }
    }
    Ok(())
}

pub fn read(fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let kind = kind_of(fd)?;
    if fd == 1 {
        return Err(KernelError::InvalidArgument {
            what: "read on stdout",
        });
    }
    drivers::ops(kind).read(fd, buf)
}

pub fn write(fd: usize, buf: &[u8]) -> KernelResult<usize> {
    let kind = kind_of(fd)?;
    if fd == 0 {
        return Err(KernelError::InvalidArgument {
            what: "write on stdin",
        });
    }
    drivers::ops(kind).write(fd, buf)
}

pub fn ioctl(fd: usize, command: u32, arg: usize) -> KernelResult<isize> {
    let kind = kind_of(fd)?;
    drivers::ops(kind).ioctl(fd, command, arg)
}

// ---------------------------------------------------------------------------
// Per-descriptor state accessors used by the driver implementations
// ---------------------------------------------------------------------------

pub fn fd_inode(fd: usize) -> KernelResult<usize> {
    kind_of(fd)?;
    with_current(|pcb| pcb.files[fd].inode)
}

pub fn fd_position(fd: usize) -> KernelResult<usize> {
    kind_of(fd)?;
    with_current(|pcb| pcb.files[fd].position)
}

pub fn set_fd_position(fd: usize, position: usize) -> KernelResult<()> {
    kind_of(fd)?;
    with_current(|pcb| pcb.files[fd].position = position)
}

pub fn fd_delete_mode(fd: usize) -> KernelResult<bool> {
    kind_of(fd)?;
    with_current(|pcb| pcb.files[fd].delete_mode)
}

pub fn set_fd_delete_mode(fd: usize, armed: bool) -> KernelResult<()> {
    kind_of(fd)?;
    with_current(|pcb| pcb.files[fd].delete_mode = armed)
}

/// Copy the saved command tail into `buf`; fails if it does not fit with
/// its terminator.
pub fn getargs(buf: &mut [u8]) -> KernelResult<()> {
    with_current(|pcb| {
        let args = pcb.args();
        if args.len() + 1 > buf.len() {
            return Err(KernelError::InvalidArgument {
                what: "getargs buffer too small",
            });
        }
        buf[..args.len()].copy_from_slice(args);
        buf[args.len()..].fill(0);
        Ok(())
    })?
}

/// The terminal the current process runs under.
pub fn current_terminal() -> usize {
    super::current_pid()
        .map(|pid| arch::without_interrupts(|| TABLE.with(pid, |pcb| pcb.terminal)))
        .unwrap_or(0)
}

/// Validity check used by the table-level unit tests.
pub fn descriptor_in_use(table: &ProcessTable, pid: usize, fd: usize) -> bool {
    table.with(pid, |pcb| fd < FILE_ARRAY_SIZE && pcb.files[fd].in_use())
}
