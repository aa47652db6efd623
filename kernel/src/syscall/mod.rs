//! System-call surface
//!
//! Thirteen numbered calls dispatched from vector 0x80: number in EAX,
//! arguments in EBX/ECX/EDX, result back in EAX. Everything fallible
//! surfaces as -1; the two signal placeholders always do.

use crate::drivers::{self, FileKind};
use crate::error::{KernelError, KernelResult};
use crate::mm::{self, KmemFlags};
use crate::process::{self, files};

/// System call numbers.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 1,
    Execute = 2,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    Getargs = 7,
    Vidmap = 8,
    SetHandler = 9,
    Sigreturn = 10,
    Malloc = 11,
    Free = 12,
    Ioctl = 13,
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, ()> {
        match value {
            1 => Ok(Syscall::Halt),
            2 => Ok(Syscall::Execute),
            3 => Ok(Syscall::Read),
            4 => Ok(Syscall::Write),
            5 => Ok(Syscall::Open),
            6 => Ok(Syscall::Close),
            7 => Ok(Syscall::Getargs),
            8 => Ok(Syscall::Vidmap),
            9 => Ok(Syscall::SetHandler),
            10 => Ok(Syscall::Sigreturn),
            11 => Ok(Syscall::Malloc),
            12 => Ok(Syscall::Free),
            13 => Ok(Syscall::Ioctl),
            _ => Err(()),
        }
    }
}

/// Longest user string the kernel will chase: a command name plus the
/// argument tail.
const MAX_USER_STRING: usize = 33 + process::MAX_ARGS;

/// Borrow a NUL-terminated user string of at most `max` bytes.
///
/// The single user address space is fully mapped while its process runs,
/// so the borrow is a plain bounded scan.
pub fn user_cstr(addr: usize, max: usize) -> KernelResult<&'static [u8]> {
    if addr == 0 {
        return Err(KernelError::InvalidArgument {
            what: "null string",
        });
    }
    for length in 0..max {
        // SAFETY: Bounded byte probe of the caller's mapped address space.
        let byte = unsafe { *((addr + length) as *const u8) };
        if byte == 0 {
            // SAFETY: The range addr..addr+length was just probed.
            return Ok(unsafe { core::slice::from_raw_parts(addr as *const u8, length) });
        }
    }
    Err(KernelError::InvalidArgument {
        what: "unterminated string",
    })
}

fn user_slice_mut(addr: usize, length: usize) -> KernelResult<&'static mut [u8]> {
    if addr == 0 {
        return Err(KernelError::InvalidArgument { what: "null buffer" });
    }
    if length > isize::MAX as usize {
        return Err(KernelError::InvalidArgument {
            what: "buffer length",
        });
    }
    // SAFETY: Null-checked, bounded, and the caller's address space stays
    // loaded for the duration of the call.
    Ok(unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, length) })
}

fn user_slice(addr: usize, length: usize) -> KernelResult<&'static [u8]> {
    if addr == 0 {
        return Err(KernelError::InvalidArgument { what: "null buffer" });
    }
    if length > isize::MAX as usize {
        return Err(KernelError::InvalidArgument {
            what: "buffer length",
        });
    }
    // SAFETY: See user_slice_mut.
    Ok(unsafe { core::slice::from_raw_parts(addr as *const u8, length) })
}

fn result_isize(result: KernelResult<isize>) -> isize {
    match result {
        Ok(value) => value,
        Err(error) => {
            log::debug!(target: "syscall", "{}", error);
            error.to_syscall()
        }
    }
}

/// Dispatch one system call.
pub fn dispatch(number: usize, arg1: usize, arg2: usize, arg3: usize) -> isize {
    let Ok(call) = Syscall::try_from(number) else {
        log::debug!(target: "syscall", "unknown syscall {}", number);
        return -1;
    };

    match call {
        Syscall::Halt => process::system_halt(arg1 & 0xFF),
        Syscall::Execute => result_isize(
            user_cstr(arg1, MAX_USER_STRING).map(process::system_execute),
        ),
        Syscall::Read => result_isize(
            user_slice_mut(arg2, arg3)
                .and_then(|buf| files::read(arg1, buf))
                .map(|count| count as isize),
        ),
        Syscall::Write => result_isize(
            user_slice(arg2, arg3)
                .and_then(|buf| files::write(arg1, buf))
                .map(|count| count as isize),
        ),
        Syscall::Open => result_isize(
            user_cstr(arg1, MAX_USER_STRING)
                .and_then(files::open)
                .map(|fd| fd as isize),
        ),
        Syscall::Close => result_isize(files::close(arg1).map(|_| 0)),
        Syscall::Getargs => result_isize(
            user_slice_mut(arg1, arg2)
                .and_then(|buf| files::getargs(buf))
                .map(|_| 0),
        ),
        Syscall::Vidmap => result_isize(sys_vidmap(arg1)),
        Syscall::SetHandler | Syscall::Sigreturn => -1,
        Syscall::Malloc => result_isize(
            mm::kmalloc(arg1, KmemFlags::ATOMIC | KmemFlags::USER).map(|va| va as isize),
        ),
        Syscall::Free => result_isize(
            mm::kfree(arg1, KmemFlags::ATOMIC | KmemFlags::USER).map(|_| 0),
        ),
        Syscall::Ioctl => result_isize(sys_ioctl(arg1, arg2 as u32, arg3)),
    }
}

/// Map the caller's terminal video window and store its address through
/// `out`, which must itself lie inside the user page.
fn sys_vidmap(out: usize) -> KernelResult<isize> {
    if !mm::user_window_contains(out) {
        return Err(KernelError::InvalidArgument {
            what: "vidmap pointer",
        });
    }
    let pid = process::current_pid().ok_or(KernelError::NotInitialized {
        subsystem: "process table",
    })?;

    crate::arch::without_interrupts(|| {
        let mut paging = mm::PAGING.lock();
        paging.activate_vidmap(pid);
        // A background caller draws into its terminal's back buffer, not
        // the live display.
        let tid = files::current_terminal();
        if tid != drivers::terminal::active_index() {
            let buffer_pa =
                drivers::terminal::with_terminal(tid, |t| t.screen.physical_address());
            paging.retarget_vidmap(pid, buffer_pa);
        }
    });

    // SAFETY: `out` was range-checked into the caller's user page above.
    unsafe {
        *(out as *mut usize) = mm::USER_VIDEO_VIRT;
    }
    Ok(mm::USER_VIDEO_VIRT as isize)
}

fn sys_ioctl(fd: usize, command: u32, arg: usize) -> KernelResult<isize> {
    // A negative descriptor reaches the regular-file ioctls without an
    // open file (create-file needs exactly that).
    if (fd as isize) < 0 {
        return drivers::ops(FileKind::Regular).ioctl(0, command, arg);
    }
    files::ioctl(fd, command, arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_numbers_fail() {
        assert_eq!(dispatch(0, 0, 0, 0), -1);
        assert_eq!(dispatch(14, 0, 0, 0), -1);
        assert_eq!(dispatch(usize::MAX, 0, 0, 0), -1);
    }

    #[test]
    fn signal_placeholders_fail() {
        assert_eq!(dispatch(Syscall::SetHandler as usize, 0, 0, 0), -1);
        assert_eq!(dispatch(Syscall::Sigreturn as usize, 0, 0, 0), -1);
    }

    #[test]
    fn null_user_pointers_fail() {
        assert_eq!(dispatch(Syscall::Execute as usize, 0, 0, 0), -1);
        assert_eq!(dispatch(Syscall::Read as usize, 0, 0, 16), -1);
        assert_eq!(dispatch(Syscall::Open as usize, 0, 0, 0), -1);
    }

    #[test]
    fn user_cstr_bounds() {
        let value = b"hello\0world";
        let parsed = user_cstr(value.as_ptr() as usize, 32).unwrap();
        assert_eq!(parsed, b"hello");

        let unterminated = [b'x'; 8];
        assert!(user_cstr(unterminated.as_ptr() as usize, 8).is_err());
    }

    #[test]
    fn vidmap_rejects_pointers_outside_the_user_page() {
        assert_eq!(dispatch(Syscall::Vidmap as usize, 0x1000, 0, 0), -1);
        assert_eq!(
            dispatch(Syscall::Vidmap as usize, mm::USER_VIDEO_VIRT, 0, 0),
            -1
        );
    }
}
