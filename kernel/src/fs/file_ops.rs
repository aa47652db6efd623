//! Regular-file and directory descriptor operations
//!
//! Descriptor state (inode, position, delete mode) lives in the owning
//! process's table; these implementations fetch it per call. The directory
//! cursor and the delete-mode flag are both per descriptor.

use crate::drivers::FileOperations;
use crate::error::{KernelError, KernelResult};
use crate::process::files;

use super::FILENAME_LEN;

/// File ioctl commands (reachable with a negative fd as well, for callers
/// that have no descriptor yet).
pub const IOCTL_CREATE_FILE: u32 = 0;
pub const IOCTL_CLEAR_FILE: u32 = 1;
pub const IOCTL_SEEK_END: u32 = 2;
pub const IOCTL_SET_DELETE_MODE: u32 = 3;

pub struct RegularFile;

impl FileOperations for RegularFile {
    fn read(&self, fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let inode = files::fd_inode(fd)?;
        let position = files::fd_position(fd)?;
        let count = super::with(|image| image.read_data(inode, position, buf))?;
        files::set_fd_position(fd, position + count)?;
        Ok(count)
    }

    /// Ordinary writes extend the file at the descriptor position. With
    /// delete mode armed, one write instead truncates `buf.len()` bytes
    /// off the end and disarms itself.
    fn write(&self, fd: usize, buf: &[u8]) -> KernelResult<usize> {
        let inode = files::fd_inode(fd)?;
        let position = files::fd_position(fd)?;

        if files::fd_delete_mode(fd)? {
            let removed = super::with(|image| image.delete_data(inode, buf.len()))?;
            files::set_fd_delete_mode(fd, false)?;
            files::set_fd_position(fd, position.saturating_sub(removed))?;
            return Ok(removed);
        }

        let written = super::with(|image| image.write_data(inode, position, buf))?;
        files::set_fd_position(fd, position + written)?;
        Ok(written)
    }

    fn ioctl(&self, _fd: usize, command: u32, arg: usize) -> KernelResult<isize> {
        match command {
            IOCTL_CREATE_FILE => {
                let name = crate::syscall::user_cstr(arg, FILENAME_LEN + 1)?;
                super::with(|image| image.create_file(name))?;
                Ok(0)
            }
            IOCTL_CLEAR_FILE => {
                let name = crate::syscall::user_cstr(arg, FILENAME_LEN + 1)?;
                super::with(|image| image.clear_file(name))?;
                Ok(0)
            }
            IOCTL_SEEK_END => {
                // arg names the descriptor to reposition.
                let target = arg;
                let inode = files::fd_inode(target)?;
                let length = super::with(|image| image.file_length(inode))?;
                files::set_fd_position(target, length)?;
                Ok(0)
            }
            IOCTL_SET_DELETE_MODE => {
                files::set_fd_delete_mode(arg, true)?;
                Ok(0)
            }
            _ => Err(KernelError::InvalidArgument { what: "file ioctl" }),
        }
    }
}

pub struct DirectoryFile;

impl FileOperations for DirectoryFile {
    /// One entry name per call; the descriptor position is the entry index.
    fn read(&self, fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let index = files::fd_position(fd)?;
        let dentry = match super::with(|image| image.dentry_by_index(index)) {
            Ok(dentry) => dentry,
            // Past the last entry reads as end-of-directory.
            Err(KernelError::NotFound { .. }) => return Ok(0),
            Err(error) => return Err(error),
        };
        files::set_fd_position(fd, index + 1)?;

        let name = dentry.name_bytes();
        let count = name.len().min(buf.len());
        buf[..count].copy_from_slice(&name[..count]);
        Ok(count)
    }

    fn write(&self, _fd: usize, _buf: &[u8]) -> KernelResult<usize> {
        Err(KernelError::Unsupported {
            operation: "directory write",
        })
    }
}
