//! Program image loading
//!
//! Images are flat copies: validate the four magic bytes and the file type,
//! pull the entry point out of header bytes 24..27 (little endian), and
//! copy the whole file into the user window at its load address. No segment
//! parsing.

use crate::error::{KernelError, KernelResult};
use crate::fs::{self, FileType};

/// Bytes of header needed for validation and the entry point.
pub const HEADER_LEN: usize = 28;

const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ENTRY_OFFSET: usize = 24;

/// Validate `name`'s image header; returns (inode, entry point).
pub fn read_header(name: &[u8]) -> KernelResult<(usize, usize)> {
    let (inode, file_type, header) = fs::with(|image| {
        let dentry = image.dentry_by_name(name)?;
        let mut header = [0u8; HEADER_LEN];
        let got = image.read_data(dentry.inode as usize, 0, &mut header)?;
        if got < HEADER_LEN {
            return Err(KernelError::BadImage {
                reason: "short header",
            });
        }
        Ok((dentry.inode as usize, dentry.file_type, header))
    })?;

    if header[..4] != MAGIC {
        return Err(KernelError::BadImage {
            reason: "magic mismatch",
        });
    }
    if file_type != FileType::Regular {
        return Err(KernelError::BadImage {
            reason: "not a regular file",
        });
    }

    let entry = u32::from_le_bytes([
        header[ENTRY_OFFSET],
        header[ENTRY_OFFSET + 1],
        header[ENTRY_OFFSET + 2],
        header[ENTRY_OFFSET + 3],
    ]) as usize;
    Ok((inode, entry))
}

/// Copy the whole image into the user window. The caller must have the
/// target process's directory loaded.
pub fn load_program(inode: usize) -> KernelResult<()> {
    fs::with(|image| {
        let length = image.file_length(inode)?;
        let window = user_image_window(length);
        let copied = image.read_data(inode, 0, window)?;
        if copied < length.min(window.len()) {
            return Err(KernelError::BadImage {
                reason: "short image read",
            });
        }
        Ok(())
    })
}

/// Destination slice for the program copy.
#[cfg(target_os = "none")]
fn user_image_window(length: usize) -> &'static mut [u8] {
    let capacity = crate::mm::USER_VIRT_END - crate::mm::USER_IMAGE_VIRT;
    // SAFETY: The caller switched CR3 to the target process first, so the
    // user super-page backs this range; the window never escapes the copy.
    unsafe {
        core::slice::from_raw_parts_mut(
            crate::mm::USER_IMAGE_VIRT as *mut u8,
            length.min(capacity),
        )
    }
}

/// Host double: capture the copy for assertions instead of touching
/// the (nonexistent) user window.
#[cfg(not(target_os = "none"))]
fn user_image_window(length: usize) -> &'static mut [u8] {
    use spin::Mutex;
    static CAPTURE: Mutex<[u8; 0x4000]> = Mutex::new([0; 0x4000]);
    let mut guard = CAPTURE.lock();
    let window: &mut [u8] = &mut guard[..length.min(0x4000)];
    // SAFETY: Test-only lifetime laundering over a static buffer; the
    // guard is dropped but the data is a static and tests serialize access.
    unsafe { &mut *(window as *mut [u8]) }
}
