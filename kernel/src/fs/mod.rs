//! Boot-block file system
//!
//! The image arrives in memory as a multiboot module and is never persisted:
//! a 4 KiB boot block, up to 63 inodes (one block each), then data blocks.
//!
//! Boot block: `{ dir_count: u32, inode_count: u32, data_count: u32,
//! reserved[52], dentries[63] }`; a dentry is `{ name[32], type: u32,
//! inode: u32, reserved[24] }` with type 0 = rtc, 1 = directory,
//! 2 = regular. An inode is `{ length: u32, block_indices[1023] }`.
//!
//! Inode 0 is reserved and data-block index 0 means "empty slot", so both
//! free maps are seeded with slot 0 taken. All access goes through byte
//! offsets on the image, which keeps the parser free of layout casts and
//! lets the tests run it over plain buffers.

pub mod file_ops;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub const BLOCK_SIZE: usize = 4096;
pub const FILENAME_LEN: usize = 32;
pub const MAX_FILES: usize = 63;
pub const MAX_BLOCKS_PER_INODE: usize = 1023;

const DENTRY_SIZE: usize = 64;
const DENTRIES_OFFSET: usize = 64;
const DENTRY_TYPE_OFFSET: usize = 32;
const DENTRY_INODE_OFFSET: usize = 36;

/// Directory-entry file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileType {
    Rtc = 0,
    Directory = 1,
    Regular = 2,
}

impl TryFrom<u32> for FileType {
    type Error = KernelError;

    fn try_from(value: u32) -> KernelResult<Self> {
        match value {
            0 => Ok(FileType::Rtc),
            1 => Ok(FileType::Directory),
            2 => Ok(FileType::Regular),
            _ => Err(KernelError::InvalidArgument { what: "file type" }),
        }
    }
}

/// A resolved directory entry.
#[derive(Debug, Clone, Copy)]
pub struct Dentry {
    pub name: [u8; FILENAME_LEN],
    pub file_type: FileType,
    pub inode: u32,
}

impl Dentry {
    /// The stored name up to its NUL padding (full 32 bytes if unpadded).
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_LEN);
        &self.name[..len]
    }
}

/// A parsed, mutable view over a file-system image.
pub struct FsImage<'a> {
    data: &'a mut [u8],
    inode_count: usize,
    data_count: usize,
    /// In-use flags, one bit per inode / data block. Slot 0 of each is
    /// reserved by the on-image encoding.
    inode_used: [bool; MAX_FILES + 1],
    block_used: BlockMap,
}

/// One bit per possible data block (63 inodes x 1023 blocks).
struct BlockMap {
    bits: [u8; (MAX_FILES * MAX_BLOCKS_PER_INODE + 7) / 8],
}

impl BlockMap {
    const fn new() -> Self {
        BlockMap {
            bits: [0; (MAX_FILES * MAX_BLOCKS_PER_INODE + 7) / 8],
        }
    }

    fn set(&mut self, index: usize, used: bool) {
        let mask = 1u8 << (index % 8);
        if used {
            self.bits[index / 8] |= mask;
        } else {
            self.bits[index / 8] &= !mask;
        }
    }

    fn get(&self, index: usize) -> bool {
        self.bits[index / 8] & (1u8 << (index % 8)) != 0
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl<'a> FsImage<'a> {
    /// Parse an image, seed the free maps from the directory, and take
    /// ownership of the buffer.
    pub fn parse(data: &'a mut [u8]) -> KernelResult<Self> {
        if data.len() < BLOCK_SIZE {
            return Err(KernelError::BadImage {
                reason: "short boot block",
            });
        }
        let dir_count = read_u32(data, 0) as usize;
        let inode_count = read_u32(data, 4) as usize;
        let data_count = read_u32(data, 8) as usize;
        if dir_count > MAX_FILES || inode_count == 0 || inode_count > MAX_FILES {
            return Err(KernelError::BadImage {
                reason: "boot block counts",
            });
        }
        if data.len() < (1 + inode_count + data_count) * BLOCK_SIZE {
            return Err(KernelError::BadImage {
                reason: "image shorter than block counts",
            });
        }

        let mut image = FsImage {
            data,
            inode_count,
            data_count,
            inode_used: [false; MAX_FILES + 1],
            block_used: BlockMap::new(),
        };
        // Index 0 of both namespaces is the "empty" encoding.
        image.inode_used[0] = true;
        image.block_used.set(0, true);

        for index in 0..dir_count {
            let dentry = image.dentry_by_index(index)?;
            let inode = dentry.inode as usize;
            if inode <= MAX_FILES {
                image.inode_used[inode] = true;
            }
            if dentry.file_type == FileType::Regular && inode != 0 && inode < inode_count {
                for slot in 0..MAX_BLOCKS_PER_INODE {
                    let block = image.block_index(inode, slot);
                    if block == 0 || block >= image.data_count {
                        break;
                    }
                    image.block_used.set(block, true);
                }
            }
        }
        Ok(image)
    }

    pub fn dir_count(&self) -> usize {
        read_u32(self.data, 0) as usize
    }

    fn dentry_offset(index: usize) -> usize {
        DENTRIES_OFFSET + index * DENTRY_SIZE
    }

    fn inode_offset(&self, inode: usize) -> usize {
        (1 + inode) * BLOCK_SIZE
    }

    fn data_block_offset(&self, block: usize) -> usize {
        (1 + self.inode_count + block) * BLOCK_SIZE
    }

    /// Length in bytes of the file behind `inode`.
    pub fn file_length(&self, inode: usize) -> KernelResult<usize> {
        if inode == 0 || inode >= self.inode_count {
            return Err(KernelError::InvalidArgument { what: "inode" });
        }
        Ok(read_u32(self.data, self.inode_offset(inode)) as usize)
    }

    fn set_file_length(&mut self, inode: usize, length: usize) {
        let offset = self.inode_offset(inode);
        write_u32(self.data, offset, length as u32);
    }

    /// The `slot`-th data-block index of `inode` (0 = empty).
    fn block_index(&self, inode: usize, slot: usize) -> usize {
        read_u32(self.data, self.inode_offset(inode) + 4 + slot * 4) as usize
    }

    fn set_block_index(&mut self, inode: usize, slot: usize, block: usize) {
        let offset = self.inode_offset(inode) + 4 + slot * 4;
        write_u32(self.data, offset, block as u32);
    }

    fn name_matches(stored: &[u8], query: &[u8]) -> bool {
        if query.len() > FILENAME_LEN {
            return false;
        }
        if stored[..query.len()] != *query {
            return false;
        }
        query.len() == FILENAME_LEN || stored[query.len()] == 0
    }

    pub fn dentry_by_name(&self, name: &[u8]) -> KernelResult<Dentry> {
        if name.is_empty() || name.len() > FILENAME_LEN {
            return Err(KernelError::InvalidArgument { what: "file name" });
        }
        for index in 0..self.dir_count() {
            let offset = Self::dentry_offset(index);
            if Self::name_matches(&self.data[offset..offset + FILENAME_LEN], name) {
                return self.dentry_by_index(index);
            }
        }
        Err(KernelError::NotFound {
            what: "directory entry",
        })
    }

    pub fn dentry_by_index(&self, index: usize) -> KernelResult<Dentry> {
        if index >= self.dir_count() {
            return Err(KernelError::NotFound {
                what: "directory index",
            });
        }
        let offset = Self::dentry_offset(index);
        let mut name = [0u8; FILENAME_LEN];
        name.copy_from_slice(&self.data[offset..offset + FILENAME_LEN]);
        let file_type = FileType::try_from(read_u32(self.data, offset + DENTRY_TYPE_OFFSET))?;
        let inode = read_u32(self.data, offset + DENTRY_INODE_OFFSET);
        Ok(Dentry {
            name,
            file_type,
            inode,
        })
    }

    /// Copy up to `buf.len()` bytes of `inode`, starting at `offset`, into
    /// `buf`. Returns the byte count actually copied; reads stop at EOF.
    pub fn read_data(&self, inode: usize, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let length = self.file_length(inode)?;
        if offset >= length {
            return Ok(0);
        }
        let mut remaining = buf.len().min(length - offset);
        let mut position = offset;
        let mut copied = 0;

        while remaining > 0 {
            let slot = position / BLOCK_SIZE;
            let within = position % BLOCK_SIZE;
            let block = self.block_index(inode, slot);
            if block == 0 || block >= self.data_count {
                return Err(KernelError::InvalidArgument {
                    what: "corrupt block index",
                });
            }
            let chunk = remaining.min(BLOCK_SIZE - within);
            let src = self.data_block_offset(block) + within;
            buf[copied..copied + chunk].copy_from_slice(&self.data[src..src + chunk]);
            copied += chunk;
            position += chunk;
            remaining -= chunk;
        }
        Ok(copied)
    }

    fn claim_free_block(&mut self) -> Option<usize> {
        for block in 1..self.data_count {
            if !self.block_used.get(block) {
                self.block_used.set(block, true);
                return Some(block);
            }
        }
        None
    }

    fn claim_free_inode(&mut self) -> Option<usize> {
        for inode in 1..self.inode_count {
            if !self.inode_used[inode] {
                self.inode_used[inode] = true;
                return Some(inode);
            }
        }
        None
    }

    /// Write `buf` into `inode` starting at `offset`, allocating data
    /// blocks as the file grows. Returns the bytes written (short when the
    /// free map runs dry).
    pub fn write_data(&mut self, inode: usize, offset: usize, buf: &[u8]) -> KernelResult<usize> {
        let mut length = self.file_length(inode)?;
        let mut position = offset;
        let mut written = 0;

        while written < buf.len() {
            let slot = position / BLOCK_SIZE;
            if slot >= MAX_BLOCKS_PER_INODE {
                break;
            }
            let mut block = self.block_index(inode, slot);
            if block == 0 {
                match self.claim_free_block() {
                    Some(free) => {
                        self.set_block_index(inode, slot, free);
                        block = free;
                    }
                    None => break,
                }
            }
            let within = position % BLOCK_SIZE;
            let chunk = (buf.len() - written).min(BLOCK_SIZE - within);
            let dst = self.data_block_offset(block) + within;
            self.data[dst..dst + chunk].copy_from_slice(&buf[written..written + chunk]);
            written += chunk;
            position += chunk;
            if position > length {
                length = position;
                self.set_file_length(inode, length);
            }
        }
        Ok(written)
    }

    /// Truncate up to `count` bytes off the end of `inode`, zeroing them
    /// and releasing data blocks that empty out. Returns the bytes removed.
    pub fn delete_data(&mut self, inode: usize, count: usize) -> KernelResult<usize> {
        let length = self.file_length(inode)?;
        let removing = count.min(length);
        let new_length = length - removing;

        let mut position = length;
        while position > new_length {
            let end_slot = (position - 1) / BLOCK_SIZE;
            let block_start = end_slot * BLOCK_SIZE;
            let chunk_start = new_length.max(block_start);
            let block = self.block_index(inode, end_slot);
            if block == 0 || block >= self.data_count {
                break;
            }
            let offset = self.data_block_offset(block) + (chunk_start - block_start);
            let chunk = position - chunk_start;
            self.data[offset..offset + chunk].fill(0);
            if chunk_start == block_start {
                self.block_used.set(block, false);
                self.set_block_index(inode, end_slot, 0);
            }
            position = chunk_start;
        }

        self.set_file_length(inode, new_length);
        Ok(removing)
    }

    /// Append a fresh regular-file dentry bound to a newly claimed inode.
    pub fn create_file(&mut self, name: &[u8]) -> KernelResult<()> {
        if name.is_empty() || name.len() > FILENAME_LEN {
            return Err(KernelError::InvalidArgument { what: "file name" });
        }
        let dir_count = self.dir_count();
        if dir_count >= MAX_FILES {
            return Err(KernelError::ResourceExhausted {
                resource: "directory entries",
            });
        }
        let inode = self
            .claim_free_inode()
            .ok_or(KernelError::ResourceExhausted { resource: "inodes" })?;

        let offset = Self::dentry_offset(dir_count);
        self.data[offset..offset + FILENAME_LEN].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name);
        write_u32(self.data, offset + DENTRY_TYPE_OFFSET, FileType::Regular as u32);
        write_u32(self.data, offset + DENTRY_INODE_OFFSET, inode as u32);
        write_u32(self.data, 0, (dir_count + 1) as u32);
        self.set_file_length(inode, 0);
        for slot in 0..MAX_BLOCKS_PER_INODE {
            if self.block_index(inode, slot) == 0 {
                break;
            }
            self.set_block_index(inode, slot, 0);
        }
        Ok(())
    }

    /// Drop a file's contents: zero its blocks, release them, zero length.
    pub fn clear_file(&mut self, name: &[u8]) -> KernelResult<()> {
        let dentry = self.dentry_by_name(name)?;
        let inode = dentry.inode as usize;
        let length = self.file_length(inode)?;
        self.delete_data(inode, length)?;
        Ok(())
    }
}

static FILE_SYSTEM: Mutex<Option<FsImage<'static>>> = Mutex::new(None);

/// Install the boot module as the global file system.
pub fn install(image: FsImage<'static>) {
    *FILE_SYSTEM.lock() = Some(image);
    log::info!(target: "fs", "file system installed");
}

/// Run `f` against the installed file system.
pub fn with<R>(f: impl FnOnce(&mut FsImage<'static>) -> KernelResult<R>) -> KernelResult<R> {
    let mut guard = FILE_SYSTEM.lock();
    match guard.as_mut() {
        Some(image) => f(image),
        None => Err(KernelError::NotInitialized {
            subsystem: "file system",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::vec;
    use std::vec::Vec;

    /// Build a minimal image: files are (name, type, contents).
    fn build_image(files: &[(&[u8], FileType, &[u8])]) -> Vec<u8> {
        let inode_count = MAX_FILES;
        let data_count = 64;
        let mut image = vec![0u8; (1 + inode_count + data_count) * BLOCK_SIZE];

        write_u32(&mut image, 0, files.len() as u32);
        write_u32(&mut image, 4, inode_count as u32);
        write_u32(&mut image, 8, data_count as u32);

        let mut next_inode = 1;
        let mut next_block = 1;
        for (index, (name, file_type, contents)) in files.iter().enumerate() {
            let offset = DENTRIES_OFFSET + index * DENTRY_SIZE;
            image[offset..offset + name.len()].copy_from_slice(name);
            write_u32(&mut image, offset + DENTRY_TYPE_OFFSET, *file_type as u32);

            if *file_type != FileType::Regular {
                continue;
            }
            let inode = next_inode;
            next_inode += 1;
            write_u32(&mut image, offset + DENTRY_INODE_OFFSET, inode as u32);

            let inode_offset = (1 + inode) * BLOCK_SIZE;
            write_u32(&mut image, inode_offset, contents.len() as u32);
            for (slot, chunk) in contents.chunks(BLOCK_SIZE).enumerate() {
                let block = next_block;
                next_block += 1;
                write_u32(&mut image, inode_offset + 4 + slot * 4, block as u32);
                let data_offset = (1 + inode_count + block) * BLOCK_SIZE;
                image[data_offset..data_offset + chunk.len()].copy_from_slice(chunk);
            }
        }
        image
    }

    #[test]
    fn dentry_lookup_by_name_and_index() {
        let mut image = build_image(&[
            (b".", FileType::Directory, b""),
            (b"frame0.txt", FileType::Regular, b"fish"),
            (b"shell", FileType::Regular, b"#!sh"),
        ]);
        let fs = FsImage::parse(&mut image).unwrap();

        assert_eq!(fs.dir_count(), 3);
        let dentry = fs.dentry_by_name(b"frame0.txt").unwrap();
        assert_eq!(dentry.file_type, FileType::Regular);
        assert_eq!(dentry.name_bytes(), b"frame0.txt");

        let by_index = fs.dentry_by_index(2).unwrap();
        assert_eq!(by_index.name_bytes(), b"shell");

        assert!(fs.dentry_by_name(b"absent").is_err());
        assert!(fs.dentry_by_index(3).is_err());
        assert!(fs.dentry_by_name(&[b'x'; 33]).is_err());
    }

    #[test]
    fn read_round_trip_and_eof() {
        let payload: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
        let mut image = build_image(&[(b"big", FileType::Regular, &payload)]);
        let fs = FsImage::parse(&mut image).unwrap();
        let inode = fs.dentry_by_name(b"big").unwrap().inode as usize;

        // Whole-file read returns exactly the on-image bytes.
        let mut buf = vec![0u8; 16384];
        let count = fs.read_data(inode, 0, &mut buf).unwrap();
        assert_eq!(count, payload.len());
        assert_eq!(&buf[..count], &payload[..]);

        // A read crossing the first block seam.
        let mut window = [0u8; 64];
        let count = fs.read_data(inode, BLOCK_SIZE - 32, &mut window).unwrap();
        assert_eq!(count, 64);
        assert_eq!(&window[..], &payload[BLOCK_SIZE - 32..BLOCK_SIZE + 32]);

        // At and past EOF.
        assert_eq!(fs.read_data(inode, payload.len(), &mut window).unwrap(), 0);
        assert_eq!(fs.read_data(inode, payload.len() + 5, &mut window).unwrap(), 0);
    }

    #[test]
    fn write_extends_and_allocates_blocks() {
        let mut image = build_image(&[(b"notes", FileType::Regular, b"seed")]);
        let mut fs = FsImage::parse(&mut image).unwrap();
        let inode = fs.dentry_by_name(b"notes").unwrap().inode as usize;

        // Overwrite + extend past the first block.
        let big: Vec<u8> = (0..5000u32).map(|i| (i % 97) as u8) .collect();
        let written = fs.write_data(inode, 2, &big).unwrap();
        assert_eq!(written, big.len());
        assert_eq!(fs.file_length(inode).unwrap(), big.len() + 2);

        let mut back = vec![0u8; big.len()];
        fs.read_data(inode, 2, &mut back).unwrap();
        assert_eq!(back, big);

        // The first two seed bytes survive.
        let mut head = [0u8; 2];
        fs.read_data(inode, 0, &mut head).unwrap();
        assert_eq!(&head, b"se");
    }

    #[test]
    fn delete_truncates_from_the_end() {
        let payload = vec![7u8; 6000];
        let mut image = build_image(&[(b"trunc", FileType::Regular, &payload)]);
        let mut fs = FsImage::parse(&mut image).unwrap();
        let inode = fs.dentry_by_name(b"trunc").unwrap().inode as usize;

        assert_eq!(fs.delete_data(inode, 2500).unwrap(), 2500);
        assert_eq!(fs.file_length(inode).unwrap(), 3500);

        // Deleting more than remains stops at zero.
        assert_eq!(fs.delete_data(inode, 9999).unwrap(), 3500);
        assert_eq!(fs.file_length(inode).unwrap(), 0);
    }

    #[test]
    fn deleted_blocks_are_reusable() {
        let payload = vec![1u8; BLOCK_SIZE + 10];
        let mut image = build_image(&[
            (b"a", FileType::Regular, &payload),
            (b"b", FileType::Regular, b"x"),
        ]);
        let mut fs = FsImage::parse(&mut image).unwrap();
        let a = fs.dentry_by_name(b"a").unwrap().inode as usize;
        let b = fs.dentry_by_name(b"b").unwrap().inode as usize;

        fs.delete_data(a, payload.len()).unwrap();
        // Grow b well past every block the image seeded; succeeds only if
        // a's blocks returned to the free map.
        let grow = vec![2u8; 40 * BLOCK_SIZE];
        let written = fs.write_data(b, 1, &grow).unwrap();
        assert!(written > 30 * BLOCK_SIZE);
    }

    #[test]
    fn create_and_clear() {
        let mut image = build_image(&[(b"seed", FileType::Regular, b"hello")]);
        let mut fs = FsImage::parse(&mut image).unwrap();

        fs.create_file(b"fresh").unwrap();
        let dentry = fs.dentry_by_name(b"fresh").unwrap();
        assert_eq!(dentry.file_type, FileType::Regular);
        let inode = dentry.inode as usize;
        assert_eq!(fs.file_length(inode).unwrap(), 0);

        fs.write_data(inode, 0, b"payload").unwrap();
        assert_eq!(fs.file_length(inode).unwrap(), 7);

        fs.clear_file(b"fresh").unwrap();
        assert_eq!(fs.file_length(inode).unwrap(), 0);
    }

    #[test]
    fn parse_rejects_garbage() {
        let mut short = vec![0u8; 100];
        assert!(FsImage::parse(&mut short).is_err());

        let mut counts = vec![0u8; 2 * BLOCK_SIZE];
        write_u32(&mut counts, 0, 200); // dir_count > 63
        write_u32(&mut counts, 4, 1);
        assert!(FsImage::parse(&mut counts).is_err());
    }
}
