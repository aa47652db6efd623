//! Process control blocks and the slot arena

use spin::Mutex;

use crate::drivers::FileKind;
use crate::error::{KernelError, KernelResult};

use super::{ProcessId, FILE_ARRAY_SIZE, MAX_ARGS, MAX_TASKS};

/// One open-file slot. A slot is in use iff `kind` is set.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub kind: Option<FileKind>,
    pub inode: usize,
    pub position: usize,
    /// Armed by the set-delete-mode ioctl; the next write truncates.
    pub delete_mode: bool,
}

impl FileDescriptor {
    pub const fn closed() -> Self {
        FileDescriptor {
            kind: None,
            inode: 0,
            position: 0,
            delete_mode: false,
        }
    }

    pub fn in_use(&self) -> bool {
        self.kind.is_some()
    }
}

/// Per-process record.
pub struct Pcb {
    pub active: bool,
    pub id: ProcessId,
    /// None exactly for a terminal's root shell.
    pub parent: Option<ProcessId>,
    /// The terminal this process runs under.
    pub terminal: usize,
    pub files: [FileDescriptor; FILE_ARRAY_SIZE],
    args: [u8; MAX_ARGS],
    args_len: usize,
}

impl Pcb {
    const fn empty(id: usize) -> Self {
        Pcb {
            active: false,
            id: ProcessId(id),
            parent: None,
            terminal: 0,
            files: [FileDescriptor::closed(); FILE_ARRAY_SIZE],
            args: [0; MAX_ARGS],
            args_len: 0,
        }
    }

    /// Reset to a fresh state with stdin/stdout bound to the terminal.
    fn reset(&mut self) {
        let id = self.id;
        *self = Pcb::empty(id.0);
        self.active = true;
        self.files[0].kind = Some(FileKind::Terminal);
        self.files[1].kind = Some(FileKind::Terminal);
    }

    pub fn set_args(&mut self, tail: &[u8]) {
        let len = tail.len().min(MAX_ARGS - 1);
        self.args[..len].copy_from_slice(&tail[..len]);
        self.args[len] = 0;
        self.args_len = len;
    }

    pub fn args(&self) -> &[u8] {
        &self.args[..self.args_len]
    }
}

/// The fixed process arena.
pub struct ProcessTable {
    slots: Mutex<[Pcb; MAX_TASKS]>,
}

impl ProcessTable {
    pub const fn new() -> Self {
        ProcessTable {
            slots: Mutex::new([
                Pcb::empty(0),
                Pcb::empty(1),
                Pcb::empty(2),
                Pcb::empty(3),
                Pcb::empty(4),
                Pcb::empty(5),
            ]),
        }
    }

    /// Claim the lowest-index inactive slot, resetting it with stdin and
    /// stdout open.
    pub fn alloc(&self) -> KernelResult<usize> {
        let mut slots = self.slots.lock();
        for pid in 0..MAX_TASKS {
            if !slots[pid].active {
                slots[pid].reset();
                return Ok(pid);
            }
        }
        Err(KernelError::ResourceExhausted {
            resource: "process slots",
        })
    }

    pub fn deactivate(&self, pid: usize) {
        let mut slots = self.slots.lock();
        let id = slots[pid].id;
        slots[pid] = Pcb::empty(id.0);
    }

    /// Run `f` against slot `pid`.
    ///
    /// The table lock is shared with interrupt-context readers, so callers
    /// in process context wrap this in `arch::without_interrupts`.
    pub fn with<R>(&self, pid: usize, f: impl FnOnce(&mut Pcb) -> R) -> R {
        let mut slots = self.slots.lock();
        f(&mut slots[pid])
    }

    pub fn is_active(&self, pid: usize) -> bool {
        self.slots.lock()[pid].active
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().iter().filter(|p| p.active).count()
    }

    #[cfg(not(target_os = "none"))]
    pub fn reset_for_tests(&self) {
        let mut slots = self.slots.lock();
        for pid in 0..MAX_TASKS {
            slots[pid] = Pcb::empty(pid);
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global process arena.
pub static TABLE: ProcessTable = ProcessTable::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_scans_lowest_first_and_exhausts_at_six() {
        let table = ProcessTable::new();
        for expected in 0..MAX_TASKS {
            assert_eq!(table.alloc().unwrap(), expected);
        }
        assert!(table.alloc().is_err());

        table.deactivate(3);
        assert_eq!(table.alloc().unwrap(), 3);
    }

    #[test]
    fn fresh_slots_have_std_streams_bound() {
        let table = ProcessTable::new();
        let pid = table.alloc().unwrap();
        table.with(pid, |pcb| {
            assert_eq!(pcb.files[0].kind, Some(FileKind::Terminal));
            assert_eq!(pcb.files[1].kind, Some(FileKind::Terminal));
            assert!(!pcb.files[2].in_use());
            assert!(pcb.parent.is_none());
        });
    }

    #[test]
    fn args_are_clamped_and_terminated() {
        let table = ProcessTable::new();
        let pid = table.alloc().unwrap();
        table.with(pid, |pcb| {
            pcb.set_args(b"frame0.txt");
            assert_eq!(pcb.args(), b"frame0.txt");

            let long = [b'a'; MAX_ARGS + 50];
            pcb.set_args(&long);
            assert_eq!(pcb.args().len(), MAX_ARGS - 1);
        });
    }
}
