//! End-to-end user flows against the public kernel surface
//!
//! These run on the host with the recording arch double: "running" a user
//! program means `run_user` reports the configured halt status immediately,
//! and the halt path is driven through the system-call dispatcher exactly
//! as the interrupt layer would.

use std::sync::Mutex;

use triton_kernel::arch::test_control;
use triton_kernel::drivers::terminal;
use triton_kernel::fs::{self, FsImage};
use triton_kernel::interrupts::dispatch::dispatch_frame;
use triton_kernel::interrupts::TrapFrame;
use triton_kernel::process::{self, TABLE};
use triton_kernel::syscall::{self, Syscall};

/// Serializes the flows; they all share the kernel's global state.
static FLOW_LOCK: Mutex<()> = Mutex::new(());

const BLOCK: usize = 4096;

/// Build a file-system image; `files` is (name, type, contents).
fn build_image(entries: &[(&[u8], u32, &[u8])]) -> Vec<u8> {
    let inode_count = 63;
    let data_count = 200;
    let mut image = vec![0u8; (1 + inode_count + data_count) * BLOCK];

    image[0..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    image[4..8].copy_from_slice(&(inode_count as u32).to_le_bytes());
    image[8..12].copy_from_slice(&(data_count as u32).to_le_bytes());

    let mut next_inode = 1usize;
    let mut next_block = 1usize;
    for (index, (name, file_type, contents)) in entries.iter().enumerate() {
        let offset = 64 + index * 64;
        image[offset..offset + name.len()].copy_from_slice(name);
        image[offset + 32..offset + 36].copy_from_slice(&file_type.to_le_bytes());
        if *file_type != 2 {
            continue;
        }
        let inode = next_inode;
        next_inode += 1;
        image[offset + 36..offset + 40].copy_from_slice(&(inode as u32).to_le_bytes());
        let inode_offset = (1 + inode) * BLOCK;
        image[inode_offset..inode_offset + 4]
            .copy_from_slice(&(contents.len() as u32).to_le_bytes());
        for (slot, chunk) in contents.chunks(BLOCK).enumerate() {
            let block = next_block;
            next_block += 1;
            image[inode_offset + 4 + slot * 4..inode_offset + 8 + slot * 4]
                .copy_from_slice(&(block as u32).to_le_bytes());
            let data = (1 + inode_count + block) * BLOCK;
            image[data..data + chunk.len()].copy_from_slice(chunk);
        }
    }
    image
}

fn elf_image(entry: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 64];
    bytes[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    bytes[24..28].copy_from_slice(&entry.to_le_bytes());
    bytes
}

fn fresh_world(frame0: &[u8]) {
    let shell = elf_image(0x0804_8100);
    let cat = elf_image(0x0804_8200);
    let runner = elf_image(0x0804_8300);
    let ls = elf_image(0x0804_8400);
    let mut bad = elf_image(0x0804_8500);
    bad[0] = b'X'; // "XELF"

    let image = build_image(&[
        (b".", 1, b""),
        (b"shell", 2, &shell),
        (b"cat", 2, &cat),
        (b"runner", 2, &runner),
        (b"ls", 2, &ls),
        (b"bad", 2, &bad),
        (b"frame0.txt", 2, frame0),
    ]);
    fs::install(FsImage::parse(Vec::leak(image)).unwrap());

    TABLE.reset_for_tests();
    process::clear_current_for_tests();
    for tid in 0..terminal::NUM_TERMINALS {
        terminal::clear_foreground(tid);
    }
    triton_kernel::mm::PAGING.lock().init_all_slots();
    test_control::set_run_user_status(0);
}

fn syscall_halt(status: usize) -> isize {
    syscall::dispatch(Syscall::Halt as usize, status, 0, 0)
}

#[test]
fn execute_halt_and_descriptor_round_trip() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    let payload = b"frame zero contents: ><> ... <><\n".repeat(40);
    fresh_world(&payload);

    // Boot-equivalent: the root shell occupies slot 0.
    assert_eq!(process::system_execute(b"shell"), 0);
    assert_eq!(process::current_pid(), Some(0));
    TABLE.with(0, |pcb| {
        assert!(pcb.parent.is_none());
        assert_eq!(pcb.terminal, 0);
    });

    // The shell launches `cat frame0.txt`; the double "runs" it and we get
    // control back as the child, mid-life.
    let before = TABLE.active_count();
    assert_eq!(process::system_execute(b"cat frame0.txt"), 0);
    assert_eq!(TABLE.active_count(), before + 1);
    assert_eq!(process::current_pid(), Some(1));
    TABLE.with(1, |pcb| {
        assert_eq!(pcb.parent, Some(process::ProcessId(0)));
        assert_eq!(pcb.terminal, 0, "children inherit the parent's terminal");
    });

    // getargs returns the saved tail.
    let mut args = [0u8; 64];
    let rc = syscall::dispatch(
        Syscall::Getargs as usize,
        args.as_mut_ptr() as usize,
        args.len(),
        0,
    );
    assert_eq!(rc, 0);
    assert!(args.starts_with(b"frame0.txt\0"));

    // A too-small destination fails without copying.
    let mut tiny = [0u8; 4];
    let rc = syscall::dispatch(
        Syscall::Getargs as usize,
        tiny.as_mut_ptr() as usize,
        tiny.len(),
        0,
    );
    assert_eq!(rc, -1);

    // open/read until EOF reproduces the on-image bytes exactly.
    let fd = syscall::dispatch(
        Syscall::Open as usize,
        b"frame0.txt\0".as_ptr() as usize,
        0,
        0,
    );
    assert_eq!(fd, 2, "first free descriptor above the std pair");

    let mut collected = Vec::new();
    let mut chunk = [0u8; 1000];
    loop {
        let got = syscall::dispatch(
            Syscall::Read as usize,
            fd as usize,
            chunk.as_mut_ptr() as usize,
            chunk.len(),
        );
        assert!(got >= 0);
        if got == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..got as usize]);
    }
    assert_eq!(collected, payload);

    // Direction and lifetime rules.
    assert_eq!(
        syscall::dispatch(Syscall::Close as usize, 0, 0, 0),
        -1,
        "stdin must not close"
    );
    assert_eq!(
        syscall::dispatch(Syscall::Close as usize, 1, 0, 0),
        -1,
        "stdout must not close"
    );
    assert_eq!(syscall::dispatch(Syscall::Close as usize, fd as usize, 0, 0), 0);
    assert_eq!(
        syscall::dispatch(Syscall::Close as usize, fd as usize, 0, 0),
        -1,
        "double close"
    );

    // The child halts with 42; the unwind resumes the parent's context
    // with that status and the slot frees.
    syscall_halt(42);
    assert_eq!(process::current_pid(), Some(0));
    assert_eq!(TABLE.active_count(), before);
    let (_, status) = test_control::last_unwind();
    assert_eq!(status, 42);
    assert!(
        !TABLE.is_active(1),
        "halted child slot must be reusable"
    );
}

#[test]
fn bad_image_consumes_no_slot() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");

    assert_eq!(process::system_execute(b"shell"), 0);
    let before = TABLE.active_count();

    assert_eq!(process::system_execute(b"bad"), -1, "magic XELF");
    assert_eq!(process::system_execute(b"absent"), -1, "no dentry");
    assert_eq!(process::system_execute(b"."), -1, "directory is not runnable");
    assert_eq!(
        process::system_execute(b"                             "),
        -1,
        "blank command"
    );

    assert_eq!(TABLE.active_count(), before);
    assert_eq!(process::current_pid(), Some(0));
}

#[test]
fn nested_execute_chains_to_depth_three() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");

    assert_eq!(process::system_execute(b"shell"), 0);
    assert_eq!(process::system_execute(b"runner"), 0);
    assert_eq!(process::system_execute(b"ls"), 0);

    // Mid-point: a three-deep chain rooted at the shell.
    assert_eq!(process::current_pid(), Some(2));
    TABLE.with(2, |pcb| assert_eq!(pcb.parent, Some(process::ProcessId(1))));
    TABLE.with(1, |pcb| assert_eq!(pcb.parent, Some(process::ProcessId(0))));
    TABLE.with(0, |pcb| assert!(pcb.parent.is_none()));
    assert_eq!(terminal::foreground(0), Some(2));

    // Unwind inner-out; each halt hands the terminal back to the parent.
    syscall_halt(0);
    assert_eq!(process::current_pid(), Some(1));
    assert_eq!(terminal::foreground(0), Some(1));

    syscall_halt(0);
    assert_eq!(process::current_pid(), Some(0));
    assert_eq!(terminal::foreground(0), Some(0));
    assert_eq!(TABLE.active_count(), 1);
}

#[test]
fn exception_kill_reports_256_and_restores_the_parent() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");

    assert_eq!(process::system_execute(b"shell"), 0);
    assert_eq!(process::system_execute(b"cat frame0.txt"), 0);
    assert_eq!(process::current_pid(), Some(1));

    // Divide error out of ring 3.
    let mut frame = TrapFrame::synthetic(0);
    frame.cs = triton_kernel::arch::USER_CS;
    dispatch_frame(&mut frame);

    assert_eq!(process::current_pid(), Some(0));
    assert!(!TABLE.is_active(1));
    let (_, status) = test_control::last_unwind();
    assert_eq!(status, process::EXCEPTION_STATUS);

    // Page fault from ring 3 takes the same path.
    assert_eq!(process::system_execute(b"cat frame0.txt"), 0);
    test_control::set_cr2(0xDEAD_0000);
    let mut frame = TrapFrame::synthetic(0x0E);
    frame.cs = triton_kernel::arch::USER_CS;
    frame.error_code = 0x6;
    dispatch_frame(&mut frame);
    assert_eq!(process::current_pid(), Some(0));
    let (_, status) = test_control::last_unwind();
    assert_eq!(status, process::EXCEPTION_STATUS);
}

#[test]
fn root_shell_halt_respawns_in_place() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");

    assert_eq!(process::system_execute(b"shell"), 0);
    let runs_before = test_control::run_user_calls();

    // Halting the parentless shell re-executes `shell` in slot 0.
    syscall_halt(0);
    assert_eq!(process::current_pid(), Some(0));
    assert!(TABLE.is_active(0));
    TABLE.with(0, |pcb| assert!(pcb.parent.is_none()));
    assert!(test_control::run_user_calls() > runs_before);
}

#[test]
fn malloc_free_round_trip_in_the_heap_window() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");
    assert_eq!(process::system_execute(b"shell"), 0);

    let first = syscall::dispatch(Syscall::Malloc as usize, 128, 0, 0);
    assert!(first > 0);
    let first = first as usize;
    assert!(
        (triton_kernel::mm::USER_HEAP_BASE
            ..triton_kernel::mm::USER_HEAP_BASE + 0x40_0000)
            .contains(&first),
        "allocation must land in the 136 MiB heap window"
    );
    assert_eq!(first % 128, 0);

    let second = syscall::dispatch(Syscall::Malloc as usize, 128, 0, 0) as usize;
    assert_ne!(first, second);

    assert_eq!(syscall::dispatch(Syscall::Free as usize, first, 0, 0), 0);
    // The freed slot is handed out again.
    let third = syscall::dispatch(Syscall::Malloc as usize, 128, 0, 0) as usize;
    assert_eq!(third, first);

    // Oversized requests fail: the page allocator is a stub.
    assert_eq!(syscall::dispatch(Syscall::Malloc as usize, 4096, 0, 0), -1);
}

#[test]
fn file_writer_ioctls_create_seek_and_truncate() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");
    assert_eq!(process::system_execute(b"shell"), 0);

    const CREATE: usize = 0;
    const SEEK_END: usize = 2;
    const SET_DELETE_MODE: usize = 3;
    let minus_one = usize::MAX;

    // write_test shape: create a fresh file through the descriptor-less
    // ioctl, then open and write it.
    let rc = syscall::dispatch(
        Syscall::Ioctl as usize,
        minus_one,
        CREATE,
        b"journal\0".as_ptr() as usize,
    );
    assert_eq!(rc, 0);

    let fd = syscall::dispatch(Syscall::Open as usize, b"journal\0".as_ptr() as usize, 0, 0);
    assert!(fd >= 2);
    let message = b"I want to write a string here \n";
    let written = syscall::dispatch(
        Syscall::Write as usize,
        fd as usize,
        message.as_ptr() as usize,
        message.len(),
    );
    assert_eq!(written as usize, message.len());

    // Reopen and read it back.
    let rfd = syscall::dispatch(Syscall::Open as usize, b"journal\0".as_ptr() as usize, 0, 0);
    let mut back = [0u8; 64];
    let got = syscall::dispatch(
        Syscall::Read as usize,
        rfd as usize,
        back.as_mut_ptr() as usize,
        back.len(),
    );
    assert_eq!(&back[..got as usize], message);

    // backspace shape: seek the writer to EOF, arm delete mode, and one
    // write truncates from the end.
    assert_eq!(
        syscall::dispatch(Syscall::Ioctl as usize, minus_one, SEEK_END, fd as usize),
        0
    );
    assert_eq!(
        syscall::dispatch(
            Syscall::Ioctl as usize,
            minus_one,
            SET_DELETE_MODE,
            fd as usize
        ),
        0
    );
    let removed = syscall::dispatch(Syscall::Write as usize, fd as usize, b"\0".as_ptr() as usize, 5);
    assert_eq!(removed, 5);

    let rfd2 = syscall::dispatch(Syscall::Open as usize, b"journal\0".as_ptr() as usize, 0, 0);
    let got = syscall::dispatch(
        Syscall::Read as usize,
        rfd2 as usize,
        back.as_mut_ptr() as usize,
        back.len(),
    );
    assert_eq!(got as usize, message.len() - 5);
    assert_eq!(&back[..got as usize], &message[..message.len() - 5]);

    // Delete mode disarmed itself: the next write appends again.
    let rc = syscall::dispatch(Syscall::Write as usize, fd as usize, b"zz".as_ptr() as usize, 2);
    assert_eq!(rc, 2);
}

#[test]
fn directory_read_lists_entries_in_order() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");
    assert_eq!(process::system_execute(b"shell"), 0);

    let fd = syscall::dispatch(Syscall::Open as usize, b".\0".as_ptr() as usize, 0, 0);
    assert!(fd >= 2);

    let mut names = Vec::new();
    let mut buf = [0u8; 33];
    loop {
        let got = syscall::dispatch(
            Syscall::Read as usize,
            fd as usize,
            buf.as_mut_ptr() as usize,
            32,
        );
        assert!(got >= 0);
        if got == 0 {
            break;
        }
        names.push(buf[..got as usize].to_vec());
    }
    assert_eq!(names[0], b".");
    assert_eq!(names[1], b"shell");
    assert!(names.iter().any(|n| n == b"frame0.txt"));

    // Directories refuse writes.
    assert_eq!(
        syscall::dispatch(Syscall::Write as usize, fd as usize, b"x".as_ptr() as usize, 1),
        -1
    );
}

#[test]
fn rtc_descriptor_respects_the_rate_contract() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");
    assert_eq!(process::system_execute(b"shell"), 0);

    let fd = syscall::dispatch(Syscall::Open as usize, b"rtc\0".as_ptr() as usize, 0, 0);
    assert!(fd >= 2);

    for rate in [2u32, 32, 1024] {
        let rc = syscall::dispatch(
            Syscall::Write as usize,
            fd as usize,
            rate.to_le_bytes().as_ptr() as usize,
            4,
        );
        assert_eq!(rc, 4, "rate {} must be accepted", rate);
    }
    for rate in [0u32, 1, 3, 1000, 2048] {
        let rc = syscall::dispatch(
            Syscall::Write as usize,
            fd as usize,
            rate.to_le_bytes().as_ptr() as usize,
            4,
        );
        assert_eq!(rc, -1, "rate {} must be rejected", rate);
    }
}

#[test]
fn slot_exhaustion_fails_the_seventh_execute() {
    let _flows = FLOW_LOCK.lock().unwrap();
    let _arch = test_control::lock_arch();
    fresh_world(b"x");

    assert_eq!(process::system_execute(b"shell"), 0);
    for _ in 0..5 {
        assert_eq!(process::system_execute(b"cat x"), 0);
    }
    assert_eq!(TABLE.active_count(), 6);
    assert_eq!(process::system_execute(b"cat x"), -1);
    assert_eq!(TABLE.active_count(), 6);
}
