// Interrupt linkage stubs
//
// Every vector gets a stub that normalizes the stack to one frame shape:
// the CPU-pushed state, an error code (real or a dummy zero), the vector
// number, the eight general-purpose registers, and the data segments. The
// common prologue then reloads DS/ES with the kernel selector and calls the
// platform-independent dispatcher with a pointer to the frame.
//
// Vectors 8, 10-14, and 17 push a hardware error code; all others get a
// dummy so the frame layout is uniform.

use core::arch::global_asm;

global_asm!(
    r#"
.altmacro

.macro VECTOR_STUB n
vector_stub_\n:
.if (\n == 8) | (\n == 10) | (\n == 11) | (\n == 12) | (\n == 13) | (\n == 14) | (\n == 17)
    push \n
.else
    push 0
    push \n
.endif
    jmp common_interrupt_prologue
.endm

.macro STUB_TABLE_ENTRY n
    .long vector_stub_\n
.endm

.section .text

common_interrupt_prologue:
    pushad
    push ds
    push es
    mov ax, 0x18
    mov ds, ax
    mov es, ax
    push esp
    call common_interrupt_dispatch
    add esp, 4
    pop es
    pop ds
    popad
    add esp, 8
    iretd

.set vector, 0
.rept 256
    VECTOR_STUB %vector
    .set vector, vector + 1
.endr

.section .rodata
.global VECTOR_STUB_TABLE
.align 4
VECTOR_STUB_TABLE:
.set vector, 0
.rept 256
    STUB_TABLE_ENTRY %vector
    .set vector, vector + 1
.endr
"#
);

extern "C" {
    static VECTOR_STUB_TABLE: [u32; 256];
}

/// Address of the linkage stub for `vector`, for IDT gate construction.
pub fn vector_stub(vector: u8) -> usize {
    // SAFETY: The table is assembled above with exactly 256 entries.
    unsafe { VECTOR_STUB_TABLE[vector as usize] as usize }
}
