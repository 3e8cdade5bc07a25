//! x86_64 thread register context and context switching.

use core::arch::asm;

/// Saved register state for one [`crate::sched::Thread`].
///
/// Field order and offsets are load-bearing: `context_switch` below indexes
/// into this struct with raw byte offsets from assembly.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,

    pub rsp: u64,
    pub rip: u64,
    pub rflags: u64,

    pub cs: u64,
    pub ss: u64,

    /// Page table root (CR3) of the address space this thread runs in.
    pub cr3: u64,
}

impl Context {
    /// Build the initial register state for a freshly created kernel-mode
    /// thread (per §4.9: entry point, argument in the first argument
    /// register, and a stack top).
    pub fn new_kernel(entry: usize, arg: usize, stack_top: usize) -> Self {
        let adjusted_sp = (stack_top - 8) as u64;
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: arg as u64,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            rsp: adjusted_sp,
            rip: entry as u64,
            rflags: 0x202,
            cs: 0x08,
            ss: 0x10,
            cr3: super::mmu::read_cr3().as_u64(),
        }
    }

    /// Build the initial register state for a user-mode thread (Ring 3).
    pub fn new_user(entry: usize, arg: usize, stack_top: usize, cr3: u64) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: arg as u64,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            rsp: stack_top as u64,
            rip: entry as u64,
            rflags: 0x202,
            cs: 0x33,
            ss: 0x2B,
            cr3,
        }
    }
}

/// Switch the CPU from `current`'s context to `next`'s context.
///
/// On return, `current` holds whatever context later resumes it (this
/// function is the classic "returns twice" context switch primitive: the
/// caller that switched away only sees control again once some future
/// `context_switch` call switches back into `current`).
///
/// # Safety
/// Must be called with interrupts disabled and both contexts fully
/// initialized. `current` must be a valid, exclusively-owned pointer into
/// the current thread's saved-context storage; `next` must outlive the
/// switch.
#[no_mangle]
pub unsafe extern "C" fn context_switch(current: *mut Context, next: *const Context) {
    // SAFETY: `current`/`next` point at `Context` structs whose layout is
    // `repr(C)` and matches the field offsets used below. The caller holds
    // interrupts disabled across the switch, per this function's contract.
    unsafe {
        asm!(
            "mov [rdi + 0x00], r15",
            "mov [rdi + 0x08], r14",
            "mov [rdi + 0x10], r13",
            "mov [rdi + 0x18], r12",
            "mov [rdi + 0x20], r11",
            "mov [rdi + 0x28], r10",
            "mov [rdi + 0x30], r9",
            "mov [rdi + 0x38], r8",
            "mov [rdi + 0x40], rdi",
            "mov [rdi + 0x48], rsi",
            "mov [rdi + 0x50], rbp",
            "mov [rdi + 0x58], rbx",
            "mov [rdi + 0x60], rdx",
            "mov [rdi + 0x68], rcx",
            "mov [rdi + 0x70], rax",
            "mov [rdi + 0x78], rsp",
            "mov rax, [rsp]",
            "mov [rdi + 0x80], rax",
            "pushfq",
            "pop rax",
            "mov [rdi + 0x88], rax",

            "mov rax, [rsi + 0xA8]",
            "mov rcx, cr3",
            "cmp rax, rcx",
            "je 2f",
            "mov cr3, rax",
            "2:",

            "mov r15, [rsi + 0x00]",
            "mov r14, [rsi + 0x08]",
            "mov r13, [rsi + 0x10]",
            "mov r12, [rsi + 0x18]",
            "mov r11, [rsi + 0x20]",
            "mov r10, [rsi + 0x28]",
            "mov r9,  [rsi + 0x30]",
            "mov r8,  [rsi + 0x38]",
            "mov rdi, [rsi + 0x40]",
            "mov rbp, [rsi + 0x50]",
            "mov rbx, [rsi + 0x58]",
            "mov rdx, [rsi + 0x60]",
            "mov rcx, [rsi + 0x68]",
            "mov rax, [rsi + 0x70]",

            "push qword ptr [rsi + 0x88]",
            "popfq",
            "mov rsp, [rsi + 0x78]",
            "push qword ptr [rsi + 0x80]",
            "mov rsi, [rsi + 0x48]",
            "ret",

            in("rdi") current,
            in("rsi") next,
            lateout("rax") _,
            lateout("rcx") _,
            lateout("rdx") _,
            lateout("r8") _,
            lateout("r9") _,
            lateout("r10") _,
            lateout("r11") _,
            lateout("r12") _,
            lateout("r13") _,
            lateout("r14") _,
            lateout("r15") _,
        );
    }
}

// SAFETY: Context is plain register state; it carries no aliased pointers
// and is only ever touched by the owning thread or while that thread is
// not Running (see sched::Thread state machine).
unsafe impl Send for Context {}
