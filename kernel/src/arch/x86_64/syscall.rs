//! x86_64 `syscall`/`sysretq` trap entry for the Hel dispatcher.

use crate::syscall::{dispatch, SyscallArgs, SyscallRaw};

/// Entry point installed at `LSTAR`. Reached directly by the `syscall`
/// instruction; nothing runs between user mode and here.
///
/// Register convention on entry: `rax` = syscall number, `rdi, rsi, rdx,
/// r10, r8, r9, r12, r13, r14` = the nine word-sized arguments described in
/// §4.10 (argument 4 arrives in `r10` rather than `rcx`, since `syscall`
/// clobbers `rcx`/`r11` to hold the return address/flags).
///
/// # Safety
/// Must only ever be reached via the `syscall` instruction with `LSTAR`
/// pointing here; relies on the fixed per-CPU GS-relative scratch slots at
/// offsets 0x0 (kernel rsp) and 0x8 (saved user rsp) set up by
/// [`init_syscall`] and the scheduler.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "swapgs",
        "mov gs:[0x8], rsp",
        "mov rsp, gs:[0x0]",

        "push rcx",              // user rip
        "push r11",              // user rflags

        // Build a [u64; 9] SyscallArgs on the stack, arg1 at the lowest
        // address (matches SyscallArgs([u64; 9]) field order).
        "push r14",              // arg9
        "push r13",              // arg8
        "push r12",              // arg7
        "push r9",               // arg6
        "push r8",               // arg5
        "push r10",              // arg4
        "push rdx",              // arg3
        "push rsi",              // arg2
        "push rdi",              // arg1

        "mov r13, rax",          // stash syscall number (r13 already saved above)
        "mov r12, rsp",          // stash args pointer (r12 already saved above)
        "sub rsp, 24",           // 3-word result buffer, zeroed by dispatch
        "mov rdi, r13",
        "mov rsi, r12",
        "mov rdx, rsp",
        "call {dispatch}",

        "mov rax, [rsp + 0]",    // result word 0 (err)
        "mov rdx, [rsp + 8]",    // result word 1
        "mov r8,  [rsp + 16]",   // result word 2
        "add rsp, 24",

        "add rsp, 72",           // drop the 9 pushed argument words
        "pop r11",
        "pop rcx",

        "mov rsp, gs:[0x8]",
        "swapgs",
        "sysretq",

        dispatch = sym syscall_entry_trampoline,
    );
}

/// Non-naked shim: receives the raw `(num, args_ptr, out_ptr)` triple set up
/// by the naked entry and calls into the architecture-independent
/// dispatcher. Kept separate from `syscall_entry` because naked functions
/// may contain only a single `asm!`/`naked_asm!` block.
extern "C" fn syscall_entry_trampoline(num: u64, args_ptr: *const u64, out_ptr: *mut u64) {
    // SAFETY: `args_ptr` points at 9 valid u64 words and `out_ptr` at 3
    // writable u64 words, both laid out on the current kernel stack by
    // `syscall_entry` immediately before this call.
    let args = unsafe { &*(args_ptr as *const SyscallArgs) };
    let result: SyscallRaw = dispatch(num, args);
    // SAFETY: see above.
    unsafe {
        core::ptr::write(out_ptr, result.0);
        core::ptr::write(out_ptr.add(1), result.1);
        core::ptr::write(out_ptr.add(2), result.2);
    }
}

/// Initialize `SYSCALL`/`SYSRET` support: enable the feature in `EFER`,
/// point `LSTAR` at [`syscall_entry`], and set up the `STAR` segment
/// selectors `sysretq`/`syscall` expect.
pub fn init_syscall() {
    use x86_64::registers::{
        model_specific::{Efer, EferFlags, LStar, Star},
        segmentation::SegmentSelector,
    };

    // SAFETY: Writing these MSRs during early boot, before any user thread
    // exists, is the standard way to enable the `syscall` instruction. The
    // selectors match the GDT layout installed by `gdt::init`.
    unsafe {
        Efer::update(|flags| {
            flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS);
        });
        LStar::write(x86_64::VirtAddr::new(syscall_entry as usize as u64));
        Star::write(
            SegmentSelector(0x33), // user CS for sysretq
            SegmentSelector(0x2B), // user SS for sysretq
            SegmentSelector(0x08), // kernel CS for syscall
            SegmentSelector(0x10), // kernel SS for syscall
        )
        .expect("STAR segment selectors must be valid GDT entries");
    }
}
