//! x86_64 platform interface.
//!
//! This is the narrow, architecture-specific surface the rest of the
//! kernel is written against: interrupt masking, the TLB, CR3, port I/O,
//! the GDT/IDT/PIC, and the `syscall` trap entry. Everything else in the
//! kernel (the physical allocator, the buddy heap, capabilities, IPC, the
//! scheduler, the Hel dispatcher) is architecture-independent and depends
//! only on the items re-exported here.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod mmu;
pub mod pic;
pub mod serial;
pub mod syscall;
pub mod timer;
pub mod vga;

/// Boot-time platform bring-up: GDT, IDT, PIC remap (masked), syscall MSRs.
/// Interrupts remain disabled on return; the caller enables them once the
/// scheduler has a thread ready to run.
pub fn init() {
    // SAFETY: masking interrupts here is required — the IDT/PIC are not yet
    // configured, so any interrupt firing before this point would vector
    // into garbage.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }

    gdt::init();
    idt::init();
    pic::init();
    syscall::init_syscall();
    timer::init(100);

    log::info!("x86_64 platform initialized");
}

/// Halt the CPU forever. Used by panic and the idle loop's terminal path.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    disable_interrupts_forget();
    loop {
        x86_64::instructions::hlt();
    }
}

/// Host build (`cargo test --lib`): there is no privileged `hlt` to
/// execute, and nothing will ever wake us, so this is simply divergent.
#[cfg(not(target_os = "none"))]
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Put the CPU to sleep until the next interrupt (used by the scheduler's
/// idle loop, §4.9 step 2).
#[cfg(target_os = "none")]
pub fn idle() {
    x86_64::instructions::hlt();
}

/// Host build: no interrupts will ever arrive, so idling is just a hint
/// to the scheduler (yield the OS thread) rather than a real halt.
#[cfg(not(target_os = "none"))]
pub fn idle() {
    core::hint::spin_loop();
}

#[cfg(target_os = "none")]
fn disable_interrupts_forget() {
    x86_64::instructions::interrupts::disable();
}

/// RAII guard restoring the prior interrupt-enabled state on drop. This is
/// the building block [`crate::sync::IrqMutex`] is built on.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        #[cfg(target_os = "none")]
        if self.was_enabled {
            x86_64::instructions::interrupts::enable();
        }
        #[cfg(not(target_os = "none"))]
        let _ = self.was_enabled;
    }
}

/// Disable interrupts, returning a guard that restores the previous state
/// when dropped. Nests correctly: if interrupts were already disabled, the
/// guard will not re-enable them.
///
/// On a host build (unit tests, `target_os` != `"none"`) there is no ring 0
/// to mask interrupts in; the guard is a no-op placeholder so
/// [`crate::sync::IrqMutex`] and the rest of the kernel can be exercised
/// without a CPU exception on every lock.
#[cfg(target_os = "none")]
pub fn disable_irqs() -> InterruptGuard {
    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    InterruptGuard { was_enabled }
}

#[cfg(not(target_os = "none"))]
pub fn disable_irqs() -> InterruptGuard {
    InterruptGuard { was_enabled: false }
}

/// Unconditionally enable interrupts. Used once at the end of boot, after
/// the scheduler and IRQ relay are initialized.
#[cfg(target_os = "none")]
pub fn enable_irqs() {
    x86_64::instructions::interrupts::enable();
}

#[cfg(not(target_os = "none"))]
pub fn enable_irqs() {}

pub fn read_cr3() -> u64 {
    mmu::read_cr3().as_u64()
}

pub fn invalidate_tlb(virt: u64) {
    mmu::flush_tlb_address(virt);
}

pub fn invalidate_tlb_all() {
    mmu::flush_tlb();
}

pub fn serial_init() -> uart_16550::SerialPort {
    // SAFETY: 0x3F8 is the standard COM1 I/O base address; the port is
    // initialized immediately after construction.
    let mut port = unsafe { uart_16550::SerialPort::new(0x3F8) };
    port.init();
    port
}

/// Raw I/O port access, used by `AccessIo`/`EnableIo` (§6) to grant user
/// threads port permissions via the TSS I/O permission bitmap in a full
/// implementation; exposed here for kernel-internal port drivers (PIT,
/// PIC, serial).
pub unsafe fn outb(port: u16, value: u8) {
    // SAFETY: caller-provided port/value; this is a thin wrapper over the
    // `out` instruction with no kernel-side invariants beyond "the caller
    // knows what device is on this port".
    unsafe { x86_64::instructions::port::Port::new(port).write(value) };
}

pub unsafe fn inb(port: u16) -> u8 {
    // SAFETY: see `outb`.
    unsafe { x86_64::instructions::port::Port::new(port).read() }
}

/// Kernel heap virtual region start (§4.2), mapped by the bootloader.
pub const HEAP_START: usize = 0x_4444_4444_0000;
/// Kernel heap virtual region size: 1 GiB, per §4.2's example size.
pub const HEAP_SIZE: usize = 1024 * 1024 * 1024;
