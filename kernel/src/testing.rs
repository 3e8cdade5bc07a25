//! No-std test harness (§10.5): QEMU-backed `#[test_case]` runner for the
//! integration binaries under `tests/`, plus the panic handler they install
//! in place of the normal kernel one.
//!
//! Pure data-structure tests (cap/ipc/irq/mm/sched) run as ordinary
//! `#[cfg(test)] mod tests` blocks under the host `x86_64-unknown-linux-gnu`
//! target instead; this module only matters for `target_os = "none"`.

use core::panic::PanicInfo;

use crate::{serial_print, serial_println};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Exit QEMU via the `isa-debug-exit` device at port `0xf4`.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    // SAFETY: port 0xf4 is the `isa-debug-exit` device configured on the
    // QEMU command line the integration tests are run under; writing to it
    // terminates the VM with `(exit_code << 1) | 1`, so nothing after this
    // write is ever reached.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
    // SAFETY: the port write above never returns control to QEMU's guest.
    unsafe { core::hint::unreachable_unchecked() }
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("{}\n", info);
    exit_qemu(QemuExitCode::Failed)
}
