#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

#[macro_use]
mod print;

mod arch;
mod cap;
mod error;
mod ipc;
mod irq;
mod logging;
mod mm;
mod sched;
mod sync;
mod syscall;

#[global_allocator]
static ALLOCATOR: mm::heap::KernelHeap = mm::heap::KernelHeap;

#[cfg(not(test))]
mod boot {
    use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};

    /// Map all of physical memory so `mm::phys`/`mm::page_table` can walk
    /// frames by their physical address (§4.1-§4.2).
    pub static BOOTLOADER_CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        crate::logging::init();
        log::info!("Thor kernel v{} booting", env!("CARGO_PKG_VERSION"));

        crate::arch::init();
        crate::mm::init(boot_info);
        crate::cap::init();
        crate::irq::init();
        crate::sched::init();
        crate::ipc::init();

        log::info!("boot sequence complete, entering scheduler");
        crate::arch::enable_irqs();
        crate::sched::run();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    arch::halt();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("{}\n", info);
    exit_qemu(QemuExitCode::Failed);
}

#[cfg(test)]
fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

#[cfg(test)]
trait Testable {
    fn run(&self);
}

#[cfg(test)]
impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

#[cfg(test)]
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    // SAFETY: port 0xf4 is the `isa-debug-exit` device configured on the
    // QEMU command line `cargo test` invokes this binary under.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
    // SAFETY: the port write above terminates the VM before control returns.
    unsafe { core::hint::unreachable_unchecked() }
}

#[cfg(test)]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}
