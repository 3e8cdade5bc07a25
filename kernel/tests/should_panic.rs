//! Verifies the opposite of every other integration binary: that a
//! genuine failure actually panics instead of being silently swallowed.
//! Its own custom test runner inverts the usual pass/fail convention — a
//! test that panics is the success case here.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(test_runner)]
#![reexport_test_harness_main = "test_main"]

use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use thor_kernel::{exit_qemu, serial_println, QemuExitCode};

static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    thor_kernel::logging::init();
    thor_kernel::arch::init();
    thor_kernel::mm::init(boot_info);
    thor_kernel::cap::init();

    test_main();
    loop {
        core::hint::spin_loop();
    }
}

pub fn test_runner(tests: &[&dyn Fn()]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test();
        serial_println!("[test did not panic]");
        exit_qemu(QemuExitCode::Failed);
    }
    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    serial_println!("[ok]");
    exit_qemu(QemuExitCode::Success);
}

/// A bad handle must be rejected as a recoverable `IllegalHandle`, never a
/// panic — so this deliberately asserts the opposite of what `cap::Universe`
/// actually does, to prove the test harness itself can tell the difference.
#[test_case]
fn deliberately_wrong_assertion_about_handle_lookup() {
    serial_println!("should_panic::deliberately_wrong_assertion_about_handle_lookup...\t");
    let universe = thor_kernel::cap::Universe::new();
    let bogus = thor_kernel::cap::Handle::from_raw(9999);
    assert!(universe.memory(bogus).is_ok(), "a never-attached handle must not resolve");
}
