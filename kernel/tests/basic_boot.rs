//! End-to-end boot smoke test: runs the same subsystem bring-up sequence
//! as `main.rs`'s `kernel_main` and checks that each subsystem is usable
//! immediately afterwards.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(thor_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
use thor_kernel::{cap, irq, ipc, mm, sched, serial_println};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    thor_kernel::logging::init();
    thor_kernel::arch::init();
    mm::init(boot_info);
    cap::init();
    irq::init();
    sched::init();
    ipc::init();

    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    thor_kernel::test_panic_handler(info)
}

#[test_case]
fn kernel_is_alive() {
    serial_println!("kernel booted, scheduler anchored to a current thread");
}

#[test_case]
fn heap_allocations_round_trip() {
    extern crate alloc;
    use alloc::vec::Vec;

    let mut v: Vec<u64> = Vec::with_capacity(256);
    for i in 0..256u64 {
        v.push(i * i);
    }
    for (i, value) in v.iter().enumerate() {
        assert_eq!(*value, (i as u64) * (i as u64));
    }
}

#[test_case]
fn boot_thread_is_current_and_running() {
    let current = sched::current_thread();
    assert_eq!(current.state(), sched::ThreadState::Running);
}
