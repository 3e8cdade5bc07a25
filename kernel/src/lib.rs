//! Thor kernel library
//!
//! Mirrors the module tree built by `main.rs` so that the integration test
//! binaries under `tests/` and `cargo test --lib`'s host-target unit tests
//! can link against one crate (`thor_kernel`) instead of duplicating it.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::testing::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare metal: the kernel's own buddy allocator backs every `alloc`
// request. Host target (plain `cargo test --lib`): delegate to the system
// allocator so ordinary `Vec`/`String`-using unit tests compile and run.
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: mm::heap::KernelHeap = mm::heap::KernelHeap;

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod cap;
pub mod error;
pub mod ipc;
pub mod irq;
pub mod logging;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;

pub mod testing;

pub use testing::{exit_qemu, test_panic_handler, test_runner, QemuExitCode, Testable};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    testing::test_panic_handler(info)
}

/// Heap allocation failure in a no_std kernel is unrecoverable; the
/// `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
