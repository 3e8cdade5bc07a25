//! Thread lifecycle and ready-queue invariants (§4.9, §8 scenario 3's
//! sibling property for thread ids). Exercised through the real
//! `CreateThread` syscall.
//!
//! A from-scratch context switch into a freshly created user thread needs
//! a real, mapped, user-accessible entry point (an ELF loaded into its own
//! `AddressSpace`) to land on safely — that is Eir/the loader's job, both
//! explicitly out of scope for this crate (§1). What this crate owns and
//! can exercise directly is everything up to that handoff: thread
//! creation, ready-queue enqueueing, and the state machine §4.9 specifies.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(thor_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
use thor_kernel::{
    cap, error::HelError, irq, ipc, mm, sched,
    sched::ThreadState,
    syscall::{dispatch, SyscallArgs, SyscallRaw},
};

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

const SYS_CREATE_THREAD: u64 = 6;

fn call(num: u64, words: [u64; 9]) -> SyscallRaw {
    dispatch(num, &SyscallArgs::from_words(words))
}

fn words9(a: u64, b: u64, c: u64, d: u64, e: u64, f: u64, g: u64, h: u64, i: u64) -> [u64; 9] {
    [a, b, c, d, e, f, g, h, i]
}

/// A plausible-looking but never-executed entry point: `CreateThread`
/// enqueues the thread Ready and returns immediately (§4.9); nothing in
/// this test ever calls `schedule()`, so it is never actually dispatched.
fn dummy_user_entry() {}

#[test_case]
fn create_thread_yields_distinct_monotonic_handles() {
    let mut handles = alloc::vec::Vec::new();
    for _ in 0..4 {
        let r = call(
            SYS_CREATE_THREAD,
            words9(dummy_user_entry as usize as u64, 0, 0x1000, 0, 0, 0, 0, 0, 0),
        );
        assert_eq!(r.0, HelError::Ok.as_word());
        handles.push(r.1);
    }
    for pair in handles.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}

#[test_case]
fn created_thread_shares_universe_and_starts_ready() {
    let universe = sched::current_thread().universe().clone();
    let r = call(
        SYS_CREATE_THREAD,
        words9(dummy_user_entry as usize as u64, 0, 0x1000, 0, 0, 0, 0, 0, 0),
    );
    assert_eq!(r.0, HelError::Ok.as_word());

    let handle = thor_kernel::cap::Handle::from_raw(r.1);
    let thread = universe.thread(handle).expect("thread descriptor must resolve");
    assert_eq!(thread.state(), ThreadState::Ready);
    assert!(alloc::sync::Arc::ptr_eq(thread.universe(), &universe));
}

#[test_case]
fn boot_thread_stays_running_when_nothing_yields() {
    // No test in this binary ever calls `schedule()`/`block_current()`, so
    // the thread that started the test harness must still be the one
    // running it.
    let current = sched::current_thread();
    assert_eq!(current.state(), ThreadState::Running);
}

#[test_case]
fn each_created_thread_gets_a_distinct_thread_id() {
    let universe = sched::current_thread().universe().clone();
    let mut ids = alloc::vec::Vec::new();
    for _ in 0..4 {
        let r = call(
            SYS_CREATE_THREAD,
            words9(dummy_user_entry as usize as u64, 0, 0x1000, 0, 0, 0, 0, 0, 0),
        );
        let handle = thor_kernel::cap::Handle::from_raw(r.1);
        let thread = universe.thread(handle).unwrap();
        ids.push(thread.id());
    }
    for pair in ids.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}
