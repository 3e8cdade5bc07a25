//! End-to-end IPC scenarios (§8), driven through the real Hel syscall
//! dispatcher rather than the `cap`/`ipc` module APIs directly — these
//! exercise the same path a trap from user mode would take.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(thor_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use bootloader_api::{config::Mapping, entry_point, BootInfo, BootloaderConfig};
use thor_kernel::{
    cap, error::HelError, irq, ipc, mm, sched,
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

const SYS_LOG: u64 = 0;
const SYS_CLOSE_DESCRIPTOR: u64 = 2;
const SYS_ALLOCATE_MEMORY: u64 = 3;
const SYS_CREATE_EVENT_HUB: u64 = 8;
const SYS_WAIT_FOR_EVENTS: u64 = 9;
const SYS_CREATE_BIDIR_PIPE: u64 = 10;
const SYS_SEND_STRING: u64 = 11;
const SYS_SUBMIT_RECV_STRING: u64 = 12;
const SYS_CREATE_SERVER: u64 = 13;
const SYS_SUBMIT_ACCEPT: u64 = 14;
const SYS_SUBMIT_CONNECT: u64 = 15;

const WILDCARD: u64 = u64::MAX;

fn call(num: u64, words: [u64; 9]) -> SyscallRaw {
    dispatch(num, &SyscallArgs::from_words(words))
}

fn words9(a: u64, b: u64, c: u64, d: u64, e: u64, f: u64, g: u64, h: u64, i: u64) -> [u64; 9] {
    [a, b, c, d, e, f, g, h, i]
}

fn decode_event(words: &[u64]) -> (u64, u64, u64, u64) {
    // (error, async_id, length, handle) — the fields these tests read.
    (words[1], words[2], words[5], words[8])
}

#[allow(dead_code)]
fn log(msg: &str) {
    call(SYS_LOG, words9(msg.as_ptr() as u64, msg.len() as u64, 0, 0, 0, 0, 0, 0, 0));
}

/// §8 scenario 1: pipe echo.
#[test_case]
fn pipe_echo() {
    let pipe = call(SYS_CREATE_BIDIR_PIPE, words9(0, 0, 0, 0, 0, 0, 0, 0, 0));
    assert_eq!(pipe.0, HelError::Ok.as_word());
    let (first, second) = (pipe.1, pipe.2);

    let hub = call(SYS_CREATE_EVENT_HUB, words9(0, 0, 0, 0, 0, 0, 0, 0, 0));
    assert_eq!(hub.0, HelError::Ok.as_word());
    let hub = hub.1;

    let mut recv_buf = [0u8; 5];
    let submit = call(
        SYS_SUBMIT_RECV_STRING,
        words9(
            second,
            hub,
            recv_buf.as_mut_ptr() as u64,
            recv_buf.len() as u64,
            WILDCARD,
            WILDCARD,
            7,
            0,
            0,
        ),
    );
    assert_eq!(submit.0, HelError::Ok.as_word());

    let payload = b"hello";
    let send = call(
        SYS_SEND_STRING,
        words9(first, payload.as_ptr() as u64, payload.len() as u64, 0, 0, 0, 0, 0, 0),
    );
    assert_eq!(send.0, HelError::Ok.as_word());

    let mut evbuf = [0u64; 9];
    let wait = call(
        SYS_WAIT_FOR_EVENTS,
        words9(hub, evbuf.as_mut_ptr() as u64, 1, (-1i64) as u64, 0, 0, 0, 0, 0),
    );
    assert_eq!(wait.0, HelError::Ok.as_word());
    assert_eq!(wait.1, 1);

    let (err, async_id, length, _handle) = decode_event(&evbuf);
    assert_eq!(err, HelError::Ok.as_word());
    assert_eq!(async_id, 7);
    assert_eq!(length, 5);
    assert_eq!(&recv_buf, payload);
}

/// §8 scenario 2: server rendezvous.
#[test_case]
fn server_rendezvous() {
    let server = call(SYS_CREATE_SERVER, words9(0, 0, 0, 0, 0, 0, 0, 0, 0));
    assert_eq!(server.0, HelError::Ok.as_word());
    let (srv, clt) = (server.1, server.2);

    let hub = call(SYS_CREATE_EVENT_HUB, words9(0, 0, 0, 0, 0, 0, 0, 0, 0)).1;

    let accept = call(SYS_SUBMIT_ACCEPT, words9(srv, hub, 1, 0, 0, 0, 0, 0, 0));
    assert_eq!(accept.0, HelError::Ok.as_word());
    let connect = call(SYS_SUBMIT_CONNECT, words9(clt, hub, 2, 0, 0, 0, 0, 0, 0));
    assert_eq!(connect.0, HelError::Ok.as_word());

    let mut evbuf = [0u64; 18];
    let wait = call(
        SYS_WAIT_FOR_EVENTS,
        words9(hub, evbuf.as_mut_ptr() as u64, 2, (-1i64) as u64, 0, 0, 0, 0, 0),
    );
    assert_eq!(wait.0, HelError::Ok.as_word());
    assert_eq!(wait.1, 2);

    let (err1, id1, _len1, h1) = decode_event(&evbuf[0..9]);
    let (err2, id2, _len2, h2) = decode_event(&evbuf[9..18]);
    assert_eq!(err1, HelError::Ok.as_word());
    assert_eq!(err2, HelError::Ok.as_word());
    assert_eq!(id1, 1);
    assert_eq!(id2, 2);
    assert_ne!(h1, 0);
    assert_ne!(h2, 0);

    // The accept side's handle and the connect side's handle name the two
    // ends of one fresh pipe: a send on one is observed by a recv on the
    // other.
    let data_hub = call(SYS_CREATE_EVENT_HUB, words9(0, 0, 0, 0, 0, 0, 0, 0, 0)).1;
    let mut buf = [0u8; 2];
    let submit = call(
        SYS_SUBMIT_RECV_STRING,
        words9(h2, data_hub, buf.as_mut_ptr() as u64, 2, WILDCARD, WILDCARD, 9, 0, 0),
    );
    assert_eq!(submit.0, HelError::Ok.as_word());

    let payload = b"hi";
    let send = call(
        SYS_SEND_STRING,
        words9(h1, payload.as_ptr() as u64, payload.len() as u64, 0, 0, 0, 0, 0, 0),
    );
    assert_eq!(send.0, HelError::Ok.as_word());

    let mut out = [0u64; 9];
    let wait2 = call(
        SYS_WAIT_FOR_EVENTS,
        words9(data_hub, out.as_mut_ptr() as u64, 1, (-1i64) as u64, 0, 0, 0, 0, 0),
    );
    assert_eq!(wait2.1, 1);
    assert_eq!(&buf, payload);
}

/// §8 scenario 3: handle monotonicity across interleaved attach/detach.
#[test_case]
fn handle_monotonicity_across_close() {
    let mut handles = alloc::vec::Vec::new();
    for _ in 0..6 {
        let r = call(SYS_ALLOCATE_MEMORY, words9(4096, 0, 0, 0, 0, 0, 0, 0, 0));
        assert_eq!(r.0, HelError::Ok.as_word());
        handles.push(r.1);
    }
    for (i, h) in handles.iter().enumerate() {
        if i % 2 == 1 {
            let close = call(SYS_CLOSE_DESCRIPTOR, words9(*h, 0, 0, 0, 0, 0, 0, 0, 0));
            assert_eq!(close.0, HelError::Ok.as_word());
        }
    }
    let newest = call(SYS_ALLOCATE_MEMORY, words9(4096, 0, 0, 0, 0, 0, 0, 0, 0));
    assert_eq!(newest.0, HelError::Ok.as_word());
    assert!(handles.iter().all(|h| newest.1 > *h));

    // A closed handle is dead even though its numeric value could coincide
    // with nothing else live (§6: "After CloseDescriptor(h), every
    // subsequent syscall taking h returns IllegalHandle").
    let reused = call(SYS_CLOSE_DESCRIPTOR, words9(handles[1], 0, 0, 0, 0, 0, 0, 0, 0));
    assert_eq!(reused.0, HelError::IllegalHandle.as_word());
}

/// §8 scenario 4: a `WaitForEvents` with nothing posted returns with
/// `count == 0` once its deadline passes, instead of blocking forever.
#[test_case]
fn wait_for_events_honors_timeout() {
    let hub = call(SYS_CREATE_EVENT_HUB, words9(0, 0, 0, 0, 0, 0, 0, 0, 0)).1;
    let before = thor_kernel::arch::x86_64::timer::ticks();

    let mut evbuf = [0u64; 9];
    // 5ms, comfortably more than one 10ms-period timer tick's worth of
    // slack either way.
    let wait = call(
        SYS_WAIT_FOR_EVENTS,
        words9(hub, evbuf.as_mut_ptr() as u64, 1, 5_000_000, 0, 0, 0, 0, 0),
    );
    assert_eq!(wait.0, HelError::Ok.as_word());
    assert_eq!(wait.1, 0);
    assert!(thor_kernel::arch::x86_64::timer::ticks() >= before);
}

/// A `WaitForEvents` with `ns == 0` never blocks, even with nothing ready.
#[test_case]
fn wait_for_events_zero_timeout_is_non_blocking() {
    let hub = call(SYS_CREATE_EVENT_HUB, words9(0, 0, 0, 0, 0, 0, 0, 0, 0)).1;
    let mut evbuf = [0u64; 9];
    let wait = call(SYS_WAIT_FOR_EVENTS, words9(hub, evbuf.as_mut_ptr() as u64, 1, 0, 0, 0, 0, 0, 0));
    assert_eq!(wait.0, HelError::Ok.as_word());
    assert_eq!(wait.1, 0);
}
