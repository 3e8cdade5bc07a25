//! The Hel syscall dispatcher (§4.10, §6).
//!
//! [`dispatch`] is reached from [`crate::arch::x86_64::syscall::syscall_entry`]
//! with a syscall number and nine word-sized arguments already laid out on
//! the kernel stack as a [`SyscallArgs`]. It resolves `Handle` arguments
//! through the calling thread's [`crate::cap::Universe`], performs the
//! operation, and narrows every outcome to the §6 error taxonomy plus up
//! to two result words. `Panic` and `ExitThisThread` never return to their
//! caller at all.

use alloc::{sync::Arc, vec, vec::Vec};
use core::sync::atomic::Ordering;

use crate::{
    arch,
    cap::{AnyDescriptor, Handle, IoDescriptor},
    error::{HelError, KernelError},
    ipc::{channel::UserBuffer, hub::Event, pipe::BiDirectionPipe, server::Server, EventHub},
    irq, logging,
    mm::{Memory, VirtualAddr},
    sched,
};

/// The nine word-sized arguments a trap carries (§4.10). Laid out as a
/// transparent `[u64; 9]` so the architecture trampoline can hand over a
/// raw pointer built directly from pushed registers/stack slots.
#[repr(transparent)]
pub struct SyscallArgs([u64; 9]);

impl SyscallArgs {
    pub fn arg(&self, index: usize) -> u64 {
        self.0[index]
    }

    /// Build a `SyscallArgs` directly from its nine words, bypassing the
    /// arch trampoline that normally lays them out on the trap stack. Only
    /// needed by the `tests/*.rs` integration binaries (§10.5), which drive
    /// `dispatch` directly rather than through a real `syscall` trap.
    #[cfg(feature = "testing")]
    pub fn from_words(words: [u64; 9]) -> Self {
        Self(words)
    }
}

/// Up to three result words, returned through the trap-return helpers
/// (§4.10): word 0 is always the §6 error code, words 1-2 carry
/// operation-specific payload (a handle, a length, a count, ...).
pub struct SyscallRaw(pub u64, pub u64, pub u64);

/// A `u64` argument a filter value of `u64::MAX` marks as wildcard
/// (§4.6's `SendString`/`SubmitRecvString` `-1` tags in §8's worked
/// examples).
fn optional(value: u64) -> Option<u64> {
    if value == u64::MAX {
        None
    } else {
        Some(value)
    }
}

/// Ticks-per-nanosecond conversion for `WaitForEvents`' deadline: the PIT
/// is programmed for 100 Hz by `arch::x86_64::init` (`timer::init(100)`),
/// i.e. one tick every 10 ms.
const NS_PER_TICK: u64 = 10_000_000;

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syscall {
    Log = 0,
    Panic = 1,
    CloseDescriptor = 2,
    AllocateMemory = 3,
    MapMemory = 4,
    MemoryInfo = 5,
    CreateThread = 6,
    ExitThisThread = 7,
    CreateEventHub = 8,
    WaitForEvents = 9,
    CreateBiDirectionPipe = 10,
    SendString = 11,
    SubmitRecvString = 12,
    CreateServer = 13,
    SubmitAccept = 14,
    SubmitConnect = 15,
    AccessIrq = 16,
    SubmitWaitForIrq = 17,
    AccessIo = 18,
    EnableIo = 19,
}

impl TryFrom<u64> for Syscall {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Syscall::Log,
            1 => Syscall::Panic,
            2 => Syscall::CloseDescriptor,
            3 => Syscall::AllocateMemory,
            4 => Syscall::MapMemory,
            5 => Syscall::MemoryInfo,
            6 => Syscall::CreateThread,
            7 => Syscall::ExitThisThread,
            8 => Syscall::CreateEventHub,
            9 => Syscall::WaitForEvents,
            10 => Syscall::CreateBiDirectionPipe,
            11 => Syscall::SendString,
            12 => Syscall::SubmitRecvString,
            13 => Syscall::CreateServer,
            14 => Syscall::SubmitAccept,
            15 => Syscall::SubmitConnect,
            16 => Syscall::AccessIrq,
            17 => Syscall::SubmitWaitForIrq,
            18 => Syscall::AccessIo,
            19 => Syscall::EnableIo,
            _ => return Err(()),
        })
    }
}

fn current_universe() -> Arc<crate::cap::Universe> {
    sched::current_thread().universe().clone()
}

/// The architecture-independent entry point (§4.10). Unknown syscall
/// indices are fatal per §7 ("Unknown indices are fatal" in §4.10);
/// everything else is a user-originated error, never a kernel panic.
pub fn dispatch(num: u64, args: &SyscallArgs) -> SyscallRaw {
    match Syscall::try_from(num) {
        Ok(Syscall::Panic) => sys_panic(args),
        Ok(Syscall::ExitThisThread) => sched::exit_current(),
        Ok(syscall) => match handle(syscall, args) {
            Ok((w1, w2)) => SyscallRaw(HelError::Ok.as_word(), w1, w2),
            Err(e) => SyscallRaw(e.as_word(), 0, 0),
        },
        Err(()) => {
            crate::kernel_assert!(false, "illegal syscall index {num}");
            SyscallRaw(HelError::IllegalSyscall.as_word(), 0, 0)
        }
    }
}

fn handle(syscall: Syscall, args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    match syscall {
        Syscall::Log => sys_log(args),
        Syscall::Panic | Syscall::ExitThisThread => unreachable!("handled in dispatch"),
        Syscall::CloseDescriptor => sys_close_descriptor(args),
        Syscall::AllocateMemory => sys_allocate_memory(args),
        Syscall::MapMemory => sys_map_memory(args),
        Syscall::MemoryInfo => sys_memory_info(args),
        Syscall::CreateThread => sys_create_thread(args),
        Syscall::CreateEventHub => sys_create_event_hub(),
        Syscall::WaitForEvents => sys_wait_for_events(args),
        Syscall::CreateBiDirectionPipe => sys_create_bidir_pipe(),
        Syscall::SendString => sys_send_string(args),
        Syscall::SubmitRecvString => sys_submit_recv_string(args),
        Syscall::CreateServer => sys_create_server(),
        Syscall::SubmitAccept => sys_submit_accept(args),
        Syscall::SubmitConnect => sys_submit_connect(args),
        Syscall::AccessIrq => sys_access_irq(args),
        Syscall::SubmitWaitForIrq => sys_submit_wait_for_irq(args),
        Syscall::AccessIo => sys_access_io(args),
        Syscall::EnableIo => sys_enable_io(args),
    }
}

/// `Log(ptr, len)`: copy the user string and emit it through the shared
/// logging facade at `Info` under the `"user"` target (§6, §10.1).
fn sys_log(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let buffer = UserBuffer { ptr: args.arg(0) as usize, len: args.arg(1) as usize };
    // SAFETY: `buffer` names the calling thread's own address space, which
    // is active (its page space is loaded by `schedule()` before any trap
    // from it is handled).
    let bytes = unsafe { buffer.read_to_vec() }?;
    logging::log_user_string(&bytes);
    Ok((0, 0))
}

/// `Panic(ptr, len)`: logs and halts (§6). Never returns.
fn sys_panic(args: &SyscallArgs) -> ! {
    let buffer = UserBuffer { ptr: args.arg(0) as usize, len: args.arg(1) as usize };
    // SAFETY: see `sys_log`.
    if let Ok(bytes) = unsafe { buffer.read_to_vec() } {
        if let Ok(s) = core::str::from_utf8(&bytes) {
            log::error!(target: "user", "panic: {s}");
        }
    }
    arch::halt()
}

/// `CloseDescriptor(h)`: detach and drop. Pipe and server endpoints are
/// closed explicitly so any submits still in flight on the other side are
/// dismissed (§9 open question c) rather than left to hang.
fn sys_close_descriptor(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let descriptor = current_universe().detach(handle)?;
    match descriptor {
        AnyDescriptor::BiDirFirst(pipe) | AnyDescriptor::BiDirSecond(pipe) => pipe.close(),
        AnyDescriptor::Server(server) | AnyDescriptor::Client(server) => server.close(),
        _ => {}
    }
    Ok((0, 0))
}

/// `AllocateMemory(size)`: a new `Memory` sized to `size` bytes, rounded
/// up to a 4 KiB multiple (§4.4, §6).
fn sys_allocate_memory(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let size = args.arg(0);
    let memory = Memory::new();
    memory.lock().resize(size)?;
    let handle = current_universe().attach(AnyDescriptor::MemoryAccess(memory));
    Ok((handle.as_u64(), 0))
}

/// `MemoryInfo(h)`: byte length (§6).
fn sys_memory_info(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let memory = current_universe().memory(handle)?;
    Ok((memory.lock().len_bytes(), 0))
}

/// `MapMemory(mem_h, addr, size)`: reserve a hole (at `addr`, or anywhere
/// if `addr == 0`) and install the `Memory`'s frames into it (§4.4).
///
/// The implementation maps the whole backing `Memory`, not a sub-range:
/// `size` is accepted for ABI symmetry with `AllocateMemory`'s return
/// but is otherwise unused, since this kernel never partially maps a
/// `Memory` object (see `DESIGN.md`).
fn sys_map_memory(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let mem_handle = Handle::from_raw(args.arg(0));
    let addr = args.arg(1);

    let universe = current_universe();
    let memory = universe.memory(mem_handle)?;
    let address_space = sched::current_thread().address_space().clone();

    let (len, pages) = {
        let guard = memory.lock();
        let mut pages = Vec::with_capacity(guard.frame_count());
        for i in 0..guard.frame_count() {
            pages.push(guard.get_page(i).expect("index within frame_count"));
        }
        (guard.len_bytes(), pages)
    };

    let mut space = address_space.lock();
    let base = if addr == 0 {
        space.allocate(len)?
    } else {
        let virt = VirtualAddr::new(addr);
        space.allocate_at(virt, len)?;
        virt
    };
    space.install_memory(base, len, memory.clone(), &pages)?;
    Ok((base.as_u64(), 0))
}

/// `CreateThread(entry, arg, stack)`: spawn Ready, sharing the current
/// thread's Universe and AddressSpace (§4.9).
fn sys_create_thread(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let entry = args.arg(0) as usize;
    let arg = args.arg(1) as usize;
    let stack = args.arg(2) as usize;

    let current = sched::current_thread();
    let thread = sched::spawn_user_thread(
        current.universe().clone(),
        current.address_space().clone(),
        entry,
        arg,
        stack,
    );
    let handle = current.universe().attach(AnyDescriptor::Thread(thread));
    Ok((handle.as_u64(), 0))
}

/// `CreateEventHub()`: a new hub (§4.7, §6).
fn sys_create_event_hub() -> Result<(u64, u64), HelError> {
    let hub = Arc::new(EventHub::new());
    let handle = current_universe().attach(AnyDescriptor::EventHub(hub));
    Ok((handle.as_u64(), 0))
}

/// `WaitForEvents(hub_h, evbuf, cap, ns)`: drain up to `cap` events,
/// blocking until at least one is available or `ns` elapses (§4.7).
/// `ns == 0` never blocks; `ns < 0` waits indefinitely.
fn sys_wait_for_events(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let hub_handle = Handle::from_raw(args.arg(0));
    let evbuf_ptr = args.arg(1) as usize;
    let cap = args.arg(2) as usize;
    let ns = args.arg(3) as i64;

    if evbuf_ptr == 0 && cap > 0 {
        return Err(HelError::Fault);
    }

    let hub = current_universe().event_hub(hub_handle)?;
    const WORDS_PER_EVENT: usize = 9;
    let deadline_tick = if ns > 0 {
        Some(arch::x86_64::timer::ticks() + (ns as u64).div_ceil(NS_PER_TICK).max(1))
    } else {
        None
    };

    loop {
        let mut events = vec![Event::zeroed(); cap];
        let n = hub.drain(&mut events);
        if n > 0 {
            for (i, event) in events.iter().take(n).enumerate() {
                let words = event.to_words();
                // SAFETY: `evbuf_ptr` was checked non-null above and must
                // hold `cap * WORDS_PER_EVENT` writable u64 words in the
                // calling thread's currently-active address space (§6).
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        words.as_ptr(),
                        (evbuf_ptr as *mut u64).add(i * WORDS_PER_EVENT),
                        WORDS_PER_EVENT,
                    );
                }
            }
            return Ok((n as u64, 0));
        }

        if ns == 0 {
            return Ok((0, 0));
        }
        if let Some(deadline) = deadline_tick {
            if arch::x86_64::timer::ticks() >= deadline {
                return Ok((0, 0));
            }
        }

        let current = sched::current_thread();
        hub.register_waiter(current.clone());
        if let Some(deadline) = deadline_tick {
            sched::wake_at(current.clone(), deadline);
        }
        sched::block_current();

        if let Some(deadline) = deadline_tick {
            if hub.is_empty() && arch::x86_64::timer::ticks() >= deadline {
                return Ok((0, 0));
            }
        }
    }
}

/// `CreateBiDirectionPipe()`: attaches both fresh endpoints to the
/// calling thread's Universe (§4.6, §6).
fn sys_create_bidir_pipe() -> Result<(u64, u64), HelError> {
    let pipe = BiDirectionPipe::new();
    let universe = current_universe();
    let first = universe.attach(AnyDescriptor::BiDirFirst(pipe.clone()));
    let second = universe.attach(AnyDescriptor::BiDirSecond(pipe));
    Ok((first.as_u64(), second.as_u64()))
}

/// `SendString(h, buf, len, msg_req, msg_seq)` (§4.6, §6).
fn sys_send_string(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let buffer = UserBuffer { ptr: args.arg(1) as usize, len: args.arg(2) as usize };
    let msg_request = args.arg(3);
    let msg_seq = args.arg(4);

    // SAFETY: see `sys_log`.
    let payload = unsafe { buffer.read_to_vec() }?;
    current_universe().with(handle, |d| match d {
        AnyDescriptor::BiDirFirst(p) => p.send_as_first(&payload, msg_request, msg_seq),
        AnyDescriptor::BiDirSecond(p) => p.send_as_second(&payload, msg_request, msg_seq),
        _ => Err(KernelError::WrongDescriptorKind { handle: handle.as_u64() }),
    })?;
    Ok((0, 0))
}

/// `SubmitRecvString(h, hub_h, buf, len, filter_req, filter_seq, async_id,
/// sub_fn, sub_obj)` (§4.6, §6).
fn sys_submit_recv_string(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let hub_handle = Handle::from_raw(args.arg(1));
    let buffer = UserBuffer { ptr: args.arg(2) as usize, len: args.arg(3) as usize };
    let filter_request = optional(args.arg(4));
    let filter_seq = optional(args.arg(5));
    let async_id = args.arg(6);
    let submit_function = args.arg(7);
    let submit_object = args.arg(8);

    let universe = current_universe();
    let hub = universe.event_hub(hub_handle)?;
    universe.with(handle, |d| match d {
        AnyDescriptor::BiDirFirst(p) => p.recv_as_first(
            buffer,
            filter_request,
            filter_seq,
            async_id,
            submit_function,
            submit_object,
            hub.clone(),
        ),
        AnyDescriptor::BiDirSecond(p) => p.recv_as_second(
            buffer,
            filter_request,
            filter_seq,
            async_id,
            submit_function,
            submit_object,
            hub.clone(),
        ),
        _ => Err(KernelError::WrongDescriptorKind { handle: handle.as_u64() }),
    })?;
    Ok((0, 0))
}

/// `CreateServer()`: a fresh rendezvous point (§4.6, §6).
fn sys_create_server() -> Result<(u64, u64), HelError> {
    let server = Server::new();
    let universe = current_universe();
    let server_handle = universe.attach(AnyDescriptor::Server(server.clone()));
    let client_handle = universe.attach(AnyDescriptor::Client(server));
    Ok((server_handle.as_u64(), client_handle.as_u64()))
}

/// `SubmitAccept(server_h, hub_h, async_id, sub_fn, sub_obj)` (§4.6, §6).
fn sys_submit_accept(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let hub_handle = Handle::from_raw(args.arg(1));
    let async_id = args.arg(2);
    let submit_function = args.arg(3);
    let submit_object = args.arg(4);

    let universe = current_universe();
    let server = universe.server(handle)?;
    let hub = universe.event_hub(hub_handle)?;
    server.submit_accept(universe, hub, async_id, submit_function, submit_object)?;
    Ok((0, 0))
}

/// `SubmitConnect(client_h, hub_h, async_id, sub_fn, sub_obj)` (§4.6, §6).
fn sys_submit_connect(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let hub_handle = Handle::from_raw(args.arg(1));
    let async_id = args.arg(2);
    let submit_function = args.arg(3);
    let submit_object = args.arg(4);

    let universe = current_universe();
    let client = universe.client(handle)?;
    let hub = universe.event_hub(hub_handle)?;
    client.submit_connect(universe, hub, async_id, submit_function, submit_object)?;
    Ok((0, 0))
}

/// `AccessIrq(vector)` (§4.8, §6).
fn sys_access_irq(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let vector = args.arg(0) as u32;
    let descriptor = irq::access_irq(vector)?;
    let handle = current_universe().attach(AnyDescriptor::Irq(descriptor));
    Ok((handle.as_u64(), 0))
}

/// `SubmitWaitForIrq(irq_h, hub_h, async_id, sub_fn, sub_obj)` (§4.8, §6).
fn sys_submit_wait_for_irq(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let hub_handle = Handle::from_raw(args.arg(1));
    let async_id = args.arg(2);
    let submit_function = args.arg(3);
    let submit_object = args.arg(4);

    let universe = current_universe();
    let descriptor = universe.irq(handle)?;
    let hub = universe.event_hub(hub_handle)?;
    irq::submit_wait_for_irq(descriptor, hub, async_id, submit_function, submit_object)?;
    Ok((0, 0))
}

/// `AccessIo(ports[], count)`: grants a capability over a fixed list of
/// raw I/O ports (§6). Programming the TSS I/O permission bitmap so the
/// grant is enforceable from ring 3 is arch-level work `EnableIo` does
/// not yet perform (see `DESIGN.md`); today the capability is tracked but
/// only kernel-mode port access (`arch::inb`/`outb`) is actually gated by
/// it.
fn sys_access_io(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let ports_ptr = args.arg(0) as usize;
    let count = args.arg(1) as usize;
    if ports_ptr == 0 {
        return Err(HelError::Fault);
    }
    let mut ports = Vec::with_capacity(count);
    for i in 0..count {
        // SAFETY: `ports_ptr` is non-null and the caller is trusted to
        // supply `count` valid `u16`s in its own address space (§6).
        let port = unsafe { core::ptr::read((ports_ptr as *const u16).add(i)) };
        ports.push(port);
    }
    let descriptor = IoDescriptor::new(ports.into());
    let handle = current_universe().attach(AnyDescriptor::Io(descriptor));
    Ok((handle.as_u64(), 0))
}

/// `EnableIo(h)`: enables the grant on the current thread (§6).
fn sys_enable_io(args: &SyscallArgs) -> Result<(u64, u64), HelError> {
    let handle = Handle::from_raw(args.arg(0));
    let descriptor = current_universe().io(handle)?;
    descriptor.enabled.store(true, Ordering::Release);
    Ok((0, 0))
}
