//! Capability table (§4.5, §9).
//!
//! A [`Handle`] is an opaque, process-local, monotonically increasing
//! `u64`; a [`Universe`] is the table that maps handles to the kernel
//! objects they denote. Every kind of object a thread can hold a
//! capability to — memory, pipe endpoints, servers, event hubs, IRQ and
//! I/O grants, even other threads — is folded into one tagged sum type,
//! [`AnyDescriptor`], per §9's "tagged descriptor variant" design note:
//! an explicit discriminant plus payload, not a trait object hierarchy.

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{
    error::KernelError,
    ipc::{hub::EventHub, pipe::BiDirectionPipe, server::Server},
    irq::IrqDescriptor,
    mm::memory::SharedMemory,
    sched::Thread,
    sync::IrqMutex,
};

/// Opaque capability handle (§6: "unsigned 64-bit; 0 = null").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A grant over a fixed set of raw I/O ports, created by `AccessIo` and
/// armed by `EnableIo` (§6). `enabled` is shared (not per-handle-copy)
/// so `EnableIo(h)` can flip it without detaching/reattaching `h` under
/// a fresh handle value.
#[derive(Debug, Clone)]
pub struct IoDescriptor {
    pub ports: Arc<[u16]>,
    pub enabled: Arc<AtomicBool>,
}

impl IoDescriptor {
    pub fn new(ports: Arc<[u16]>) -> Self {
        Self { ports, enabled: Arc::new(AtomicBool::new(false)) }
    }
}

/// Every kind of object a `Handle` can denote (§9).
pub enum AnyDescriptor {
    MemoryAccess(SharedMemory),
    BiDirFirst(Arc<BiDirectionPipe>),
    BiDirSecond(Arc<BiDirectionPipe>),
    Server(Arc<Server>),
    Client(Arc<Server>),
    EventHub(Arc<EventHub>),
    Irq(IrqDescriptor),
    Io(IoDescriptor),
    Thread(Arc<Thread>),
}

/// The per-process-group capability table (§4.5). Shared by every thread
/// in the same protection domain; threads created by `CreateThread`
/// inherit their creator's `Universe`.
pub struct Universe {
    table: IrqMutex<BTreeMap<u64, AnyDescriptor>>,
    next_handle: AtomicU64,
}

impl Universe {
    pub fn new() -> Arc<Universe> {
        Arc::new(Universe {
            table: IrqMutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Insert at `next_handle`, return it, increment (§4.5). Handles are
    /// never reused even after `detach`.
    pub fn attach(&self, descriptor: AnyDescriptor) -> Handle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.table.lock().insert(id, descriptor);
        Handle(id)
    }

    /// Remove and return the descriptor at `handle`, dropping the table's
    /// reference to it (§4.5: "closing a descriptor drops its reference,
    /// potentially releasing the underlying object").
    pub fn detach(&self, handle: Handle) -> Result<AnyDescriptor, KernelError> {
        self.table
            .lock()
            .remove(&handle.0)
            .ok_or(KernelError::InvalidHandle { handle: handle.0 })
    }

    /// Look up `handle` without removing it, under the universe lock for
    /// the duration of `f`.
    pub fn with<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&AnyDescriptor) -> Result<R, KernelError>,
    ) -> Result<R, KernelError> {
        if handle.is_null() {
            return Err(KernelError::InvalidHandle { handle: handle.0 });
        }
        let table = self.table.lock();
        let descriptor = table
            .get(&handle.0)
            .ok_or(KernelError::InvalidHandle { handle: handle.0 })?;
        f(descriptor)
    }

    pub fn memory(&self, handle: Handle) -> Result<SharedMemory, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::MemoryAccess(m) => Ok(m.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn bidir_first(&self, handle: Handle) -> Result<Arc<BiDirectionPipe>, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::BiDirFirst(p) => Ok(p.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn bidir_second(&self, handle: Handle) -> Result<Arc<BiDirectionPipe>, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::BiDirSecond(p) => Ok(p.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn server(&self, handle: Handle) -> Result<Arc<Server>, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::Server(s) => Ok(s.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn client(&self, handle: Handle) -> Result<Arc<Server>, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::Client(s) => Ok(s.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn event_hub(&self, handle: Handle) -> Result<Arc<EventHub>, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::EventHub(h) => Ok(h.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn irq(&self, handle: Handle) -> Result<IrqDescriptor, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::Irq(i) => Ok(*i),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn io(&self, handle: Handle) -> Result<IoDescriptor, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::Io(i) => Ok(i.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }

    pub fn thread(&self, handle: Handle) -> Result<Arc<Thread>, KernelError> {
        self.with(handle, |d| match d {
            AnyDescriptor::Thread(t) => Ok(t.clone()),
            _ => Err(KernelError::WrongDescriptorKind { handle: handle.0 }),
        })
    }
}

/// No global capability state to bring up: every `Universe` is created
/// on demand (one per protection domain, starting with the bootstrap
/// thread's). Kept as a boot-sequence step for symmetry with the other
/// subsystems and as the natural place to log readiness.
pub fn init() {
    log::info!("capability system initialized");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::memory::Memory;

    #[test]
    fn attach_is_monotonic_and_nonzero() {
        let universe = Universe::new();
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..8 {
            handles.push(universe.attach(AnyDescriptor::MemoryAccess(Memory::new())));
        }
        for pair in handles.windows(2) {
            assert!(pair[1].as_u64() > pair[0].as_u64());
        }
        assert!(handles.iter().all(|h| !h.is_null()));
    }

    #[test]
    fn detach_then_get_is_illegal_handle() {
        let universe = Universe::new();
        let h = universe.attach(AnyDescriptor::MemoryAccess(Memory::new()));
        assert!(universe.detach(h).is_ok());
        assert_eq!(universe.memory(h).unwrap_err(), KernelError::InvalidHandle { handle: h.as_u64() });
    }

    #[test]
    fn new_handle_after_interleaved_detach_exceeds_all_previous() {
        let universe = Universe::new();
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..6 {
            handles.push(universe.attach(AnyDescriptor::MemoryAccess(Memory::new())));
        }
        for (i, h) in handles.iter().enumerate() {
            if i % 2 == 1 {
                universe.detach(*h).unwrap();
            }
        }
        let newest = universe.attach(AnyDescriptor::MemoryAccess(Memory::new()));
        assert!(handles.iter().all(|h| newest.as_u64() > h.as_u64()));
    }
}
