//! Inter-process communication (§3, §4.6, §4.7).
//!
//! [`channel`] is the ordered message queue a [`pipe::BiDirectionPipe`]
//! pairs two of (asymmetrically — see `pipe`'s doc comment); [`server`]
//! layers accept/connect rendezvous on top of that same pairing; and
//! [`hub`] is the asynchronous completion queue every submit-style
//! operation posts its result into.

pub mod channel;
pub mod hub;
pub mod pipe;
pub mod server;

pub use channel::{Channel, UserBuffer};
pub use hub::{Event, EventHub, EventKind};
pub use pipe::BiDirectionPipe;
pub use server::Server;

use core::sync::atomic::{AtomicU64, Ordering};

/// No global IPC state to bring up: every `Channel`/`BiDirectionPipe`/
/// `Server`/`EventHub` is created on demand by its owning syscall and
/// lives only as long as some `Universe` holds a handle to it. Kept as a
/// boot-sequence step for symmetry with the other subsystems.
pub fn init() {
    log::info!("ipc initialized");
}

static NEXT_ASYNC_ID: AtomicU64 = AtomicU64::new(1);

/// A kernel-internal, globally monotonic sequence number (§8, §9 design
/// note d). Distinct from the caller-supplied `async_id` correlation tag
/// threaded through every `submit_*` call and echoed back in its
/// completion `Event` — that tag is opaque to the kernel. This counter is
/// exposed only for its own monotonicity property to be tested.
pub fn alloc_async_id() -> u64 {
    NEXT_ASYNC_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_async_id_is_monotonic() {
        let mut last = alloc_async_id();
        for _ in 0..64 {
            let next = alloc_async_id();
            assert!(next > last);
            last = next;
        }
    }
}
