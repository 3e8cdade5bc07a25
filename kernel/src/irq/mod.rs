//! IRQ relay (§4.8).
//!
//! A static table of 256 relays, one per interrupt vector. `access_irq`
//! hands out a capability naming a vector; `submit_wait_for_irq`
//! subscribes a hub for that vector's next fire. `fire` — called from
//! `arch::x86_64::idt`'s relay handlers after the platform has already
//! acknowledged the controller — posts one event to every subscriber
//! currently waiting and clears the vector's waiter list (§9 open
//! question a: no implicit re-arm).

use alloc::{sync::Arc, vec::Vec};

use crate::{
    error::{HelError, KernelError},
    ipc::hub::{Event, EventHub, EventKind},
    sync::GlobalState,
};

const VECTOR_COUNT: usize = 256;

/// A grant to wait on one interrupt vector, created by `AccessIrq` (§6).
#[derive(Debug, Clone, Copy)]
pub struct IrqDescriptor {
    pub vector: u32,
}

struct Waiter {
    hub: Arc<EventHub>,
    async_id: u64,
    submit_function: u64,
    submit_object: u64,
}

struct RelayTable {
    waiters: Vec<Vec<Waiter>>,
}

static RELAYS: GlobalState<RelayTable> = GlobalState::new();

pub fn init() {
    let mut waiters = Vec::with_capacity(VECTOR_COUNT);
    for _ in 0..VECTOR_COUNT {
        waiters.push(Vec::new());
    }
    // Called once during boot; see `phys::init`'s analogous note.
    let _ = RELAYS.init(RelayTable { waiters });
    log::info!("irq relay initialized");
}

/// §6 `AccessIrq(vector)`: yields an IRQ descriptor for `vector`, or
/// `NoSuchObject` if it is out of range.
pub fn access_irq(vector: u32) -> Result<IrqDescriptor, KernelError> {
    if vector as usize >= VECTOR_COUNT {
        return Err(KernelError::NoSuchObject { id: vector as u64 });
    }
    Ok(IrqDescriptor { vector })
}

/// §6 `SubmitWaitForIrq`: subscribe `hub` for the next fire of
/// `descriptor`'s vector, echoing `async_id` back in the completion event.
pub fn submit_wait_for_irq(
    descriptor: IrqDescriptor,
    hub: Arc<EventHub>,
    async_id: u64,
    submit_function: u64,
    submit_object: u64,
) -> Result<(), KernelError> {
    RELAYS
        .with_mut(|table| {
            table.waiters[descriptor.vector as usize].push(Waiter {
                hub,
                async_id,
                submit_function,
                submit_object,
            });
        })
        .ok_or(KernelError::NoSuchObject { id: descriptor.vector as u64 })
}

/// Called from the platform's relay handlers once the interrupt
/// controller has been acknowledged. Posts an `Ok` event to every thread
/// currently subscribed to `vector` and clears its waiter list — a fresh
/// `submit_wait_for_irq` is required for the next fire (§9 open question
/// a).
pub fn fire(vector: u32) {
    let waiters = RELAYS.with_mut(|table| {
        if (vector as usize) < table.waiters.len() {
            core::mem::take(&mut table.waiters[vector as usize])
        } else {
            Vec::new()
        }
    });
    let Some(waiters) = waiters else { return };
    for waiter in waiters {
        waiter.hub.post(Event {
            kind: EventKind::Irq,
            error: HelError::Ok,
            async_id: waiter.async_id,
            submit_function: waiter.submit_function,
            submit_object: waiter.submit_object,
            ..Event::zeroed()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_with_no_subscribers_is_a_no_op() {
        RELAYS.reset(RelayTable {
            waiters: {
                let mut v = Vec::with_capacity(VECTOR_COUNT);
                for _ in 0..VECTOR_COUNT {
                    v.push(Vec::new());
                }
                v
            },
        });
        fire(1);
    }

    #[test]
    fn fire_posts_once_then_clears_waiters() {
        RELAYS.reset(RelayTable {
            waiters: {
                let mut v = Vec::with_capacity(VECTOR_COUNT);
                for _ in 0..VECTOR_COUNT {
                    v.push(Vec::new());
                }
                v
            },
        });
        let descriptor = access_irq(5).unwrap();
        let hub = Arc::new(EventHub::new());
        submit_wait_for_irq(descriptor, hub.clone(), 42, 0, 0).unwrap();

        fire(5);
        let mut out = [Event::zeroed(); 1];
        assert_eq!(hub.drain(&mut out), 1);
        assert_eq!(out[0].async_id, 42);

        // Second fire with no re-subscription delivers nothing.
        fire(5);
        assert_eq!(hub.drain(&mut out), 0);
    }
}
