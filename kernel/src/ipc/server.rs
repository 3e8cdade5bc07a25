//! `Server`: the accept/connect rendezvous point behind `CreateServer`
//! (§4.6).
//!
//! A server holds two FIFOs, pending accepts and pending connects.
//! `submit_accept`/`submit_connect` cross-match them: the moment both
//! sides have an entry, a fresh [`BiDirectionPipe`] is created and each
//! side's Universe gets one end of it, with both waiters' hubs notified.

use alloc::{collections::VecDeque, sync::Arc};

use super::{hub::{Event, EventHub, EventKind}, pipe::BiDirectionPipe};
use crate::{
    cap::{AnyDescriptor, Universe},
    error::{HelError, KernelError},
    sync::IrqSpinlock,
};

struct Waiter {
    universe: Arc<Universe>,
    hub: Arc<EventHub>,
    async_id: u64,
    submit_function: u64,
    submit_object: u64,
}

#[derive(Default)]
struct ServerState {
    accepts: VecDeque<Waiter>,
    connects: VecDeque<Waiter>,
    closed: bool,
}

pub struct Server {
    state: IrqSpinlock<ServerState>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: IrqSpinlock::new(ServerState::default()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_accept(
        &self,
        universe: Arc<Universe>,
        hub: Arc<EventHub>,
        async_id: u64,
        submit_function: u64,
        submit_object: u64,
    ) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(KernelError::WrongDescriptorKind { handle: 0 });
        }
        let waiter = Waiter { universe, hub, async_id, submit_function, submit_object };
        match state.connects.pop_front() {
            Some(connect) => {
                drop(state);
                Self::complete(waiter, connect, EventKind::Accept, EventKind::Connect);
            }
            None => state.accepts.push_back(waiter),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_connect(
        &self,
        universe: Arc<Universe>,
        hub: Arc<EventHub>,
        async_id: u64,
        submit_function: u64,
        submit_object: u64,
    ) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(KernelError::WrongDescriptorKind { handle: 0 });
        }
        let waiter = Waiter { universe, hub, async_id, submit_function, submit_object };
        match state.accepts.pop_front() {
            Some(accept) => {
                drop(state);
                Self::complete(accept, waiter, EventKind::Accept, EventKind::Connect);
            }
            None => state.connects.push_back(waiter),
        }
        Ok(())
    }

    /// Build the pipe, attach its two ends, and notify both waiters.
    fn complete(accept: Waiter, connect: Waiter, accept_kind: EventKind, connect_kind: EventKind) {
        let pipe = BiDirectionPipe::new();
        let accept_handle = accept.universe.attach(AnyDescriptor::BiDirFirst(pipe.clone()));
        let connect_handle = connect.universe.attach(AnyDescriptor::BiDirSecond(pipe));

        accept.hub.post(Event {
            kind: accept_kind,
            error: HelError::Ok,
            async_id: accept.async_id,
            submit_function: accept.submit_function,
            submit_object: accept.submit_object,
            handle: accept_handle,
            ..Event::zeroed()
        });
        connect.hub.post(Event {
            kind: connect_kind,
            error: HelError::Ok,
            async_id: connect.async_id,
            submit_function: connect.submit_function,
            submit_object: connect.submit_object,
            handle: connect_handle,
            ..Event::zeroed()
        });
    }

    /// §9 open question (c): dismiss every outstanding submit.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for waiter in state.accepts.drain(..).chain(state.connects.drain(..)) {
            waiter.hub.post(Event {
                error: HelError::Dismissed,
                async_id: waiter.async_id,
                ..Event::zeroed()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_then_connect_yields_linked_pipe_endpoints() {
        let server = Server::new();
        let accept_universe = Universe::new();
        let connect_universe = Universe::new();
        let accept_hub = Arc::new(EventHub::new());
        let connect_hub = Arc::new(EventHub::new());

        server
            .submit_accept(accept_universe.clone(), accept_hub.clone(), 1, 0, 0)
            .unwrap();
        server
            .submit_connect(connect_universe.clone(), connect_hub.clone(), 2, 0, 0)
            .unwrap();

        let mut accept_events = [Event::zeroed(); 1];
        let mut connect_events = [Event::zeroed(); 1];
        assert_eq!(accept_hub.drain(&mut accept_events), 1);
        assert_eq!(connect_hub.drain(&mut connect_events), 1);
        assert_eq!(accept_events[0].async_id, 1);
        assert_eq!(connect_events[0].async_id, 2);
        assert!(!accept_events[0].handle.is_null());
        assert!(!connect_events[0].handle.is_null());

        let first = accept_universe.bidir_first(accept_events[0].handle).unwrap();
        let second = connect_universe.bidir_second(connect_events[0].handle).unwrap();
        let hub = Arc::new(EventHub::new());
        let mut buf = [0u8; 2];
        second
            .recv_as_second(
                super::super::channel::UserBuffer { ptr: buf.as_mut_ptr() as usize, len: 2 },
                None,
                None,
                9,
                0,
                0,
                hub.clone(),
            )
            .unwrap();
        first.send_as_first(b"hi", 0, 0).unwrap();
        let mut out = [Event::zeroed(); 1];
        assert_eq!(hub.drain(&mut out), 1);
        assert_eq!(&buf, b"hi");
    }
}
