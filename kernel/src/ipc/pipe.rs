//! `BiDirectionPipe`: two asymmetric [`Channel`]s shared by a First and a
//! Second descriptor (§4.6).
//!
//! The asymmetry is the whole design contract: the First descriptor's
//! `send` lands in the Second's `recv`, and vice versa, so that the two
//! ends of a pipe always talk past each other rather than echoing their
//! own sends back to themselves.

use alloc::sync::Arc;

use super::{channel::Channel, channel::UserBuffer, hub::EventHub};
use crate::error::KernelError;

pub struct BiDirectionPipe {
    /// Fed by the Second descriptor's `send`, drained by the First's `recv`.
    first: Channel,
    /// Fed by the First descriptor's `send`, drained by the Second's `recv`.
    second: Channel,
}

impl BiDirectionPipe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            first: Channel::new(),
            second: Channel::new(),
        })
    }

    pub fn send_as_first(&self, payload: &[u8], msg_request: u64, msg_seq: u64) -> Result<(), KernelError> {
        self.second.send(payload, msg_request, msg_seq)
    }

    pub fn send_as_second(&self, payload: &[u8], msg_request: u64, msg_seq: u64) -> Result<(), KernelError> {
        self.first.send(payload, msg_request, msg_seq)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn recv_as_first(
        &self,
        buffer: UserBuffer,
        filter_request: Option<u64>,
        filter_seq: Option<u64>,
        async_id: u64,
        submit_function: u64,
        submit_object: u64,
        hub: Arc<EventHub>,
    ) -> Result<(), KernelError> {
        self.first.submit_recv(
            buffer,
            filter_request,
            filter_seq,
            async_id,
            submit_function,
            submit_object,
            hub,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn recv_as_second(
        &self,
        buffer: UserBuffer,
        filter_request: Option<u64>,
        filter_seq: Option<u64>,
        async_id: u64,
        submit_function: u64,
        submit_object: u64,
        hub: Arc<EventHub>,
    ) -> Result<(), KernelError> {
        self.second.submit_recv(
            buffer,
            filter_request,
            filter_seq,
            async_id,
            submit_function,
            submit_object,
            hub,
        )
    }

    /// §9 open question (c): close both channels so any in-flight submits
    /// on either end are dismissed.
    pub fn close(&self) {
        self.first.close();
        self.second.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::hub::Event;

    #[test]
    fn first_send_is_observed_by_second_recv() {
        let pipe = BiDirectionPipe::new();
        let hub = Arc::new(EventHub::new());
        let mut buf = [0u8; 5];
        pipe.recv_as_second(
            UserBuffer { ptr: buf.as_mut_ptr() as usize, len: buf.len() },
            None,
            None,
            1,
            0,
            0,
            hub.clone(),
        )
        .unwrap();
        pipe.send_as_first(b"hello", 0, 0).unwrap();
        let mut events = [Event::zeroed(); 1];
        assert_eq!(hub.drain(&mut events), 1);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn first_recv_does_not_see_its_own_send() {
        let pipe = BiDirectionPipe::new();
        let hub = Arc::new(EventHub::new());
        let mut buf = [0u8; 5];
        pipe.recv_as_first(
            UserBuffer { ptr: buf.as_mut_ptr() as usize, len: buf.len() },
            None,
            None,
            1,
            0,
            0,
            hub.clone(),
        )
        .unwrap();
        pipe.send_as_first(b"hello", 0, 0).unwrap();
        assert!(hub.is_empty());
    }
}
