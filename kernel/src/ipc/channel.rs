//! `Channel`: the request/sequence-tag matching FIFO pair underneath
//! every pipe endpoint (§4.6).
//!
//! A channel holds two FIFOs — pending messages (sent but not yet
//! matched to a receiver) and pending receives (receivers waiting for a
//! message). `send` and `submit_recv` each first try to satisfy the
//! other side's FIFO (oldest entry first, i.e. smallest enqueue index,
//! which a `VecDeque` preserves for free) before enqueuing themselves.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

use super::hub::{Event, EventHub, EventKind};
use crate::{cap::Handle, error::{HelError, KernelError}, sync::IrqSpinlock};

/// §9 open question (b): bound on the pending-message FIFO, named after
/// the classic `MAX_CHANNEL_QUEUE_SIZE` convention.
const CHANNEL_QUEUE_LIMIT: usize = 1024;

struct PendingMessage {
    request: u64,
    tag_seq: u64,
    payload: Vec<u8>,
}

struct PendingReceive {
    filter_request: Option<u64>,
    filter_seq: Option<u64>,
    buffer: UserBuffer,
    hub: Arc<EventHub>,
    async_id: u64,
    submit_function: u64,
    submit_object: u64,
}

/// A pointer/length pair into the calling thread's address space. Copies
/// are unchecked beyond a null/zero-length guard; a real fault during the
/// copy is reported as [`KernelError::Fault`] by the caller's page-fault
/// path (§7), not by this type.
#[derive(Debug, Clone, Copy)]
pub struct UserBuffer {
    pub ptr: usize,
    pub len: usize,
}

impl UserBuffer {
    /// # Safety
    /// `self.ptr` must be a valid, writable pointer for `self.len` bytes
    /// in the current address space.
    unsafe fn copy_from_slice(&self, data: &[u8]) -> Result<(), KernelError> {
        if self.ptr == 0 {
            return Err(KernelError::Fault { address: self.ptr as u64 });
        }
        if data.len() > self.len {
            return Err(KernelError::BufferTooSmall {
                required: data.len() as u64,
                available: self.len as u64,
            });
        }
        // SAFETY: caller contract.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr as *mut u8, data.len());
        }
        Ok(())
    }

    /// Read `self.len` bytes out of user space into a freshly owned
    /// buffer. Used by `SendString` to snapshot the caller's payload
    /// before it is either matched immediately or stashed on the pending
    /// message FIFO.
    ///
    /// # Safety
    /// `self.ptr` must be a valid, readable pointer for `self.len` bytes
    /// in the current address space.
    pub unsafe fn read_to_vec(&self) -> Result<Vec<u8>, KernelError> {
        if self.ptr == 0 {
            return Err(KernelError::Fault { address: self.ptr as u64 });
        }
        let mut data = alloc::vec![0u8; self.len];
        // SAFETY: caller contract.
        unsafe {
            core::ptr::copy_nonoverlapping(self.ptr as *const u8, data.as_mut_ptr(), self.len);
        }
        Ok(data)
    }
}

fn matches(filter: Option<u64>, value: u64) -> bool {
    filter.is_none_or(|f| f == value)
}

#[derive(Default)]
struct ChannelState {
    messages: VecDeque<PendingMessage>,
    receives: VecDeque<PendingReceive>,
    /// Set by `close`; further `send`/`submit_recv` fail immediately
    /// (§9 open question c).
    closed: bool,
}

/// One direction of a [`super::pipe::BiDirectionPipe`].
pub struct Channel {
    state: IrqSpinlock<ChannelState>,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            state: IrqSpinlock::new(ChannelState::default()),
        }
    }

    /// §4.6 `send`: satisfy the oldest matching pending receive, or
    /// enqueue as a pending message.
    pub fn send(&self, payload: &[u8], msg_request: u64, msg_seq: u64) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(KernelError::WrongDescriptorKind { handle: 0 });
        }

        while let Some(pos) = state
            .receives
            .iter()
            .position(|r| matches(r.filter_request, msg_request) && matches(r.filter_seq, msg_seq))
        {
            if state.receives[pos].buffer.len < payload.len() {
                // Dequeue the undersized receive and tell its own hub it
                // failed, rather than silently dropping its slot; keep
                // looking for the next matching receive (or fall through
                // to enqueueing as a pending message) instead of failing
                // the sender for a mismatch on the receiver's side.
                let receive = state.receives.remove(pos).unwrap();
                receive.hub.post(Event {
                    kind: EventKind::RecvString,
                    error: HelError::BufferTooSmall,
                    async_id: receive.async_id,
                    submit_function: receive.submit_function,
                    submit_object: receive.submit_object,
                    length: payload.len() as u64,
                    msg_request,
                    msg_seq,
                    handle: Handle::NULL,
                });
                continue;
            }

            let receive = state.receives.remove(pos).unwrap();
            // SAFETY: the submitting thread supplied this buffer for the
            // duration of the async operation.
            unsafe { receive.buffer.copy_from_slice(payload) }?;
            receive.hub.post(Event {
                kind: EventKind::RecvString,
                error: HelError::Ok,
                async_id: receive.async_id,
                submit_function: receive.submit_function,
                submit_object: receive.submit_object,
                length: payload.len() as u64,
                msg_request,
                msg_seq,
                handle: Handle::NULL,
            });
            return Ok(());
        }

        if state.messages.len() >= CHANNEL_QUEUE_LIMIT {
            return Err(KernelError::OutOfMemory {
                requested: CHANNEL_QUEUE_LIMIT as u64,
                available: 0,
            });
        }
        state.messages.push_back(PendingMessage {
            request: msg_request,
            tag_seq: msg_seq,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    /// §4.6 `submit_recv`: satisfy immediately from the oldest matching
    /// pending message, or enqueue as a pending receive.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_recv(
        &self,
        buffer: UserBuffer,
        filter_request: Option<u64>,
        filter_seq: Option<u64>,
        async_id: u64,
        submit_function: u64,
        submit_object: u64,
        hub: Arc<EventHub>,
    ) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(KernelError::WrongDescriptorKind { handle: 0 });
        }

        if let Some(pos) = state
            .messages
            .iter()
            .position(|m| matches(filter_request, m.request) && matches(filter_seq, m.tag_seq))
        {
            if state.messages[pos].payload.len() > buffer.len {
                return Err(KernelError::BufferTooSmall {
                    required: state.messages[pos].payload.len() as u64,
                    available: buffer.len as u64,
                });
            }
            let message = state.messages.remove(pos).unwrap();
            // SAFETY: see `send`.
            unsafe { buffer.copy_from_slice(&message.payload) }?;
            hub.post(Event {
                kind: EventKind::RecvString,
                error: HelError::Ok,
                async_id,
                submit_function,
                submit_object,
                length: message.payload.len() as u64,
                msg_request: message.request,
                msg_seq: message.tag_seq,
                handle: Handle::NULL,
            });
            return Ok(());
        }

        state.receives.push_back(PendingReceive {
            filter_request,
            filter_seq,
            buffer,
            hub,
            async_id,
            submit_function,
            submit_object,
        });
        Ok(())
    }

    /// §9 open question (c): post `Dismissed` to every outstanding
    /// receive and mark the channel closed.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for receive in state.receives.drain(..) {
            receive.hub.post(Event {
                kind: EventKind::RecvString,
                error: HelError::Dismissed,
                async_id: receive.async_id,
                submit_function: 0,
                submit_object: 0,
                length: 0,
                msg_request: 0,
                msg_seq: 0,
                handle: Handle::NULL,
            });
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<EventHub> {
        Arc::new(EventHub::new())
    }

    #[test]
    fn send_before_recv_queues_then_matches() {
        let channel = Channel::new();
        channel.send(b"hello", 1, 2).unwrap();
        let mut buf = [0u8; 5];
        let h = hub();
        channel
            .submit_recv(
                UserBuffer { ptr: buf.as_mut_ptr() as usize, len: buf.len() },
                None,
                None,
                7,
                0,
                0,
                h.clone(),
            )
            .unwrap();
        let mut events = [Event::zeroed(); 1];
        let n = h.drain(&mut events);
        assert_eq!(n, 1);
        assert_eq!(events[0].async_id, 7);
        assert_eq!(events[0].length, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn recv_before_send_matches_on_send() {
        let channel = Channel::new();
        let mut buf = [0u8; 5];
        let h = hub();
        channel
            .submit_recv(
                UserBuffer { ptr: buf.as_mut_ptr() as usize, len: buf.len() },
                Some(0),
                Some(0),
                7,
                0,
                0,
                h.clone(),
            )
            .unwrap();
        channel.send(b"hello", 0, 0).unwrap();
        let mut events = [Event::zeroed(); 1];
        assert_eq!(h.drain(&mut events), 1);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn wildcard_filter_matches_any_tags() {
        let channel = Channel::new();
        channel.send(b"x", 99, 42).unwrap();
        let mut buf = [0u8; 1];
        let h = hub();
        channel
            .submit_recv(
                UserBuffer { ptr: buf.as_mut_ptr() as usize, len: buf.len() },
                None,
                None,
                1,
                0,
                0,
                h.clone(),
            )
            .unwrap();
        let mut events = [Event::zeroed(); 1];
        assert_eq!(h.drain(&mut events), 1);
        assert_eq!(events[0].msg_request, 99);
        assert_eq!(events[0].msg_seq, 42);
    }

    #[test]
    fn fifo_order_among_matching_sends() {
        let channel = Channel::new();
        channel.send(b"first", 0, 0).unwrap();
        channel.send(b"second", 0, 0).unwrap();
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        let h = hub();
        channel
            .submit_recv(UserBuffer { ptr: a.as_mut_ptr() as usize, len: 5 }, None, None, 1, 0, 0, h.clone())
            .unwrap();
        channel
            .submit_recv(UserBuffer { ptr: b.as_mut_ptr() as usize, len: 6 }, None, None, 2, 0, 0, h.clone())
            .unwrap();
        assert_eq!(&a[..5], b"first");
        assert_eq!(&b[..6], b"second");
    }

    #[test]
    fn send_to_undersized_receive_notifies_it_and_keeps_looking() {
        let channel = Channel::new();
        let mut small = [0u8; 2];
        let small_hub = hub();
        channel
            .submit_recv(
                UserBuffer { ptr: small.as_mut_ptr() as usize, len: small.len() },
                None,
                None,
                1,
                0,
                0,
                small_hub.clone(),
            )
            .unwrap();
        let mut big = [0u8; 8];
        let big_hub = hub();
        channel
            .submit_recv(
                UserBuffer { ptr: big.as_mut_ptr() as usize, len: big.len() },
                None,
                None,
                2,
                0,
                0,
                big_hub.clone(),
            )
            .unwrap();

        channel.send(b"hello", 0, 0).unwrap();

        let mut small_events = [Event::zeroed(); 1];
        assert_eq!(small_hub.drain(&mut small_events), 1);
        assert_eq!(small_events[0].error, HelError::BufferTooSmall);
        assert_eq!(small_events[0].async_id, 1);

        let mut big_events = [Event::zeroed(); 1];
        assert_eq!(big_hub.drain(&mut big_events), 1);
        assert_eq!(big_events[0].error, HelError::Ok);
        assert_eq!(big_events[0].async_id, 2);
        assert_eq!(&big[..5], b"hello");
    }
}
