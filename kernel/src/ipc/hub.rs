//! `EventHub`: the asynchronous completion queue every submit-style
//! operation posts into (§4.7).
//!
//! A hub is a single FIFO of [`Event`]s plus a list of threads blocked in
//! `WaitForEvents`. Posting an event appends it and, if anyone is
//! waiting, wakes the oldest waiter (§5: "event-post order equals
//! `wait_for_events` delivery order").

use alloc::{collections::VecDeque, sync::Arc};

use crate::{cap::Handle, error::HelError, sched, sync::IrqSpinlock};

/// What kind of operation a completion event reports on. Not part of the
/// wire layout (§6 names only the generic `(type, error, ...)` tuple);
/// kept as a typed discriminant on the kernel side and narrowed to a
/// `u64` "type" word by the syscall dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RecvString,
    Accept,
    Connect,
    Irq,
}

impl EventKind {
    pub const fn as_word(self) -> u64 {
        match self {
            EventKind::RecvString => 0,
            EventKind::Accept => 1,
            EventKind::Connect => 2,
            EventKind::Irq => 3,
        }
    }
}

/// §6 "Event layout": `(type, error, async_id, submit_function,
/// submit_object, length, msg_request, msg_seq, handle)`. Unused fields
/// are zero.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub error: HelError,
    /// The caller-supplied correlation tag from the originating submit
    /// call, echoed back unmodified (§9 open question d) — not the
    /// kernel's internal monotonic sequence counter.
    pub async_id: u64,
    pub submit_function: u64,
    pub submit_object: u64,
    pub length: u64,
    pub msg_request: u64,
    pub msg_seq: u64,
    pub handle: Handle,
}

impl Event {
    /// The §6 "Event layout" wire tuple: `(type, error, async_id,
    /// submit_function, submit_object, length, msg_request, msg_seq,
    /// handle)`, as nine `u64` words in that order for `WaitForEvents` to
    /// copy out to the caller's buffer.
    pub fn to_words(self) -> [u64; 9] {
        [
            self.kind.as_word(),
            self.error.as_word(),
            self.async_id,
            self.submit_function,
            self.submit_object,
            self.length,
            self.msg_request,
            self.msg_seq,
            self.handle.as_u64(),
        ]
    }

    pub const fn zeroed() -> Self {
        Self {
            kind: EventKind::RecvString,
            error: HelError::Ok,
            async_id: 0,
            submit_function: 0,
            submit_object: 0,
            length: 0,
            msg_request: 0,
            msg_seq: 0,
            handle: Handle::NULL,
        }
    }
}

struct HubState {
    events: VecDeque<Event>,
    waiters: VecDeque<Arc<sched::Thread>>,
}

pub struct EventHub {
    state: IrqSpinlock<HubState>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            state: IrqSpinlock::new(HubState {
                events: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Append `event`, waking the oldest blocked waiter if one exists.
    pub fn post(&self, event: Event) {
        let mut state = self.state.lock();
        state.events.push_back(event);
        if let Some(thread) = state.waiters.pop_front() {
            sched::wake(&thread);
        }
    }

    /// §4.7 `wait_for_events`: drain up to `out.len()` events
    /// immediately; the caller (the syscall dispatcher) is responsible
    /// for blocking and retrying if this returns 0 and the deadline has
    /// not passed.
    pub fn drain(&self, out: &mut [Event]) -> usize {
        let mut state = self.state.lock();
        let n = out.len().min(state.events.len());
        for slot in out.iter_mut().take(n) {
            *slot = state.events.pop_front().unwrap();
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Register the current thread as a waiter; called by the dispatcher
    /// immediately before transitioning it to Blocked and calling
    /// `schedule()`.
    pub fn register_waiter(&self, thread: Arc<sched::Thread>) {
        self.state.lock().waiters.push_back(thread);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_then_drain_preserves_order() {
        let hub = EventHub::new();
        hub.post(Event { async_id: 1, ..Event::zeroed() });
        hub.post(Event { async_id: 2, ..Event::zeroed() });
        let mut out = [Event::zeroed(); 2];
        assert_eq!(hub.drain(&mut out), 2);
        assert_eq!(out[0].async_id, 1);
        assert_eq!(out[1].async_id, 2);
    }

    #[test]
    fn drain_caps_at_buffer_len() {
        let hub = EventHub::new();
        hub.post(Event::zeroed());
        hub.post(Event::zeroed());
        let mut out = [Event::zeroed(); 1];
        assert_eq!(hub.drain(&mut out), 1);
        assert!(!hub.is_empty());
    }
}
