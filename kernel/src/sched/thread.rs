//! Schedulable thread (§3, §4.9).

use alloc::{boxed::Box, sync::Arc};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    arch::x86_64::context::Context, cap::Universe, mm::address_space::SharedAddressSpace,
    sync::IrqSpinlock,
};

/// Kernel-mode stack a thread runs its trap/context-switch machinery on.
/// Distinct from any user-mode stack its saved registers point at.
const KERNEL_STACK_SIZE: usize = 64 * 1024;

/// §3, §9: {Ready, Running, Blocked, Exited}. Transitions happen only from
/// within `schedule()` and the blocking primitives in `sched::mod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Exited,
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// A schedulable entity (§3, §4.9): saved register state, the `Universe`
/// and `AddressSpace` it shares with whoever created it, and its own
/// private kernel stack.
pub struct Thread {
    id: u64,
    state: IrqSpinlock<ThreadState>,
    context: UnsafeCell<Context>,
    universe: Arc<Universe>,
    address_space: SharedAddressSpace,
    /// Kept alive only so `context`'s saved `rsp` has somewhere to point;
    /// never read directly once the thread is constructed.
    #[allow(dead_code)]
    kernel_stack: Box<[u8]>,
}

// SAFETY: `context` is mutated only by `schedule()`'s `context_switch`
// call, which only ever touches a thread's context while that thread is
// not the CPU's Running thread (saved just before switching away from it,
// restored just before switching into it) — never from two CPUs at once,
// since this kernel runs single-core (§1 Non-goals: no SMP). `state`,
// `universe`, and `address_space` carry their own synchronization.
unsafe impl Sync for Thread {}

impl Thread {
    fn alloc_kernel_stack() -> Box<[u8]> {
        alloc::vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice()
    }

    /// A Ready kernel-mode thread. `entry`/`arg` only matter if this
    /// thread is ever dispatched before something else overwrites its
    /// saved context via `context_switch`'s save half — true for the
    /// scheduler's boot anchor (see `sched::init`), which never actually
    /// starts at `entry` because its context is overwritten before it is
    /// first resumed.
    pub fn new_kernel(
        universe: Arc<Universe>,
        address_space: SharedAddressSpace,
        entry: usize,
        arg: usize,
    ) -> Arc<Thread> {
        let kernel_stack = Self::alloc_kernel_stack();
        let stack_top = kernel_stack.as_ptr() as usize + kernel_stack.len();
        let context = Context::new_kernel(entry, arg, stack_top);
        Arc::new(Thread {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            state: IrqSpinlock::new(ThreadState::Ready),
            context: UnsafeCell::new(context),
            universe,
            address_space,
            kernel_stack,
        })
    }

    /// A Ready user-mode thread (§4.9 `helCreateThread`): `entry` and
    /// `user_stack_top` are user-space addresses within `address_space`.
    pub fn new_user(
        universe: Arc<Universe>,
        address_space: SharedAddressSpace,
        entry: usize,
        arg: usize,
        user_stack_top: usize,
    ) -> Arc<Thread> {
        let kernel_stack = Self::alloc_kernel_stack();
        let cr3 = address_space.lock().page_space().root().as_u64();
        let context = Context::new_user(entry, arg, user_stack_top, cr3);
        Arc::new(Thread {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            state: IrqSpinlock::new(ThreadState::Ready),
            context: UnsafeCell::new(context),
            universe,
            address_space,
            kernel_stack,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    pub fn address_space(&self) -> &SharedAddressSpace {
        &self.address_space
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(super) fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    /// Atomically demote Running -> Ready; returns whether it happened
    /// (i.e. whether this thread now needs to be pushed onto the ready
    /// queue).
    pub(super) fn try_demote_running(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ThreadState::Running {
            *state = ThreadState::Ready;
            true
        } else {
            false
        }
    }

    /// Atomically promote Blocked -> Ready; returns whether it happened.
    pub(super) fn try_wake(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ThreadState::Blocked {
            *state = ThreadState::Ready;
            true
        } else {
            false
        }
    }

    /// # Safety
    /// The returned pointer must be used only by `schedule()`'s
    /// `context_switch` call, and only while this thread is not the CPU's
    /// Running thread (or is in the process of becoming not-Running,
    /// mid-switch).
    pub(super) fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }
}
