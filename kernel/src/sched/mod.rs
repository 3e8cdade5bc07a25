//! Scheduler and thread (§3, §4.9, §5, §9).
//!
//! One global FIFO ready queue; [`schedule`] is the only dispatcher, built
//! directly on `arch::x86_64::context::context_switch`'s "returns twice"
//! contract: calling `schedule()` saves the caller's own register state
//! into whatever `Thread` was current, and later resumes exactly there
//! once some *other* call to `schedule()` picks that thread back up.
//!
//! There is no separate idle task. `init()` installs the boot call chain
//! itself as the first `Thread`, and `run()` — an infinite loop that does
//! nothing but call `schedule()` — is that thread's entire workload; when
//! nothing else is ready, `run()`'s own loop is what gets round-robined
//! back to, and `schedule()` halts the CPU (interrupts enabled) rather
//! than spinning before returning into it.

mod thread;

pub use thread::{Thread, ThreadState};

use alloc::{collections::VecDeque, sync::Arc};

use crate::{
    arch::{self, x86_64::context},
    cap::Universe,
    mm::address_space::{AddressSpace, SharedAddressSpace},
    mm::page_space::PageSpace,
    sync::{GlobalState, IrqSpinlock},
};

static READY_QUEUE: IrqSpinlock<VecDeque<Arc<Thread>>> = IrqSpinlock::new(VecDeque::new());
static CURRENT: GlobalState<Arc<Thread>> = GlobalState::new();
/// Threads parked in `WaitForEvents` with a finite timeout, alongside the
/// tick at which they should be woken regardless of whether their hub
/// ever becomes non-empty (§4.7). Checked once per timer tick.
static SLEEPERS: IrqSpinlock<alloc::vec::Vec<(u64, Arc<Thread>)>> =
    IrqSpinlock::new(alloc::vec::Vec::new());

/// Bring up the scheduler: install the calling (boot) flow as the first
/// current thread, in its own fresh `Universe`/`AddressSpace`. Must run
/// after `cap::init`/`mm::init` and before `arch::enable_irqs()`.
pub fn init() {
    let universe = Universe::new();
    let address_space = AddressSpace::new(PageSpace::current());
    let boot = Thread::new_kernel(universe, address_space, run as usize, 0);
    boot.set_state(ThreadState::Running);
    // Called once during boot; see `phys::init`'s analogous note.
    let _ = CURRENT.init(boot);
    log::info!("scheduler initialized");
}

/// Spawn a Ready user-mode thread sharing `universe`/`address_space`
/// (§4.9 `helCreateThread`) and enqueue it.
pub fn spawn_user_thread(
    universe: Arc<Universe>,
    address_space: SharedAddressSpace,
    entry: usize,
    arg: usize,
    stack_top: usize,
) -> Arc<Thread> {
    let thread = Thread::new_user(universe, address_space, entry, arg, stack_top);
    READY_QUEUE.lock().push_back(thread.clone());
    thread
}

/// The thread currently assigned to this CPU.
pub fn current_thread() -> Arc<Thread> {
    let current = CURRENT.with(|cur| cur.clone());
    crate::kernel_assert!(current.is_some(), "current_thread() called before sched::init()");
    current.unwrap()
}

/// Transition the current thread to Blocked and hand the CPU to whoever's
/// next (§4.7: `WaitForEvents` with nothing ready; any unmatched
/// `submit_*`). The caller is responsible for having already registered
/// itself as a waiter wherever it expects to be woken from.
pub fn block_current() {
    current_thread().set_state(ThreadState::Blocked);
    schedule();
}

/// §4.9 `helExitThisThread`: never returns to its caller. The exiting
/// thread is dropped from scheduling; once the last `Arc` reference held
/// elsewhere (a `Thread` descriptor, if any) is gone, it is freed.
pub fn exit_current() -> ! {
    current_thread().set_state(ThreadState::Exited);
    schedule();
    unreachable!("an Exited thread was resumed")
}

/// Move `thread` from Blocked back to Ready and onto the ready queue, if
/// it is currently Blocked (idempotent otherwise). Called by `EventHub`
/// on `post` to wake whoever is waiting (§4.7), and by the IRQ relay on
/// fire (§4.8).
pub fn wake(thread: &Arc<Thread>) {
    if thread.try_wake() {
        READY_QUEUE.lock().push_back(thread.clone());
    }
}

/// §4.9's dispatcher:
/// 1. If the current thread is still Running, demote it to Ready and
///    requeue it.
/// 2. Pop the head of the ready queue; if none, halt (interrupts enabled)
///    and retry once woken.
/// 3. Make the popped thread Running and current, then switch to it.
pub fn schedule() {
    loop {
        CURRENT.with(|cur| {
            if cur.try_demote_running() {
                READY_QUEUE.lock().push_back(cur.clone());
            }
        });
        let Some(next) = READY_QUEUE.lock().pop_front() else {
            arch::enable_irqs();
            arch::idle();
            continue;
        };
        next.set_state(ThreadState::Running);
        let prev = CURRENT.with_mut(|cur| core::mem::replace(cur, next.clone()));

        crate::kernel_assert!(prev.is_some(), "schedule() called before sched::init()");
        let prev = prev.unwrap();
        if Arc::ptr_eq(&prev, &next) {
            // Nothing else was ready; `prev` and `next` are the same
            // thread (itself just requeued and immediately re-picked).
            // Halt rather than spin until the next interrupt gives
            // something else a chance to become ready.
            arch::enable_irqs();
            arch::idle();
            return;
        }
        // SAFETY: `prev` is no longer the Running thread (just demoted
        // above, or already Blocked/Exited by its caller before this
        // call) and `next` is about to become exclusively Running on this
        // CPU; both `Arc`s are kept alive by the ready queue / `CURRENT`
        // across the switch.
        unsafe {
            context::context_switch(prev.context_ptr(), next.context_ptr());
        }
        return;
    }
}

/// Entered once, by `main`, after boot finishes. This call itself becomes
/// the scheduler's de facto idle participant (see module docs).
pub fn run() -> ! {
    loop {
        schedule();
    }
}

/// Register the current thread to be woken at tick `deadline` even if its
/// hub never becomes non-empty, so `WaitForEvents`' finite timeout (§4.7)
/// makes forward progress. Call alongside `EventHub::register_waiter`,
/// before `block_current()`.
pub fn wake_at(thread: Arc<Thread>, deadline: u64) {
    SLEEPERS.lock().push((deadline, thread));
}

/// §4.9 "IRQ 0 (periodic timer) enters `schedule()`" — preemption, one
/// tick per timeslice. Also wakes any thread whose `wake_at` deadline has
/// passed.
pub fn on_timer_tick() {
    let now = arch::x86_64::timer::ticks();
    SLEEPERS.lock().retain(|(deadline, thread)| {
        if *deadline <= now {
            wake(thread);
            false
        } else {
            true
        }
    });
    schedule();
}
