//! Synchronization primitives (§5, §10.4).
//!
//! [`IrqMutex`]/[`IrqSpinlock`] are the only locks in the kernel core;
//! every shared structure listed in §5 ("Shared-resource policy") uses
//! one of the two. Singletons that have a genuine "not yet constructed"
//! state before boot finishes (the physical allocator's bitmap, the IRQ
//! relay table, the scheduler's current-thread pointer) are built on top
//! of [`GlobalState`] or [`OnceLock`] rather than a bare
//! `Option`-wrapped lock, so that use-before-init is a typed `None` from
//! `with`/`get` instead of a silent lock-and-hope. Collections that are
//! always validly empty (the ready queue, the sleeper list) have no such
//! state to track and stay plain `IrqSpinlock`-guarded values.

pub mod irq_lock;
pub mod once_lock;

pub use irq_lock::{IrqMutex, IrqSpinlock};
pub use once_lock::{GlobalState, OnceLock};
