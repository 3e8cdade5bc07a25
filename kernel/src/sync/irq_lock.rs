//! IRQ-safe locking (§5, §10.4).
//!
//! Every lock reachable from interrupt context (the IRQ relay, the
//! scheduler's ready queue, the per-CPU timer tick) must mask interrupts
//! while held, or a handler could re-enter the same lock on the same CPU
//! and deadlock. `IrqMutex` wraps `spin::Mutex` with that discipline;
//! `IrqSpinlock` is a bare spinlock for the few call sites (the IRQ relay
//! table itself) that must not allocate even transitively.

use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

use crate::arch::{disable_irqs, InterruptGuard};

/// A mutex that disables interrupts for the duration of the critical
/// section, restoring the previous interrupt state when the guard drops.
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let irq_guard = disable_irqs();
        let guard = self.inner.lock();
        IrqMutexGuard {
            guard,
            _irq_guard: irq_guard,
        }
    }

    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let irq_guard = disable_irqs();
        self.inner.try_lock().map(|guard| IrqMutexGuard {
            guard,
            _irq_guard: irq_guard,
        })
    }
}

pub struct IrqMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _irq_guard: InterruptGuard,
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// A bare spinlock with the same interrupt-masking discipline as
/// [`IrqMutex`], for the handful of structures (the IRQ relay table) that
/// must be lockable from within an interrupt handler with no allocation
/// on the lock path.
pub struct IrqSpinlock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSpinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let irq_guard = disable_irqs();
        let guard = self.inner.lock();
        IrqMutexGuard {
            guard,
            _irq_guard: irq_guard,
        }
    }
}

// SAFETY: access is always serialized through the inner `spin::Mutex`;
// interrupt masking only affects scheduling, not memory safety.
unsafe impl<T: Send> Sync for IrqMutex<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for IrqSpinlock<T> {}
