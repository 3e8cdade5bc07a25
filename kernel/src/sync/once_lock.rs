//! Safe global initialization primitives (§10.4).
//!
//! [`OnceLock`] is the lock-free single-assignment cell used wherever a
//! plain atomic CAS is enough. [`GlobalState`] is for singletons that
//! need a read/write-through-a-closure API (the physical allocator's
//! bitmap, the IRQ relay table, the scheduler's current-thread pointer)
//! and, since several of those are reachable from interrupt context
//! (`irq::fire`, the timer tick), is built on [`super::IrqMutex`] rather
//! than a bare `spin::Mutex` — the same interrupt-masking discipline §5
//! requires of every other shared structure.

use core::sync::atomic::{AtomicPtr, Ordering};

use alloc::boxed::Box;

use super::IrqMutex;

/// A cell that can be written to only once.
///
/// Similar to `std::sync::OnceLock` but usable in `no_std` before a heap
/// exists, since the only allocation it performs is the single `T` it
/// stores.
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: non-null only after `set` stores a `Box::into_raw`
            // pointer; the Acquire load synchronizes with that Release.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell. Returns the value back on a second call.
    pub fn set(&self, value: T) -> Result<(), T> {
        let ptr = Box::into_raw(Box::new(value));
        match self
            .inner
            .compare_exchange(core::ptr::null_mut(), ptr, Ordering::Release, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: `ptr` was just produced by `Box::into_raw` above
                // and lost the race, so nothing else observed it.
                let boxed = unsafe { Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    pub fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &'static T {
        if let Some(val) = self.get() {
            return val;
        }
        let _ = self.set(f());
        self.get().expect("OnceLock get failed after set")
    }
}

// SAFETY: the inner value is heap-allocated and reached only through the
// AtomicPtr's Acquire/Release pair; `T: Send` is enough to hand it across
// threads and `T: Sync` to share references to it.
unsafe impl<T: Send> Send for OnceLock<T> {}
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        let ptr = self.inner.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: `&mut self` means no concurrent access is possible.
            unsafe {
                let _ = Box::from_raw(ptr);
            }
        }
    }
}

/// A singleton constructed after the heap is up, behind an `IrqMutex`.
pub struct GlobalState<T> {
    inner: IrqMutex<Option<T>>,
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self { inner: IrqMutex::new(None) }
    }

    /// Initialize. Returns the value back if already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        self.inner.lock().as_ref().map(f)
    }

    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    /// Unconditionally replace the value, initialized or not. Used by test
    /// setup code that re-seeds a singleton fresh for every test case,
    /// where `init`'s "fail on second call" semantics would instead leak
    /// state from whichever test ran first.
    #[cfg(test)]
    pub fn reset(&self, value: T) {
        *self.inner.lock() = Some(value);
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the inner IrqMutex serializes every access to the Option<T>,
// including from interrupt context.
unsafe impl<T: Send> Send for GlobalState<T> {}
unsafe impl<T: Send> Sync for GlobalState<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_lock_rejects_second_set() {
        let lock = OnceLock::new();
        assert!(lock.get().is_none());
        assert!(lock.set(42).is_ok());
        assert_eq!(*lock.get().unwrap(), 42);
        assert!(lock.set(100).is_err());
    }

    #[test]
    fn global_state_inits_once_and_mutates_through_with_mut() {
        let state: GlobalState<alloc::string::String> = GlobalState::new();
        assert!(state.init(alloc::string::String::from("hello")).is_ok());
        state.with_mut(|s| s.push_str(" world"));
        assert_eq!(state.with(|s| s.clone()).unwrap(), "hello world");
        assert!(state.init(alloc::string::String::from("again")).is_err());
    }
}
