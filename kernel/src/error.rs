//! Kernel error taxonomy (§6, §10.2).
//!
//! Two layers. [`HelError`] is the ten-variant wire taxonomy every
//! syscall result word and completion event encodes — flat, `Copy`, no
//! payload beyond the discriminant, because it has to survive a trap
//! return as a raw `u64`. [`KernelError`] is what `mm`, `cap`, `ipc`,
//! `sched`, and `irq` actually propagate with `?` internally: it carries
//! the context (a requested size, the handle that didn't resolve, ...)
//! that would otherwise be lost before it reaches a log line. The
//! syscall dispatcher is the one place a `KernelError` is narrowed down
//! to a `HelError`, via `From`.
//!
//! A kernel-internal invariant violation (a corrupted free list, an
//! `AnyDescriptor` whose discriminant changed) never becomes either of
//! these: it goes through `kernel_assert!` instead, which logs and halts
//! per §7.

use core::fmt;

/// The syscall error taxonomy, in the exact order `§6` lists it. `Ok` is
/// value `0`; every other variant is a small positive discriminant so the
/// trap-return path can hand it back as a raw `u64` with no translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum HelError {
    Ok = 0,
    IllegalSyscall,
    IllegalHandle,
    NoSuchObject,
    NoMemory,
    BufferTooSmall,
    BadDescriptor,
    Timeout,
    Dismissed,
    Fault,
}

impl HelError {
    /// The word placed in result-word 0 for the trap-return helpers.
    pub const fn as_word(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for HelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HelError::Ok => "ok",
            HelError::IllegalSyscall => "illegal syscall",
            HelError::IllegalHandle => "illegal handle",
            HelError::NoSuchObject => "no such object",
            HelError::NoMemory => "no memory",
            HelError::BufferTooSmall => "buffer too small",
            HelError::BadDescriptor => "bad descriptor",
            HelError::Timeout => "timeout",
            HelError::Dismissed => "dismissed",
            HelError::Fault => "fault",
        };
        f.write_str(s)
    }
}

/// Result alias used at the syscall boundary for user-facing failures.
/// Kernel-internal invariant breakage is never expressed with this type
/// (see `kernel_assert!` below); this is strictly the §6 taxonomy.
pub type HelResult<T> = Result<T, HelError>;

/// The error type `mm`, `cap`, `ipc`, `sched`, and `irq` actually return
/// and propagate with `?` (§10.2). Each variant carries whatever context
/// was on hand at the point of failure; that context is for `Display`
/// and logging only; `From<KernelError> for HelError` below is the single
/// narrowing conversion that crosses into a result word or event.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A `Handle` with no live entry in the calling thread's `Universe`.
    InvalidHandle { handle: u64 },
    /// A `Handle` resolved, but to the wrong `AnyDescriptor` variant for
    /// the operation, or to an endpoint whose pipe/server has been
    /// closed while the operation was in flight.
    WrongDescriptorKind { handle: u64 },
    /// A vector, index, or other small integer name with no backing
    /// object (an out-of-range IRQ vector, an unmapped page).
    NoSuchObject { id: u64 },
    /// A physical-frame, heap, or bounded-queue allocation that could
    /// not be satisfied.
    OutOfMemory { requested: u64, available: u64 },
    /// A caller-supplied buffer too small for the payload being copied
    /// into it.
    BufferTooSmall { required: u64, available: u64 },
    /// A copy to/from a user pointer that was null or (on a real fault
    /// path) unmapped.
    Fault { address: u64 },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidHandle { handle } => {
                write!(f, "invalid handle {handle}")
            }
            KernelError::WrongDescriptorKind { handle } => {
                write!(f, "handle {handle} names the wrong descriptor kind, or is closed")
            }
            KernelError::NoSuchObject { id } => write!(f, "no such object: {id}"),
            KernelError::OutOfMemory { requested, available } => {
                write!(f, "out of memory: requested {requested}, available {available}")
            }
            KernelError::BufferTooSmall { required, available } => {
                write!(f, "buffer too small: required {required}, available {available}")
            }
            KernelError::Fault { address } => write!(f, "fault at {address:#x}"),
        }
    }
}

/// The single narrowing conversion from the rich internal taxonomy down
/// to the ten-variant wire taxonomy (§10.2). Used implicitly by `?`
/// whenever a syscall handler (returning `HelResult<_>`) calls into a
/// subsystem function (returning `Result<_, KernelError>`).
impl From<KernelError> for HelError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::InvalidHandle { .. } => HelError::IllegalHandle,
            KernelError::WrongDescriptorKind { .. } => HelError::BadDescriptor,
            KernelError::NoSuchObject { .. } => HelError::NoSuchObject,
            KernelError::OutOfMemory { .. } => HelError::NoMemory,
            KernelError::BufferTooSmall { .. } => HelError::BufferTooSmall,
            KernelError::Fault { .. } => HelError::Fault,
        }
    }
}

/// Assert a kernel invariant. Unlike `debug_assert!`, this is never
/// compiled out: violating one of these means kernel state is already
/// corrupt, and §7 requires we log and halt rather than continue.
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            log::error!("kernel invariant violated at {}:{}: {}", file!(), line!(), format_args!($($arg)*));
            $crate::arch::halt();
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_narrows_to_matching_hel_error() {
        assert_eq!(HelError::from(KernelError::InvalidHandle { handle: 5 }), HelError::IllegalHandle);
        assert_eq!(
            HelError::from(KernelError::WrongDescriptorKind { handle: 5 }),
            HelError::BadDescriptor
        );
        assert_eq!(HelError::from(KernelError::NoSuchObject { id: 9 }), HelError::NoSuchObject);
        assert_eq!(
            HelError::from(KernelError::OutOfMemory { requested: 4096, available: 0 }),
            HelError::NoMemory
        );
        assert_eq!(
            HelError::from(KernelError::BufferTooSmall { required: 8, available: 4 }),
            HelError::BufferTooSmall
        );
        assert_eq!(HelError::from(KernelError::Fault { address: 0 }), HelError::Fault);
    }
}
