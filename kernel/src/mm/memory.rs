//! `Memory`: an owned, shareable vector of physical frames (§3, §4.4).
//!
//! A `Memory` backs zero or more [`super::address_space::Mapping`]s, in
//! this or several address spaces at once (two mappings of the *same*
//! `Memory` alias each other; two mappings of *distinct* `Memory` objects
//! never do, per §8's round-trip property). It owns its frames: dropping
//! the last reference returns them to the physical allocator.

use alloc::{sync::Arc, vec::Vec};

use super::{phys, PhysicalAddr, PAGE_SIZE};
use crate::{
    error::KernelError,
    sync::IrqMutex,
};

/// A sequence of 4 KiB physical frames, in order, forming one contiguous
/// logical byte range `frames.len() * 4096`.
pub struct Memory {
    frames: Vec<PhysicalAddr>,
}

/// `Memory` is always shared-owned (§3: "shared-owned by descriptors and
/// mappings"); this is the handle every descriptor/mapping actually
/// stores.
pub type SharedMemory = Arc<IrqMutex<Memory>>;

impl Memory {
    pub fn new() -> SharedMemory {
        Arc::new(IrqMutex::new(Memory { frames: Vec::new() }))
    }

    /// Byte length: `frames.len() * 4096` (§3).
    pub fn len_bytes(&self) -> u64 {
        self.frames.len() as u64 * PAGE_SIZE
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Grow (or shrink) to cover `length` bytes, rounded up to a 4 KiB
    /// multiple (§4.4). Only growth allocates; shrinking frees the
    /// trailing frames.
    pub fn resize(&mut self, length: u64) -> Result<(), KernelError> {
        let target_pages = length.div_ceil(PAGE_SIZE) as usize;
        match target_pages.cmp(&self.frames.len()) {
            core::cmp::Ordering::Greater => {
                let additional = target_pages - self.frames.len();
                let mut allocated = Vec::with_capacity(additional);
                for _ in 0..additional {
                    match phys::alloc_frame() {
                        Some(frame) => allocated.push(frame),
                        None => {
                            let got = allocated.len() as u64;
                            for frame in allocated {
                                phys::free_frames(frame, 1);
                            }
                            return Err(KernelError::OutOfMemory {
                                requested: additional as u64 * PAGE_SIZE,
                                available: got * PAGE_SIZE,
                            });
                        }
                    }
                }
                self.frames.extend(allocated);
            }
            core::cmp::Ordering::Less => {
                for frame in self.frames.split_off(target_pages) {
                    phys::free_frames(frame, 1);
                }
            }
            core::cmp::Ordering::Equal => {}
        }
        Ok(())
    }

    /// Append a caller-supplied frame without going through the physical
    /// allocator. Used exclusively by the boot trampoline to wrap an
    /// already-loaded module image (§4.4, §6 "Boot protocol" module 1) in
    /// a `Memory` so it can be handed to init as a `MemoryAccess` handle.
    pub fn add_page(&mut self, phys: PhysicalAddr) {
        self.frames.push(phys);
    }

    pub fn get_page(&self, index: usize) -> Option<PhysicalAddr> {
        self.frames.get(index).copied()
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        for frame in self.frames.drain(..) {
            phys::free_frames(frame, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_rounds_up_to_page_size() {
        phys::init_for_test(64);
        let mem = Memory::new();
        let mut guard = mem.lock();
        guard.resize(1).unwrap();
        assert_eq!(guard.frame_count(), 1);
        assert_eq!(guard.len_bytes(), PAGE_SIZE);
    }

    #[test]
    fn distinct_pages_are_distinct_frames() {
        phys::init_for_test(64);
        let mem = Memory::new();
        let mut guard = mem.lock();
        guard.resize(PAGE_SIZE * 3).unwrap();
        let a = guard.get_page(0).unwrap();
        let b = guard.get_page(1).unwrap();
        let c = guard.get_page(2).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(a.is_aligned(PAGE_SIZE));
    }
}
