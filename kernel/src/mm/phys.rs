//! Physical frame allocator (§4.1).
//!
//! A single bitmap over all usable physical memory, built from the
//! bootloader's memory map at boot. Allocation is first-fit over 4 KiB
//! frames; there is deliberately no notion of NUMA nodes or zones here —
//! this kernel treats physical memory as a single flat frame space.

use crate::mm::PhysicalAddr;
use crate::sync::GlobalState;
use bootloader_api::info::{BootInfo, MemoryRegionKind};

const FRAME_SIZE: u64 = 4096;
const MAX_FRAMES: usize = 1 << 20; // covers up to 4 TiB of physical memory

struct Bitmap {
    bits: alloc::vec::Vec<u64>,
    base: PhysicalAddr,
    frame_count: usize,
}

impl Bitmap {
    fn new(base: PhysicalAddr, frame_count: usize) -> Self {
        let words = frame_count.div_ceil(64);
        Self {
            bits: alloc::vec![u64::MAX; words],
            base,
            frame_count,
        }
    }

    fn mark_free(&mut self, index: usize) {
        self.bits[index / 64] &= !(1 << (index % 64));
    }

    fn mark_used(&mut self, index: usize) {
        self.bits[index / 64] |= 1 << (index % 64);
    }

    fn is_used(&self, index: usize) -> bool {
        self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    fn alloc_one(&mut self) -> Option<usize> {
        for (word_idx, word) in self.bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let index = word_idx * 64 + bit;
                if index >= self.frame_count {
                    return None;
                }
                *word |= 1 << bit;
                return Some(index);
            }
        }
        None
    }

    fn alloc_contiguous(&mut self, count: usize) -> Option<usize> {
        if count == 1 {
            return self.alloc_one();
        }
        let mut run_start = None;
        let mut run_len = 0usize;
        for index in 0..self.frame_count {
            if self.is_used(index) {
                run_start = None;
                run_len = 0;
                continue;
            }
            if run_start.is_none() {
                run_start = Some(index);
            }
            run_len += 1;
            if run_len == count {
                let start = run_start.unwrap();
                for i in start..start + count {
                    self.mark_used(i);
                }
                return Some(start);
            }
        }
        None
    }
}

static BITMAP: GlobalState<Bitmap> = GlobalState::new();

/// Scan the bootloader-provided memory map and build the frame bitmap,
/// marking every `Usable` region free and everything else permanently
/// reserved.
pub fn init(boot_info: &BootInfo) {
    let regions = &boot_info.memory_regions;
    let highest = regions.iter().map(|r| r.end).max().unwrap_or(0);
    let frame_count = ((highest / FRAME_SIZE) as usize).min(MAX_FRAMES);

    let mut bitmap = Bitmap::new(PhysicalAddr::new(0), frame_count);
    for region in regions.iter() {
        if region.kind != MemoryRegionKind::Usable {
            continue;
        }
        let start_frame = (region.start / FRAME_SIZE) as usize;
        let end_frame = (region.end / FRAME_SIZE) as usize;
        for frame in start_frame..end_frame.min(frame_count) {
            bitmap.mark_free(frame);
        }
    }

    let free_frames = (0..frame_count).filter(|&i| !bitmap.is_used(i)).count();
    log::info!(
        "physical memory: {} frames usable of {} tracked ({} MiB)",
        free_frames,
        frame_count,
        free_frames as u64 * FRAME_SIZE / (1024 * 1024)
    );

    // Called exactly once during boot, before any allocation; a second
    // call (which cannot happen on the real boot path) would be a logic
    // error, so the result is deliberately ignored rather than asserted.
    let _ = BITMAP.init(bitmap);
}

/// Allocate `count` contiguous 4 KiB frames. Returns `None` if no run of
/// that length is free.
pub fn alloc_frames(count: usize) -> Option<PhysicalAddr> {
    BITMAP.with_mut(|bitmap| {
        let index = bitmap.alloc_contiguous(count)?;
        Some(PhysicalAddr::new(bitmap.base.as_u64() + index as u64 * FRAME_SIZE))
    })?
}

pub fn alloc_frame() -> Option<PhysicalAddr> {
    alloc_frames(1)
}

/// Free `count` contiguous frames starting at `addr`.
pub fn free_frames(addr: PhysicalAddr, count: usize) {
    BITMAP.with_mut(|bitmap| {
        let index = ((addr.as_u64() - bitmap.base.as_u64()) / FRAME_SIZE) as usize;
        for i in index..index + count {
            bitmap.mark_free(i);
        }
    });
}

/// Seed an all-free bitmap for host unit tests, which never run
/// `init(boot_info)` (there is no bootloader memory map on the host).
#[cfg(test)]
pub fn init_for_test(frame_count: usize) {
    let mut bitmap = Bitmap::new(PhysicalAddr::new(0), frame_count);
    for i in 0..frame_count {
        bitmap.mark_free(i);
    }
    BITMAP.reset(bitmap);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_then_realloc_reuses_frame() {
        init_for_test(16);
        let a = alloc_frame().unwrap();
        free_frames(a, 1);
        let b = alloc_frame().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn contiguous_allocation_is_contiguous() {
        init_for_test(16);
        let base = alloc_frames(4).unwrap();
        assert!(base.is_aligned(FRAME_SIZE));
    }
}
