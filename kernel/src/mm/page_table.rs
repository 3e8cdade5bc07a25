//! Raw x86_64 4-level page table manipulation — the "hierarchical
//! page-table leaf manipulation" piece of the narrow platform interface
//! (§1). Everything above this file (`page_space`) is architecture
//! agnostic in spirit, even though this kernel only targets one
//! architecture.
//!
//! Tables are addressed by physical frame; reading/writing one requires
//! translating that frame to a virtual address the kernel can actually
//! dereference. The bootloader maps all of physical memory at a fixed
//! offset (`bootloader_api`'s `map-physical-memory` feature) — this
//! module is the one place that offset is used.

use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::{
    structures::paging::{PageTable, PageTableFlags},
    PhysAddr as X86PhysAddr, VirtAddr as X86VirtAddr,
};

use super::{phys, PhysicalAddr, VirtualAddr, PAGE_SIZE};
use crate::error::KernelError;

static PHYSICAL_MEMORY_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the offset at which the bootloader identity-mapped all of
/// physical memory. Must be called once, before any other function in
/// this module.
pub fn init(offset: u64) {
    PHYSICAL_MEMORY_OFFSET.store(offset, Ordering::Relaxed);
}

fn phys_to_virt(addr: PhysicalAddr) -> *mut PageTable {
    let offset = PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed);
    (offset + addr.as_u64()) as *mut PageTable
}

/// Borrow the page table at physical frame `addr` mutably.
///
/// # Safety
/// `addr` must name a live, exclusively-accessed page table frame; the
/// caller must hold whatever lock protects the owning `PageSpace` for the
/// duration of the borrow.
unsafe fn table_at<'a>(addr: PhysicalAddr) -> &'a mut PageTable {
    // SAFETY: see function contract; `phys_to_virt` is valid for any frame
    // once `init` has recorded the physical-memory mapping offset.
    unsafe { &mut *phys_to_virt(addr) }
}

/// Allocate and zero a fresh page table frame (used for interior PML4/PDPT/PD
/// entries created on demand by `map_single_4k`, §4.3).
fn alloc_zeroed_table() -> Result<PhysicalAddr, KernelError> {
    let frame = phys::alloc_frame().ok_or(KernelError::OutOfMemory { requested: PAGE_SIZE, available: 0 })?;
    // SAFETY: `frame` was just allocated and is not yet referenced by any
    // live table, so exclusive access is guaranteed.
    unsafe { table_at(frame) }.zero();
    Ok(frame)
}

/// Whether a leaf mapping is writable and/or user-accessible (§4.4: "user
/// read/write access" is the only access mode this kernel installs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAccess {
    pub writable: bool,
    pub user: bool,
}

impl PageAccess {
    pub const USER_READ_WRITE: PageAccess = PageAccess {
        writable: true,
        user: true,
    };
    pub const KERNEL_READ_WRITE: PageAccess = PageAccess {
        writable: true,
        user: false,
    };

    fn flags(self) -> PageTableFlags {
        let mut flags = PageTableFlags::PRESENT;
        if self.writable {
            flags |= PageTableFlags::WRITABLE;
        }
        if self.user {
            flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        flags
    }
}

fn indices(virt: VirtualAddr) -> [usize; 4] {
    let v = X86VirtAddr::new(virt.as_u64());
    [
        u16::from(v.p4_index()) as usize,
        u16::from(v.p3_index()) as usize,
        u16::from(v.p2_index()) as usize,
        u16::from(v.p1_index()) as usize,
    ]
}

/// Walk from `root` to the leaf (PT) entry for `virt`, creating any
/// missing interior tables along the way. Interior tables are always
/// created present+writable+user so that leaf-level `access` is the only
/// thing that actually restricts a mapping.
fn walk_create(root: PhysicalAddr, virt: VirtualAddr) -> Result<(PhysicalAddr, usize), KernelError> {
    let idx = indices(virt);
    let mut table_phys = root;
    let mut created = alloc::vec::Vec::new();
    for &i in &idx[..3] {
        // SAFETY: `table_phys` names a live page table; the owning
        // `PageSpace`'s caller holds the appropriate lock (§5).
        let table = unsafe { table_at(table_phys) };
        let entry = &mut table[i];
        if entry.is_unused() {
            match alloc_zeroed_table() {
                Ok(frame) => {
                    entry.set_addr(
                        X86PhysAddr::new(frame.as_u64()),
                        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
                    );
                    created.push(frame);
                }
                Err(e) => {
                    // Roll back any interior tables we created before the
                    // failure (§7: partial-failure rollback).
                    for frame in created {
                        phys::free_frames(frame, 1);
                    }
                    return Err(e);
                }
            }
        }
        table_phys = PhysicalAddr::new(entry.addr().as_u64());
    }
    Ok((table_phys, idx[3]))
}

/// Install a present leaf entry mapping `virt` to `phys` with `access`.
/// Creates any missing interior tables; rolls them back on failure.
pub fn map_single_4k(
    root: PhysicalAddr,
    virt: VirtualAddr,
    phys: PhysicalAddr,
    access: PageAccess,
) -> Result<(), KernelError> {
    let (pt_phys, pt_index) = walk_create(root, virt)?;
    // SAFETY: `pt_phys` was just produced by `walk_create`, which holds
    // the same locking discipline as this function's caller.
    let pt = unsafe { table_at(pt_phys) };
    pt[pt_index].set_addr(X86PhysAddr::new(phys.as_u64()), access.flags());
    Ok(())
}

/// Clear the leaf entry for `virt`, returning the frame it pointed to.
/// Interior tables are left in place (they may still back neighboring
/// mappings); this kernel does not reclaim empty interior tables.
pub fn unmap_single_4k(root: PhysicalAddr, virt: VirtualAddr) -> Result<PhysicalAddr, KernelError> {
    let idx = indices(virt);
    let mut table_phys = root;
    for &i in &idx[..3] {
        // SAFETY: see `walk_create`.
        let table = unsafe { table_at(table_phys) };
        let entry = &table[i];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return Err(KernelError::NoSuchObject { id: virt.as_u64() });
        }
        table_phys = PhysicalAddr::new(entry.addr().as_u64());
    }
    // SAFETY: see above.
    let pt = unsafe { table_at(table_phys) };
    let entry = &mut pt[idx[3]];
    if !entry.flags().contains(PageTableFlags::PRESENT) {
        return Err(KernelError::NoSuchObject { id: virt.as_u64() });
    }
    let frame = PhysicalAddr::new(entry.addr().as_u64());
    entry.set_unused();
    Ok(frame)
}

/// Create a fresh PML4 sharing the kernel half (entries 256..512) of
/// `root` and with an empty (all-unused) user half (§4.3 `clone()`).
pub fn clone_page_table(root: PhysicalAddr) -> Result<PhysicalAddr, KernelError> {
    let new_root = alloc_zeroed_table()?;
    // SAFETY: both frames are live tables; `new_root` was just allocated
    // and is exclusively ours, `root` is borrowed read-only here.
    let (src, dst) = unsafe { (table_at(root), table_at(new_root)) };
    for i in 256..512 {
        dst[i] = src[i].clone();
    }
    Ok(new_root)
}
