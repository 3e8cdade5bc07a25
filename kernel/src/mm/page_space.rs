//! Architecture-agnostic page table wrapper (§4.3).
//!
//! `PageSpace` is what [`super::address_space::AddressSpace`] and the
//! scheduler actually hold; it hides the PML4/PDPT/PD/PT walk in
//! [`super::page_table`] behind the four operations §4.3 names.

use super::{page_table, PhysicalAddr, VirtualAddr};
pub use super::page_table::PageAccess;
use crate::{arch, error::KernelError};

/// One process's (or the kernel's) root page table.
#[derive(Debug, Clone, Copy)]
pub struct PageSpace {
    root: PhysicalAddr,
}

impl PageSpace {
    /// Wrap an already-built root (e.g. the one the bootloader handed
    /// us). Does not take ownership of the frame in any accounting sense
    /// — callers that allocated it are responsible for freeing it.
    pub fn from_root(root: PhysicalAddr) -> Self {
        Self { root }
    }

    /// The current page space, read from CR3.
    pub fn current() -> Self {
        Self {
            root: PhysicalAddr::new(arch::read_cr3()),
        }
    }

    pub fn root(&self) -> PhysicalAddr {
        self.root
    }

    /// §4.3: walk/create the hierarchical tables, installing a leaf
    /// entry. Followed by a TLB invalidation at the page granularity.
    pub fn map_single_4k(
        &self,
        virt: VirtualAddr,
        phys: PhysicalAddr,
        access: PageAccess,
    ) -> Result<(), KernelError> {
        page_table::map_single_4k(self.root, virt, phys, access)?;
        arch::invalidate_tlb(virt.as_u64());
        Ok(())
    }

    /// §4.3: clear the leaf and return the previously mapped frame.
    pub fn unmap_single_4k(&self, virt: VirtualAddr) -> Result<PhysicalAddr, KernelError> {
        let frame = page_table::unmap_single_4k(self.root, virt)?;
        arch::invalidate_tlb(virt.as_u64());
        Ok(frame)
    }

    /// §4.3: a new page space sharing kernel-half entries, empty user
    /// half.
    pub fn clone_user_space(&self) -> Result<Self, KernelError> {
        Ok(Self {
            root: page_table::clone_page_table(self.root)?,
        })
    }

    /// §4.3: load this page space's root into the MMU.
    pub fn switch_to(&self) {
        arch::x86_64::mmu::write_cr3(self.root);
    }
}
