//! `AddressSpace` and `Mapping` (§3, §4.4).
//!
//! An `AddressSpace` is a user page table plus an ordered set of
//! `Mapping`s. Mappings are found by base address (a `BTreeMap` keeps
//! them ordered, which is exactly what `allocate`'s "find a hole ordered
//! by base address" needs).

use alloc::{collections::BTreeMap, sync::Arc};

use super::{
    memory::SharedMemory,
    page_space::{PageAccess, PageSpace},
    PhysicalAddr, VirtualAddr, PAGE_SIZE,
};
use crate::{error::KernelError, sync::IrqMutex};

/// Lowest mappable user address. Page 0 is never handed out, so a null
/// pointer dereference always faults instead of aliasing something real.
const USER_SPACE_START: u64 = 0x0001_0000;
/// Highest mappable user address (exclusive): the canonical low half of a
/// 4-level x86_64 address space.
const USER_SPACE_END: u64 = 0x0000_7fff_ffff_f000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Hole,
    Memory,
}

/// A half-open virtual range `[base, base+size)` within one
/// `AddressSpace` (§3). Exclusively owned by that `AddressSpace`.
pub struct Mapping {
    pub base: VirtualAddr,
    pub size: u64,
    pub kind: MappingKind,
    memory: Option<SharedMemory>,
}

impl Mapping {
    fn end(&self) -> u64 {
        self.base.as_u64() + self.size
    }
}

/// Shared-owned (§3): threads that share a process share this.
pub type SharedAddressSpace = Arc<IrqMutex<AddressSpace>>;

pub struct AddressSpace {
    page_space: PageSpace,
    /// Keyed by base address so holes can be found in base-address order
    /// (§4.4).
    mappings: BTreeMap<u64, Mapping>,
}

impl AddressSpace {
    pub fn new(page_space: PageSpace) -> SharedAddressSpace {
        Arc::new(IrqMutex::new(Self {
            page_space,
            mappings: BTreeMap::new(),
        }))
    }

    pub fn page_space(&self) -> &PageSpace {
        &self.page_space
    }

    /// §4.4: find a hole in the user half (ordered by base address) and
    /// return a new `Mapping` of type `Hole`.
    pub fn allocate(&mut self, size: u64) -> Result<VirtualAddr, KernelError> {
        let size = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut cursor = USER_SPACE_START;
        for mapping in self.mappings.values() {
            if mapping.base.as_u64() >= cursor + size {
                break;
            }
            cursor = mapping.end();
        }
        if cursor + size > USER_SPACE_END {
            return Err(KernelError::OutOfMemory {
                requested: size,
                available: USER_SPACE_END.saturating_sub(cursor),
            });
        }
        self.mappings.insert(
            cursor,
            Mapping {
                base: VirtualAddr::new(cursor),
                size,
                kind: MappingKind::Hole,
                memory: None,
            },
        );
        Ok(VirtualAddr::new(cursor))
    }

    /// §4.4: fails if any existing mapping overlaps `[addr, addr+size)`.
    pub fn allocate_at(&mut self, addr: VirtualAddr, size: u64) -> Result<(), KernelError> {
        let size = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let base = addr.as_u64();
        if base < USER_SPACE_START || base + size > USER_SPACE_END {
            return Err(KernelError::OutOfMemory {
                requested: size,
                available: USER_SPACE_END.saturating_sub(USER_SPACE_START),
            });
        }
        let overlaps = self
            .mappings
            .values()
            .any(|m| base < m.end() && m.base.as_u64() < base + size);
        if overlaps {
            return Err(KernelError::NoSuchObject { id: base });
        }
        self.mappings.insert(
            base,
            Mapping {
                base: addr,
                size,
                kind: MappingKind::Hole,
                memory: None,
            },
        );
        Ok(())
    }

    /// Back `[base, base+size)` with `memory`, installing page-table
    /// entries for every page (§4.4's "MapMemory after partial page
    /// installation" rollback, §7).
    pub fn install_memory(
        &mut self,
        base: VirtualAddr,
        size: u64,
        memory: SharedMemory,
        pages: &[PhysicalAddr],
    ) -> Result<(), KernelError> {
        let mut installed = 0usize;
        for (i, frame) in pages.iter().enumerate() {
            let virt = VirtualAddr::new(base.as_u64() + (i as u64) * PAGE_SIZE);
            if let Err(e) = self
                .page_space
                .map_single_4k(virt, *frame, PageAccess::USER_READ_WRITE)
            {
                for j in 0..installed {
                    let virt = VirtualAddr::new(base.as_u64() + (j as u64) * PAGE_SIZE);
                    let _ = self.page_space.unmap_single_4k(virt);
                }
                return Err(e);
            }
            installed += 1;
        }
        self.mappings.insert(
            base.as_u64(),
            Mapping {
                base,
                size,
                kind: MappingKind::Memory,
                memory: Some(memory),
            },
        );
        Ok(())
    }

    pub fn mapping_at(&self, base: VirtualAddr) -> Option<&Mapping> {
        self.mappings.get(&base.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_space() -> AddressSpace {
        AddressSpace {
            page_space: PageSpace::from_root(PhysicalAddr::new(0)),
            mappings: BTreeMap::new(),
        }
    }

    #[test]
    fn allocate_packs_holes_in_base_order() {
        let mut space = fresh_space();
        let a = space.allocate(PAGE_SIZE).unwrap();
        let b = space.allocate(PAGE_SIZE).unwrap();
        assert!(b.as_u64() >= a.as_u64() + PAGE_SIZE);
    }

    #[test]
    fn allocate_at_rejects_overlap() {
        let mut space = fresh_space();
        let base = VirtualAddr::new(USER_SPACE_START);
        space.allocate_at(base, PAGE_SIZE * 2).unwrap();
        let overlapping = VirtualAddr::new(USER_SPACE_START + PAGE_SIZE);
        assert!(space.allocate_at(overlapping, PAGE_SIZE).is_err());
    }
}
