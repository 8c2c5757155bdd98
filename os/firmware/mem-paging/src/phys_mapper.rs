//! # Physical Memory Access
//!
//! The engine never dereferences a physical address directly. It asks a
//! [`PhysMapper`] for a reference, which lets the same code run on live
//! firmware page tables (identity mapped, [`IdentityMapper`]) and on a
//! simulated physical memory in tests.

use crate::addresses::PhysicalAddress;
use crate::page_table::PageTable;

/// Converts physical addresses to references usable from the current address space.
pub trait PhysMapper {
    /// Convert a physical address to a mutable reference.
    ///
    /// # Safety
    /// - `at` must be mapped writable in the current address space (or the
    ///   CPU must have `CR0.WP` cleared while the reference is written to).
    /// - The bytes at `at` must be a valid `T`; the lifetime is not tied to
    ///   the mapper and must not outlive the mapping.
    /// - The caller must not create overlapping mutable references.
    unsafe fn phys_to_mut<'a, T>(&self, at: PhysicalAddress) -> &'a mut T;

    /// Borrow the page table stored in the 4 KiB frame at `at`.
    ///
    /// Every address handed in by the engine comes from a table pointer it
    /// read out of an entry or from the page-table pool, and a page table is
    /// valid for any bit pattern.
    #[inline]
    fn table_mut<'a>(&self, at: PhysicalAddress) -> &'a mut PageTable {
        debug_assert!(at.is_aligned_to(0x1000), "page table at {at} is not page aligned");
        // SAFETY: see above; tables are frame-aligned plain `u64` arrays.
        unsafe { self.phys_to_mut::<PageTable>(at) }
    }
}

/// Mapper for firmware phases that run with physical memory identity mapped.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    unsafe fn phys_to_mut<'a, T>(&self, at: PhysicalAddress) -> &'a mut T {
        #[allow(clippy::cast_possible_truncation)]
        let ptr = at.as_u64() as usize as *mut T;
        // SAFETY: the caller guarantees `at` is mapped and holds a `T`.
        unsafe { &mut *ptr }
    }
}
