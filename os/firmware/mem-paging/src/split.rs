//! # Large-Page Splitting
//!
//! A split replaces one terminal large-page entry by a pointer to a freshly
//! populated next-level table that maps the same range. The per-page attributes
//! of the new entries come from the [`PagingPolicy`](crate::policy::PagingPolicy),
//! not from the entry being replaced.

use crate::addresses::{PageSize, PhysicalAddress, Size1G, Size2M, Size4K};
use crate::context::PagingContext;
use crate::error::PagingError;
use crate::info::ENTRIES_PER_TABLE;
use crate::page_table::PageTableEntry;
use crate::phys_mapper::PhysMapper;
use crate::pool::{PageAllocator, PageTablePool};
use log::debug;

impl<M: PhysMapper> PagingContext<'_, M> {
    /// Replace the 2 MiB leaf `entry` mapping `physical_address` by a page
    /// table of 512 4 KiB pages.
    ///
    /// Every page is writable. The NULL page and the stack guard page are left
    /// non-present, stack pages get the no-execute bit when NX-for-stack is on.
    ///
    /// # Errors
    /// Pool exhaustion. `entry` is left untouched in that case.
    pub fn split_2m_page_to_4k<A: PageAllocator>(
        &self,
        pool: &mut PageTablePool<A>,
        physical_address: PhysicalAddress,
        entry: &mut PageTableEntry,
    ) -> Result<(), PagingError> {
        debug_assert!(physical_address.is_aligned_to(Size2M::SIZE));
        let table_address = Self::allocate_table(pool)?;
        let table = self.mapper.table_mut(table_address);

        let mut page = physical_address;
        for index in 0..ENTRIES_PER_TABLE {
            let mut pte = PageTableEntry::page_4k(page, self.mask);
            pte.set_present(!self.policy.is_unmapped_page(page));
            if self.policy.is_no_execute_page(page) {
                pte.set_no_execute(true);
            }
            table.set(index, pte);
            page += Size4K::SIZE;
        }

        *entry = PageTableEntry::table(table_address, self.mask);
        debug!("Split 2 MiB page {physical_address} into 4 KiB pages at {table_address}");
        Ok(())
    }

    /// Replace the 1 GiB leaf `entry` mapping `physical_address` by a page
    /// directory of 512 2 MiB pages.
    ///
    /// Any 2 MiB range the policy wants split is split further to 4 KiB right
    /// away. No-execute is only ever applied by that second split.
    ///
    /// # Errors
    /// Pool exhaustion. The directory may then be partially populated and
    /// `entry` is left untouched.
    pub fn split_1g_page_to_2m<A: PageAllocator>(
        &self,
        pool: &mut PageTablePool<A>,
        physical_address: PhysicalAddress,
        entry: &mut PageTableEntry,
    ) -> Result<(), PagingError> {
        debug_assert!(physical_address.is_aligned_to(Size1G::SIZE));
        let directory_address = Self::allocate_table(pool)?;
        let directory = self.mapper.table_mut(directory_address);

        let mut page = physical_address;
        for index in 0..ENTRIES_PER_TABLE {
            if self.policy.to_split_page_table(page, Size2M::SIZE) {
                self.split_2m_page_to_4k(pool, page, directory.entry_mut(index))?;
            } else {
                directory.set(index, PageTableEntry::large_page(page, self.mask));
            }
            page += Size2M::SIZE;
        }

        *entry = PageTableEntry::table(directory_address, self.mask);
        debug!("Split 1 GiB page {physical_address} into 2 MiB pages at {directory_address}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::addresses::{EncryptionMask, PageSize, PhysicalAddress, Size2M, Size4K};
    use crate::context::PagingContext;
    use crate::error::PagingError;
    use crate::info::ENTRIES_PER_TABLE;
    use crate::page_table::{PageTableEntry, PagingLevel};
    use crate::phys_mapper::PhysMapper;
    use crate::policy::{NullDetectionMask, PagingPolicy, StackGeometry};
    use crate::pool::{PageTablePool, PoolError};
    use crate::test_support::{BumpPageAllocator, SimulatedMemory};

    const STACK_BASE: u64 = 0x10_0000;
    const STACK_SIZE: u64 = 0x4000;

    fn full_policy() -> PagingPolicy {
        PagingPolicy {
            null_detection: NullDetectionMask::new().with_enabled(true),
            stack_guard: true,
            nx_for_stack: true,
            stack: StackGeometry::new(PhysicalAddress::new(STACK_BASE), STACK_SIZE),
        }
    }

    fn pool() -> PageTablePool<BumpPageAllocator> {
        PageTablePool::new(BumpPageAllocator::new(0x1_0000_0000, 0x2_0000_0000))
    }

    #[test]
    fn split_2m_covers_range_and_applies_policy() {
        let memory = SimulatedMemory::new();
        let mask = EncryptionMask::from_bit(51);
        let cx = PagingContext::new(&memory, mask, full_policy());
        let mut pool = pool();

        let mut entry = PageTableEntry::large_page(PhysicalAddress::new(0), mask);
        cx.split_2m_page_to_4k(&mut pool, PhysicalAddress::new(0), &mut entry)
            .unwrap();

        assert!(entry.present() && entry.writable() && !entry.page_size());
        assert_ne!(entry.into_bits() & mask.bits(), 0);

        let table = memory.table_mut(entry.address(mask));
        let mut non_present = 0;
        for (index, pte) in table.iter().enumerate() {
            let expected = index as u64 * Size4K::SIZE;
            assert_eq!(pte.address(mask).as_u64(), expected);
            assert!(pte.writable());
            assert!(!pte.page_size());
            if !pte.present() {
                non_present += 1;
            }
            let in_stack = (STACK_BASE..STACK_BASE + STACK_SIZE).contains(&expected);
            assert_eq!(pte.no_execute(), in_stack, "page {expected:#x}");
        }
        // page 0 and the guard page
        assert_eq!(non_present, 2);
        assert!(!table.get(0).present());
        assert!(!table.get((STACK_BASE / Size4K::SIZE) as usize).present());
    }

    #[test]
    fn split_2m_without_policy_maps_every_page() {
        let memory = SimulatedMemory::new();
        let cx = PagingContext::new(&memory, EncryptionMask::NONE, PagingPolicy::default());
        let mut pool = pool();

        let base = PhysicalAddress::new(0x4020_0000);
        let mut entry = PageTableEntry::large_page(base, EncryptionMask::NONE);
        cx.split_2m_page_to_4k(&mut pool, base, &mut entry).unwrap();

        let table = memory.table_mut(entry.address(EncryptionMask::NONE));
        assert!(table.iter().all(|pte| pte.present() && !pte.no_execute()));
        let covered: u64 = table.iter().map(|_| Size4K::SIZE).sum();
        assert_eq!(covered, Size2M::SIZE);
        let last = table.get(ENTRIES_PER_TABLE - 1);
        assert_eq!(last.address(EncryptionMask::NONE).as_u64(), 0x403F_F000);
    }

    #[test]
    fn split_entries_reencode_bit_identically() {
        let memory = SimulatedMemory::new();
        let mask = EncryptionMask::from_bit(47);
        let cx = PagingContext::new(&memory, mask, PagingPolicy::default());
        let mut pool = pool();

        let mut entry = PageTableEntry::new();
        cx.split_2m_page_to_4k(&mut pool, PhysicalAddress::new(0x20_0000), &mut entry)
            .unwrap();
        let table = memory.table_mut(entry.address(mask));
        for pte in table.iter() {
            let mut rebuilt = PageTableEntry::page_4k(pte.address(mask), mask);
            rebuilt.set_present(true);
            assert_eq!(rebuilt, *pte);
        }
        assert_eq!(PageTableEntry::table(entry.address(mask), mask), entry);
    }

    #[test]
    fn split_1g_recurses_only_where_policy_demands() {
        let memory = SimulatedMemory::new();
        let mask = EncryptionMask::from_bit(51);
        let cx = PagingContext::new(&memory, mask, full_policy());
        let mut pool = pool();

        let mut entry = PageTableEntry::large_page(PhysicalAddress::new(0), mask);
        cx.split_1g_page_to_2m(&mut pool, PhysicalAddress::new(0), &mut entry)
            .unwrap();

        let directory = memory.table_mut(entry.address(mask));
        // 0..2 MiB holds page 0 and the whole stack
        let first = directory.get(0);
        assert!(!first.page_size());
        assert!(!first.is_leaf_at(PagingLevel::Pd));
        for (index, pde) in directory.iter().enumerate().skip(1) {
            assert!(pde.page_size(), "index {index}");
            assert!(!pde.no_execute());
            assert_eq!(pde.leaf_base::<Size2M>(mask).as_u64(), index as u64 * Size2M::SIZE);
        }
        // directory plus one page table
        assert_eq!(pool.head().unwrap().offset(), 3 * Size4K::SIZE);
    }

    #[test]
    fn exhausted_2m_split_leaves_entry_alone() {
        let memory = SimulatedMemory::new();
        let mask = EncryptionMask::from_bit(51);
        let cx = PagingContext::new(&memory, mask, full_policy());
        // one page of backing memory cannot hold a 2 MiB block
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0, 0x1000));

        let original = PageTableEntry::large_page(PhysicalAddress::new(0), mask);
        let mut entry = original;
        let result = cx.split_2m_page_to_4k(&mut pool, PhysicalAddress::new(0), &mut entry);

        assert_eq!(
            result,
            Err(PagingError::Pool(PoolError::OutOfPoolMemory { pages: 512 }))
        );
        assert_eq!(entry, original);
        assert!(memory.snapshot().is_empty());
    }

    #[test]
    fn exhausted_1g_split_leaves_entry_alone() {
        let memory = SimulatedMemory::new();
        let mask = EncryptionMask::from_bit(51);
        let cx = PagingContext::new(&memory, mask, full_policy());
        // header and directory fit, the page table for the first 2 MiB does not
        let mut pool = PageTablePool::with_unit_size(
            BumpPageAllocator::new(0x1000_0000, 0x1000_2000),
            Size4K::SIZE,
        )
        .unwrap();

        let original = PageTableEntry::large_page(PhysicalAddress::new(0), mask);
        let mut entry = original;
        let result = cx.split_1g_page_to_2m(&mut pool, PhysicalAddress::new(0), &mut entry);

        assert_eq!(
            result,
            Err(PagingError::Pool(PoolError::OutOfPoolMemory { pages: 2 }))
        );
        assert_eq!(entry, original);
        assert_eq!(pool.head().unwrap().free_pages(), 0);
    }
}
