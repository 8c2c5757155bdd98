//! # Page-Table Self-Protection
//!
//! Once the identity map is complete the pages holding it are made read-only,
//! so that stray writes cannot rewrite the mappings. Every pool block is
//! covered one pool unit at a time. A unit is at most 2 MiB and aligned to its
//! own size, so the entries mapping it at any one level sit next to each other
//! in one table.

use crate::addresses::{PhysicalAddress, Size1G, Size2M};
use crate::context::PagingContext;
use crate::cpu::{CpuControl, WriteProtectSuspended};
use crate::error::PagingError;
use crate::info::ENTRIES_PER_TABLE;
use crate::page_table::PagingLevel;
use crate::phys_mapper::PhysMapper;
use crate::pool::{PageAllocator, PageTablePool};
use log::{debug, info};

impl<M: PhysMapper> PagingContext<'_, M> {
    /// Clear `R/W` on the mapping of the pool unit starting at `address`.
    ///
    /// Large pages bigger than the unit are split on the way down. If the first
    /// entry covering the unit is already read-only nothing is changed. The
    /// caller is responsible for `CR0.WP`.
    ///
    /// # Errors
    /// [`PagingError::NotMapped`] if `address` is not mapped, or pool
    /// exhaustion while splitting.
    pub fn set_page_table_pool_read_only<A: PageAllocator>(
        &self,
        pool: &mut PageTablePool<A>,
        root: PhysicalAddress,
        address: PhysicalAddress,
        level4_paging: bool,
    ) -> Result<(), PagingError> {
        let unit_size = pool.unit_size();
        debug_assert!(address.is_aligned_to(unit_size));

        let mut table = self.mapper.table_mut(root);
        let mut level = PagingLevel::top(level4_paging);
        loop {
            let index = level.index_of(address);
            let entry = table.get(index);
            if !entry.present() {
                return Err(PagingError::NotMapped { address, level });
            }

            if !entry.is_leaf_at(level)
                && let Some(lower) = level.lower()
            {
                table = self.mapper.table_mut(entry.address(self.mask));
                level = lower;
                continue;
            }

            let level_size = level.entry_size();
            if unit_size < level_size {
                match level {
                    PagingLevel::Pdpt => {
                        let base = entry.leaf_base::<Size1G>(self.mask);
                        self.split_1g_page_to_2m(pool, base, table.entry_mut(index))?;
                    }
                    PagingLevel::Pd => {
                        let base = entry.leaf_base::<Size2M>(self.mask);
                        self.split_2m_page_to_4k(pool, base, table.entry_mut(index))?;
                    }
                    // no large pages at level 4, and units are at least 4 KiB
                    PagingLevel::Pml4 | PagingLevel::Pt => {
                        return Err(PagingError::NotMapped { address, level });
                    }
                }
                // the entry now points at the new table
                continue;
            }

            if entry.writable() {
                // units are at most 2 MiB and self-aligned, so they end in this table
                let count = usize::try_from(unit_size / level_size).unwrap_or(ENTRIES_PER_TABLE);
                for index in index..(index + count).min(ENTRIES_PER_TABLE) {
                    table.entry_mut(index).set_writable(false);
                }
            }
            return Ok(());
        }
    }

    /// Make every page-table pool block read-only in the tables under `root`.
    ///
    /// `CR0.WP` is cleared for the duration and set again on return, also when
    /// an error is propagated. Blocks the pool grows by while splitting are not
    /// visited. An empty pool is left alone.
    ///
    /// # Errors
    /// See [`set_page_table_pool_read_only`](Self::set_page_table_pool_read_only).
    pub fn enable_page_table_protection<A: PageAllocator, C: CpuControl + ?Sized>(
        &self,
        pool: &mut PageTablePool<A>,
        cpu: &mut C,
        root: PhysicalAddress,
        level4_paging: bool,
    ) -> Result<(), PagingError> {
        if pool.is_empty() {
            return Ok(());
        }

        let blocks = pool.ring();
        info!(
            "Write-protecting {} page-table pool block(s) under root {root}",
            blocks.len()
        );

        let _write_protect = WriteProtectSuspended::new(cpu);
        let unit_size = pool.unit_size();
        for index in blocks {
            let block = *pool.block(index);
            let mut address = block.base();
            let end = block.base() + block.size();
            while address < end {
                self.set_page_table_pool_read_only(pool, root, address, level4_paging)?;
                debug!("Pool unit {address} is read-only");
                address += unit_size;
            }
        }

        info!("Page tables are write-protected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::addresses::{EncryptionMask, PhysicalAddress};
    use crate::context::PagingContext;
    use crate::cpu::CpuControl;
    use crate::error::PagingError;
    use crate::info::PAGE_SIZE;
    use crate::page_table::PagingLevel;
    use crate::phys_mapper::PhysMapper;
    use crate::policy::{NullDetectionMask, PagingPolicy, StackGeometry};
    use crate::pool::{PageTablePool, PoolBlock, PoolError};
    use crate::test_support::{BumpPageAllocator, CpuEvent, FakeCpu, SimulatedMemory};

    fn assert_blocks_read_only<M: PhysMapper>(
        cx: &PagingContext<'_, M>,
        root: PhysicalAddress,
        blocks: &[PoolBlock],
    ) {
        for block in blocks {
            let mut page = block.base();
            while page < block.base() + block.size() {
                let hit = cx.query(root, page, true).unwrap();
                assert!(!hit.entry.writable(), "{page} is writable");
                page += PAGE_SIZE;
            }
        }
    }

    #[test]
    fn every_pool_page_ends_up_read_only() {
        let memory = SimulatedMemory::new();
        let mask = EncryptionMask::from_bit(51);
        let cx = PagingContext::new(&memory, mask, PagingPolicy::default());
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0x200_0000, 0x400_0000));
        let mut cpu = FakeCpu::new();

        let root = cx
            .create_identity_mapping_page_tables(&mut pool, &mut cpu, 32, false)
            .unwrap();

        let blocks: Vec<_> = pool.blocks().copied().collect();
        assert_blocks_read_only(&cx, root, &blocks);

        // neighbours keep their write access
        for outside in [0x1E0_0000_u64, 0x400_0000] {
            let hit = cx.query(root, PhysicalAddress::new(outside), true).unwrap();
            assert!(hit.entry.writable());
        }
        assert_eq!(
            cpu.events(),
            [CpuEvent::WriteProtect(false), CpuEvent::WriteProtect(true)]
        );
    }

    #[test]
    fn protecting_twice_changes_nothing() {
        let memory = SimulatedMemory::new();
        let policy = PagingPolicy {
            null_detection: NullDetectionMask::new().with_enabled(true),
            ..PagingPolicy::default()
        };
        let cx = PagingContext::new(&memory, EncryptionMask::from_bit(47), policy);
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0x4000_0000, 0x8000_0000));
        let mut cpu = FakeCpu::new();

        // the first pass splits the 1 GiB page holding the pool
        let root = cx
            .create_identity_mapping_page_tables(&mut pool, &mut cpu, 36, true)
            .unwrap();
        let hit = cx.query(root, pool.head().unwrap().base(), true).unwrap();
        assert_eq!(hit.level, PagingLevel::Pd);

        let tables = memory.snapshot();
        let blocks: Vec<_> = pool.blocks().copied().collect();

        cx.enable_page_table_protection(&mut pool, &mut cpu, root, true)
            .unwrap();

        assert_eq!(memory.snapshot(), tables);
        assert_eq!(pool.blocks().copied().collect::<Vec<_>>(), blocks);
    }

    #[test]
    fn page_sized_units_split_down_to_4k() {
        let memory = SimulatedMemory::new();
        let cx = PagingContext::new(&memory, EncryptionMask::NONE, PagingPolicy::default());
        let mut pool = PageTablePool::with_unit_size(
            BumpPageAllocator::new(0x20_0000, 0x40_0000),
            PAGE_SIZE,
        )
        .unwrap();
        let mut cpu = FakeCpu::new();

        let root = cx
            .create_identity_mapping_page_tables(&mut pool, &mut cpu, 32, false)
            .unwrap();

        // PML4, PDPT, 4 directories and the header: one 7-page block, followed
        // by the page table the walker needed to split the 2 MiB mapping
        let blocks: Vec<_> = pool.blocks().copied().collect();
        assert_eq!(blocks.len(), 2);
        let tables_block = blocks[1];
        assert_eq!(tables_block.size(), 7 * PAGE_SIZE);

        assert_blocks_read_only(&cx, root, &[tables_block]);
        let hit = cx.query(root, tables_block.base(), true).unwrap();
        assert_eq!(hit.level, PagingLevel::Pt);

        // blocks grown during protection are not visited
        let grown = cx.query(root, blocks[0].base(), true).unwrap();
        assert!(grown.entry.writable());
        let after = cx.query(root, tables_block.base() + tables_block.size(), true).unwrap();
        assert!(after.entry.writable());
    }

    #[test]
    fn policy_survives_protection() {
        let memory = SimulatedMemory::new();
        let stack = StackGeometry::new(PhysicalAddress::new(0x8_0000), 0x8000);
        let policy = PagingPolicy {
            null_detection: NullDetectionMask::new().with_enabled(true),
            stack_guard: true,
            nx_for_stack: true,
            stack,
        };
        let cx = PagingContext::new(&memory, EncryptionMask::from_bit(51), policy);
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0x200_0000, 0x400_0000));
        let mut cpu = FakeCpu::new();

        let root = cx
            .create_identity_mapping_page_tables(&mut pool, &mut cpu, 32, true)
            .unwrap();

        assert_eq!(
            cx.query(root, PhysicalAddress::new(0), true),
            Err(PagingError::NotMapped {
                address: PhysicalAddress::new(0),
                level: PagingLevel::Pt
            })
        );
        assert!(cx.query(root, stack.base, true).is_err());

        let stack_page = cx.query(root, stack.base + PAGE_SIZE, true).unwrap();
        assert_eq!(stack_page.level, PagingLevel::Pt);
        assert!(stack_page.entry.no_execute());

        let code = cx.query(root, PhysicalAddress::new(0x1000), true).unwrap();
        assert!(!code.entry.no_execute());

        let blocks: Vec<_> = pool.blocks().copied().collect();
        assert_blocks_read_only(&cx, root, &blocks);
        assert_eq!(cpu.events().last(), Some(&CpuEvent::ExecuteDisable));
    }

    #[test]
    fn empty_pool_is_left_alone() {
        let memory = SimulatedMemory::new();
        let cx = PagingContext::new(&memory, EncryptionMask::NONE, PagingPolicy::default());
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0, 0x20_0000));
        let mut cpu = FakeCpu::new();

        cx.enable_page_table_protection(&mut pool, &mut cpu, PhysicalAddress::new(0x1000), true)
            .unwrap();
        assert!(cpu.events().is_empty());
        assert!(memory.snapshot().is_empty());
    }

    #[test]
    fn unmapped_pool_restores_write_protect() {
        let memory = SimulatedMemory::new();
        let cx = PagingContext::new(&memory, EncryptionMask::NONE, PagingPolicy::default());
        // the pool sits above the 4 GiB the map covers
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0x2_0000_0000, 0x3_0000_0000));
        let mut cpu = FakeCpu::new();

        let result = cx.create_identity_mapping_page_tables(&mut pool, &mut cpu, 32, false);
        assert_eq!(
            result,
            Err(PagingError::NotMapped {
                address: PhysicalAddress::new(0x2_0000_0000),
                level: PagingLevel::Pdpt
            })
        );
        assert!(cpu.write_protect_enabled());
        assert_eq!(
            cpu.events(),
            [CpuEvent::WriteProtect(false), CpuEvent::WriteProtect(true)]
        );
    }

    #[test]
    fn pool_exhaustion_while_splitting_restores_write_protect() {
        let memory = SimulatedMemory::new();
        let cx = PagingContext::new(&memory, EncryptionMask::NONE, PagingPolicy::default());
        // room for the header and the six tables of the map, nothing more
        let mut pool = PageTablePool::with_unit_size(
            BumpPageAllocator::new(0x20_0000, 0x20_7000),
            PAGE_SIZE,
        )
        .unwrap();
        let mut cpu = FakeCpu::new();

        let result = cx.create_identity_mapping_page_tables(&mut pool, &mut cpu, 32, false);
        assert_eq!(
            result,
            Err(PagingError::Pool(PoolError::OutOfPoolMemory { pages: 2 }))
        );
        assert!(cpu.write_protect_enabled());
        assert_eq!(
            cpu.events(),
            [CpuEvent::WriteProtect(false), CpuEvent::WriteProtect(true)]
        );
        assert_eq!(pool.blocks().count(), 1);
    }

    #[test]
    fn level3_walk_starts_at_the_pdpt() {
        let memory = SimulatedMemory::new();
        let cx = PagingContext::new(&memory, EncryptionMask::NONE, PagingPolicy::default());
        let mut pool = PageTablePool::new(BumpPageAllocator::new(0x20_0000, 0x60_0000));
        let mut cpu = FakeCpu::new();

        let root = cx
            .create_identity_mapping_page_tables(&mut pool, &mut cpu, 30, false)
            .unwrap();
        let pdpt = cx.mapper.table_mut(root).get(0).address(EncryptionMask::NONE);

        let next = pool.allocate_page_table_memory(511).unwrap().unwrap();
        let block = *pool.head().unwrap();
        assert_eq!(next, block.base() + PAGE_SIZE);

        cx.set_page_table_pool_read_only(&mut pool, pdpt, block.base(), false)
            .unwrap();
        let hit = cx.query(pdpt, block.base(), false).unwrap();
        assert_eq!(hit.level, PagingLevel::Pd);
        assert!(!hit.entry.writable());
    }
}
