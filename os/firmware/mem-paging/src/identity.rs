//! # Identity Map Construction
//!
//! Builds the 4-level identity map the next boot phase runs on, taking every
//! table from the page-table pool, and write-protects it at the end.

use crate::addresses::{PageSize, PhysicalAddress, Size1G, Size2M};
use crate::context::PagingContext;
use crate::cpu::CpuControl;
use crate::error::PagingError;
use crate::info::{ENTRIES_PER_TABLE, PAGE_SIZE};
use crate::page_table::PageTableEntry;
use crate::phys_mapper::PhysMapper;
use crate::pool::{PageAllocator, PageTablePool, PoolError};
use log::info;

/// Widest physical address space a 4-level map can cover.
const MAX_ADDRESS_BITS: u8 = 48;

/// Narrowest address space: one page directory.
const MIN_ADDRESS_BITS: u8 = 30;

impl<M: PhysMapper> PagingContext<'_, M> {
    /// Identity-map the first `2^physical_address_bits` bytes and return the
    /// PML4 address to load into `CR3`.
    ///
    /// 1 GiB pages are used when `page_1g_support` is set (then every PDPT is
    /// filled completely), 2 MiB pages otherwise. Ranges the policy wants at a
    /// finer granularity are split. When NX-for-stack is on, `EFER.NXE` is set
    /// after the tables have been write-protected.
    ///
    /// # Errors
    /// Pool exhaustion, or [`PagingError::NotMapped`] if the pool itself lies
    /// outside the mapped range.
    pub fn create_identity_mapping_page_tables<A: PageAllocator, C: CpuControl + ?Sized>(
        &self,
        pool: &mut PageTablePool<A>,
        cpu: &mut C,
        physical_address_bits: u8,
        page_1g_support: bool,
    ) -> Result<PhysicalAddress, PagingError> {
        let bits = physical_address_bits.clamp(MIN_ADDRESS_BITS, MAX_ADDRESS_BITS);
        let (pml4_entries, pdpt_entries) = if bits <= 39 {
            (1_usize, 1_usize << (bits - 30))
        } else {
            (1_usize << (bits - 39), ENTRIES_PER_TABLE)
        };

        let table_pages = if page_1g_support {
            pml4_entries + 1
        } else {
            (pdpt_entries + 1) * pml4_entries + 1
        };
        let table_pages = table_pages as u64;

        info!(
            "Identity-mapping {bits} address bits with {} pages, {table_pages} table pages",
            if page_1g_support { "1 GiB" } else { "2 MiB" }
        );

        let mut next_table = pool
            .allocate_page_table_memory(table_pages)?
            .ok_or(PoolError::OutOfPoolMemory { pages: table_pages })?;

        let root = next_table;
        next_table += PAGE_SIZE;
        let pml4 = self.mapper.table_mut(root);

        let mut address = PhysicalAddress::new(0);
        for pml4_index in 0..pml4_entries {
            let pdpt_address = next_table;
            next_table += PAGE_SIZE;
            pml4.set(pml4_index, PageTableEntry::table(pdpt_address, self.mask));
            let pdpt = self.mapper.table_mut(pdpt_address);

            if page_1g_support {
                for index in 0..ENTRIES_PER_TABLE {
                    if self.policy.to_split_page_table(address, Size1G::SIZE) {
                        self.split_1g_page_to_2m(pool, address, pdpt.entry_mut(index))?;
                    } else {
                        pdpt.set(index, PageTableEntry::large_page(address, self.mask));
                    }
                    address += Size1G::SIZE;
                }
                continue;
            }

            for pdpt_index in 0..pdpt_entries {
                let directory_address = next_table;
                next_table += PAGE_SIZE;
                pdpt.set(pdpt_index, PageTableEntry::table(directory_address, self.mask));
                let directory = self.mapper.table_mut(directory_address);

                for index in 0..ENTRIES_PER_TABLE {
                    if self.policy.to_split_page_table(address, Size2M::SIZE) {
                        self.split_2m_page_to_4k(pool, address, directory.entry_mut(index))?;
                    } else {
                        directory.set(index, PageTableEntry::large_page(address, self.mask));
                    }
                    address += Size2M::SIZE;
                }
            }
            for index in pdpt_entries..ENTRIES_PER_TABLE {
                pdpt.set(index, PageTableEntry::new());
            }
        }
        for index in pml4_entries..ENTRIES_PER_TABLE {
            pml4.set(index, PageTableEntry::new());
        }

        self.enable_page_table_protection(pool, cpu, root, true)?;
        if self.policy.nx_for_stack {
            cpu.enable_execute_disable();
        }

        info!("Identity map ready at {root}");
        Ok(root)
    }
}
