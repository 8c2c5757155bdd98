//! # Paging Context
//!
//! Everything that stays fixed while one set of page tables is built and
//! protected: how to reach physical memory, the encryption mask, and the split
//! policy. The page-table pool is not part of it and is threaded
//! through every call as `&mut PageTablePool`.

use crate::addresses::{EncryptionMask, PhysicalAddress};
use crate::error::PagingError;
use crate::page_table::{PageTableEntry, PagingLevel};
use crate::phys_mapper::PhysMapper;
use crate::policy::PagingPolicy;
use crate::pool::{PageAllocator, PageTablePool, PoolError};

/// Terminal entry found by [`PagingContext::query`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Translation {
    /// The present entry the walk ended on.
    pub entry: PageTableEntry,
    /// Level of the table holding `entry`; its entry size is the size of the mapping.
    pub level: PagingLevel,
}

impl Translation {
    /// Base of the page the entry maps, encryption mask removed.
    #[must_use]
    pub fn page_base(&self, mask: EncryptionMask) -> PhysicalAddress {
        let size = self.level.entry_size();
        PhysicalAddress::new(self.entry.address(mask).as_u64() & !(size - 1))
    }
}

/// Access to physical memory plus the encryption mask and split policy that
/// every table built or edited through it follows.
///
/// Splitting, protection and identity-map construction are methods on the
/// context; the page-table pool is passed to each of them.
pub struct PagingContext<'m, M: PhysMapper> {
    pub(crate) mapper: &'m M,
    pub(crate) mask: EncryptionMask,
    pub(crate) policy: PagingPolicy,
}

impl<'m, M: PhysMapper> PagingContext<'m, M> {
    #[must_use]
    pub const fn new(mapper: &'m M, mask: EncryptionMask, policy: PagingPolicy) -> Self {
        Self {
            mapper,
            mask,
            policy,
        }
    }

    /// The mask ORed into every address this context writes.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> EncryptionMask {
        self.mask
    }

    /// Take one page for a new table from the pool.
    pub(crate) fn allocate_table<A: PageAllocator>(
        pool: &mut PageTablePool<A>,
    ) -> Result<PhysicalAddress, PagingError> {
        pool.allocate_page_table_memory(1)?
            .ok_or(PagingError::Pool(PoolError::OutOfPoolMemory { pages: 1 }))
    }

    /// Walk the tables under `root` and return the entry that maps `address`.
    ///
    /// # Errors
    /// [`PagingError::NotMapped`] if the walk ends at a non-present entry.
    pub fn query(
        &self,
        root: PhysicalAddress,
        address: PhysicalAddress,
        level4_paging: bool,
    ) -> Result<Translation, PagingError> {
        let mut table = self.mapper.table_mut(root);
        let mut level = PagingLevel::top(level4_paging);
        loop {
            let entry = table.get(level.index_of(address));
            if !entry.present() {
                return Err(PagingError::NotMapped { address, level });
            }
            if entry.is_leaf_at(level) {
                return Ok(Translation { entry, level });
            }
            let Some(lower) = level.lower() else {
                return Ok(Translation { entry, level });
            };
            table = self.mapper.table_mut(entry.address(self.mask));
            level = lower;
        }
    }
}
