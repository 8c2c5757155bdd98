//! # Page-Table Pool
//!
//! Page tables are carved out of large, aligned blocks instead of being
//! allocated one page at a time. Keeping all tables inside a few pool units
//! means the whole set can later be write-protected by clearing `R/W` on a
//! handful of 2 MiB mappings.
//!
//! ## Layout of a block
//!
//! ```text
//!  base                base + offset                      base + size
//!   │ header page │ tables handed out │      free pages       │
//!   └─────────────┴───────────────────┴───────────────────────┘
//! ```
//!
//! - `base` is aligned to the pool unit, `size` is a multiple of it.
//! - `offset + free_pages * PAGE_SIZE == size` at all times.
//! - The first page is reserved as the block header.
//!
//! ## The ring
//!
//! Blocks form a ring. A new block is grafted in right after the current head
//! and becomes the head; allocations are always served from the head. The ring
//! is stored as an owning `Vec` with `next` indices, blocks are never freed.

use crate::addresses::PhysicalAddress;
use crate::info::{PAGE_SIZE, PAGE_TABLE_POOL_UNIT_SIZE};
use alloc::vec::Vec;
use log::{debug, error};

/// Source of aligned, physically contiguous pages for pool blocks.
pub trait PageAllocator {
    /// Allocate `pages` contiguous 4 KiB pages whose base is a multiple of `alignment`.
    ///
    /// The memory may hold arbitrary contents. Returns `None` when exhausted.
    fn allocate_aligned_pages(&mut self, pages: u64, alignment: u64) -> Option<PhysicalAddress>;
}

/// Bookkeeping of one pool block.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PoolBlock {
    base: PhysicalAddress,
    offset: u64,
    free_pages: u64,
    next: usize,
}

impl PoolBlock {
    /// First byte of the block (also the header page).
    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Bytes already carved out, header included.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Whole pages still available.
    #[inline]
    #[must_use]
    pub const fn free_pages(&self) -> u64 {
        self.free_pages
    }

    /// Total block size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.offset + self.free_pages * PAGE_SIZE
    }
}

/// Errors from the page-table pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("out of page-table pool memory ({pages} pages requested)")]
    OutOfPoolMemory { pages: u64 },
    #[error("page allocator returned {address}, not aligned to {alignment:#x}")]
    MisalignedBlock {
        address: PhysicalAddress,
        alignment: u64,
    },
    #[error("invalid pool unit size {0:#x}")]
    InvalidUnitSize(u64),
}

/// Ring of page-table pool blocks.
#[derive(Debug)]
pub struct PageTablePool<A> {
    allocator: A,
    blocks: Vec<PoolBlock>,
    head: Option<usize>,
    unit_size: u64,
}

impl<A: PageAllocator> PageTablePool<A> {
    /// Empty pool with the default 2 MiB unit.
    #[must_use]
    pub const fn new(allocator: A) -> Self {
        Self {
            allocator,
            blocks: Vec::new(),
            head: None,
            unit_size: PAGE_TABLE_POOL_UNIT_SIZE,
        }
    }

    /// Empty pool with a custom unit (and alignment) of `unit_size` bytes.
    ///
    /// A unit never spans more than one page-directory entry, so the walker
    /// always finds all of its entries in a single table.
    ///
    /// # Errors
    /// [`PoolError::InvalidUnitSize`] unless `unit_size` is a power of two
    /// between one page and 2 MiB.
    pub fn with_unit_size(allocator: A, unit_size: u64) -> Result<Self, PoolError> {
        if !unit_size.is_power_of_two()
            || !(PAGE_SIZE..=PAGE_TABLE_POOL_UNIT_SIZE).contains(&unit_size)
        {
            return Err(PoolError::InvalidUnitSize(unit_size));
        }
        Ok(Self {
            unit_size,
            ..Self::new(allocator)
        })
    }

    /// Granularity and alignment of pool blocks in bytes.
    #[inline]
    #[must_use]
    pub const fn unit_size(&self) -> u64 {
        self.unit_size
    }

    #[inline]
    #[must_use]
    pub const fn unit_pages(&self) -> u64 {
        self.unit_size / PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The block allocations are currently served from.
    #[must_use]
    pub fn head(&self) -> Option<&PoolBlock> {
        self.head.map(|h| &self.blocks[h])
    }

    /// All blocks in ring order, starting at the head.
    pub fn blocks(&self) -> impl Iterator<Item = &PoolBlock> {
        self.ring().into_iter().map(|i| &self.blocks[i])
    }

    /// Block indices in ring order from the head. Taken as a snapshot so the
    /// ring can grow while the caller walks it.
    pub(crate) fn ring(&self) -> Vec<usize> {
        let Some(head) = self.head else {
            return Vec::new();
        };
        let mut ring = Vec::with_capacity(self.blocks.len());
        let mut current = head;
        loop {
            ring.push(current);
            current = self.blocks[current].next;
            if current == head {
                break;
            }
        }
        ring
    }

    pub(crate) fn block(&self, index: usize) -> &PoolBlock {
        &self.blocks[index]
    }

    /// Graft a new block large enough for `pages` pages onto the ring and make
    /// it the head.
    ///
    /// The request grows by one header page and is rounded up to whole units.
    pub(crate) fn initialize_pool(&mut self, pages: u64) -> Result<(), PoolError> {
        let unit_pages = self.unit_pages();
        let pool_pages = (pages + 1).div_ceil(unit_pages) * unit_pages;

        let Some(base) = self
            .allocator
            .allocate_aligned_pages(pool_pages, self.unit_size)
        else {
            error!("Unable to allocate {pool_pages} pages for the page-table pool");
            return Err(PoolError::OutOfPoolMemory { pages: pool_pages });
        };
        if !base.is_aligned_to(self.unit_size) {
            error!(
                "Page-table pool block at {base} is not aligned to {:#x}",
                self.unit_size
            );
            return Err(PoolError::MisalignedBlock {
                address: base,
                alignment: self.unit_size,
            });
        }

        let index = self.blocks.len();
        let next = self.head.map_or(index, |h| self.blocks[h].next);
        self.blocks.push(PoolBlock {
            base,
            offset: PAGE_SIZE,
            free_pages: pool_pages - 1,
            next,
        });
        if let Some(h) = self.head {
            self.blocks[h].next = index;
        }
        self.head = Some(index);

        debug!(
            "Page-table pool block #{index} at {base}, {pool_pages} pages ({} blocks in ring)",
            self.blocks.len()
        );
        Ok(())
    }

    /// Carve `pages` pages for page tables out of the pool.
    ///
    /// A request for zero pages is a no-op and yields `Ok(None)`. If the head
    /// block cannot satisfy the request a new block is grafted first; the
    /// remainder of the old head is left unused.
    ///
    /// # Errors
    /// [`PoolError::OutOfPoolMemory`] if a new block was needed and the page
    /// allocator could not provide it. There is no retry.
    pub fn allocate_page_table_memory(
        &mut self,
        pages: u64,
    ) -> Result<Option<PhysicalAddress>, PoolError> {
        if pages == 0 {
            return Ok(None);
        }

        if self.head().is_none_or(|head| head.free_pages < pages) {
            self.initialize_pool(pages)?;
        }

        let Some(h) = self.head else {
            return Err(PoolError::OutOfPoolMemory { pages });
        };
        let head = &mut self.blocks[h];
        let address = head.base + head.offset;
        head.offset += pages * PAGE_SIZE;
        head.free_pages -= pages;
        Ok(Some(address))
    }
}
