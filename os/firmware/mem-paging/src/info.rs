//! # Paging Constants
//!
//! Sizes and masks shared by the pool, the splitters and the walker.

/// Size of a 4 KiB page (and of every page table).
pub const PAGE_SIZE: u64 = 0x1000;

/// Number of 64-bit entries in one page table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Mask applied to an address shifted down by a level's shift to get the table index.
pub const TABLE_INDEX_MASK: u64 = 0x1FF;

/// Default granularity of a page-table pool block (2 MiB).
pub const PAGE_TABLE_POOL_UNIT_SIZE: u64 = 0x20_0000;

/// Physical address bits 51:30 (1 GiB leaves).
pub const ADDRESS_MASK_1G: u64 = 0x000F_FFFF_C000_0000;
