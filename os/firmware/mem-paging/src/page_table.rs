//! # Page-Table Entries and Tables
//!
//! One entry layout serves every level. The hardware distinguishes the two
//! roles of an entry by the **PS** bit (bit 7):
//!
//! - `PS=0`: the address field points at the next-level table.
//! - `PS=1`: the entry is a terminal 1 GiB (PDPTE) or 2 MiB (PDE) mapping.
//!
//! At level 1 bit 7 is PAT and every entry is terminal, which is why the
//! walk asks [`PageTableEntry::is_leaf_at`] instead of reading `PS` directly.
//!
//! Every address stored in an entry carries the [`EncryptionMask`]. Use
//! [`PageTableEntry::address`] to get the plain physical address back.

use crate::addresses::{EncryptionMask, PageSize, PhysicalAddress, Size1G, Size2M, Size4K};
use crate::info::{ENTRIES_PER_TABLE, TABLE_INDEX_MASK};
use bitfield_struct::bitfield;

/// Present bit (bit 0).
pub const PRESENT_BIT: u64 = 1 << 0;

/// Read/write bit (bit 1).
pub const WRITABLE_BIT: u64 = 1 << 1;

/// Page-size bit (bit 7) on PDPTEs and PDEs.
pub const PAGE_SIZE_BIT: u64 = 1 << 7;

/// No-execute bit (bit 63).
pub const NO_EXECUTE_BIT: u64 = 1 << 63;

/// A 64-bit x86-64 paging-structure entry.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageTableEntry {
    /// Present (bit 0).
    pub present: bool,
    /// Read/write (bit 1). Clear means read-only once `CR0.WP` is set.
    pub writable: bool,
    /// User/supervisor (bit 2).
    pub user: bool,
    /// Page-level write-through (bit 3).
    pub write_through: bool,
    /// Page-level cache disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6), leaves only.
    pub dirty: bool,
    /// Page size (bit 7) on PDPTE/PDE; PAT on a PTE.
    pub page_size: bool,
    /// Global (bit 8), leaves only.
    pub global: bool,
    /// Ignored by hardware (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,
    /// Address bits 51:12, including the encryption bit.
    #[bits(40)]
    address_51_12: u64,
    /// Ignored by hardware / protection key (bits 52..62).
    #[bits(11)]
    pub os_available_high: u16,
    /// No-execute (bit 63).
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Non-leaf entry pointing at the table at `table`, present and writable.
    #[inline]
    #[must_use]
    pub const fn table(table: PhysicalAddress, mask: EncryptionMask) -> Self {
        Self::from_bits(mask.apply(table) | PRESENT_BIT | WRITABLE_BIT)
    }

    /// Present, writable large-page leaf (`PS=1`) for a 1 GiB or 2 MiB page.
    #[inline]
    #[must_use]
    pub const fn large_page(base: PhysicalAddress, mask: EncryptionMask) -> Self {
        Self::from_bits(mask.apply(base) | PRESENT_BIT | WRITABLE_BIT | PAGE_SIZE_BIT)
    }

    /// Writable 4 KiB leaf. Presence is left to the caller.
    #[inline]
    #[must_use]
    pub const fn page_4k(base: PhysicalAddress, mask: EncryptionMask) -> Self {
        Self::from_bits(mask.apply(base) | WRITABLE_BIT)
    }

    /// Physical address held by the entry with flags and `mask` removed.
    ///
    /// For a table pointer this is the next-level table; for a leaf it is the
    /// page base (plus PAT bit 12 on large pages, see [`leaf_base`](Self::leaf_base)).
    #[inline]
    #[must_use]
    pub const fn address(self, mask: EncryptionMask) -> PhysicalAddress {
        PhysicalAddress::new(mask.strip(self.address_51_12() << 12))
    }

    /// Base of the page mapped by a leaf of size `S`.
    #[inline]
    #[must_use]
    pub const fn leaf_base<S: PageSize>(self, mask: EncryptionMask) -> PhysicalAddress {
        PhysicalAddress::new(mask.strip(self.address_51_12() << 12) & !(S::SIZE - 1))
    }

    /// `true` if this entry terminates the walk at `level`.
    #[inline]
    #[must_use]
    pub const fn is_leaf_at(self, level: PagingLevel) -> bool {
        matches!(level, PagingLevel::Pt) || self.page_size()
    }
}

/// The four x86-64 paging levels, numbered like the hardware manuals.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PagingLevel {
    /// Level 1: page table, 4 KiB entries.
    Pt = 1,
    /// Level 2: page directory, 2 MiB entries.
    Pd = 2,
    /// Level 3: page-directory-pointer table, 1 GiB entries.
    Pdpt = 3,
    /// Level 4: PML4, 512 GiB entries.
    Pml4 = 4,
}

impl PagingLevel {
    /// Top level for the given paging mode.
    ///
    /// Without 4-level paging the walk starts at the PDPT (PAE layout).
    #[inline]
    #[must_use]
    pub const fn top(level4_paging: bool) -> Self {
        if level4_paging { Self::Pml4 } else { Self::Pdpt }
    }

    /// Bit position of this level's index in an address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pt => Size4K::SHIFT,
            Self::Pd => Size2M::SHIFT,
            Self::Pdpt => Size1G::SHIFT,
            Self::Pml4 => 39,
        }
    }

    /// Bytes covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_size(self) -> u64 {
        1 << self.shift()
    }

    /// Next level down, `None` below the page table.
    #[inline]
    #[must_use]
    pub const fn lower(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    /// Index of `address` in a table of this level.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, address: PhysicalAddress) -> usize {
        ((address.as_u64() >> self.shift()) & TABLE_INDEX_MASK) as usize
    }
}

/// One 4 KiB page table: 512 entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    #[inline]
    pub const fn entry_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }
}
