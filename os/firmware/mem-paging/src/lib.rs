//! # Firmware Page Tables
//!
//! x86-64 page-table management for the firmware phase that hands an identity
//! map to the next boot stage:
//!
//! - A [`PageTablePool`] that carves page tables out of large aligned blocks.
//! - Splitting of 1 GiB and 2 MiB pages where the [`PagingPolicy`] needs 4 KiB
//!   granularity (NULL page, stack guard page, no-execute stack).
//! - Self-protection: the pages holding the tables are mapped read-only with
//!   `CR0.WP` briefly lifted while the tables edit their own mapping.
//! - An [`EncryptionMask`] that confidential guests OR into every address
//!   stored in an entry.
//!
//! ## Flow
//!
//! ```text
//!  create_identity_mapping_page_tables
//!   ├─► allocate_page_table_memory ──► initialize_pool (grafts a block)
//!   ├─► to_split_page_table ─► split_1g_page_to_2m ─► split_2m_page_to_4k
//!   └─► enable_page_table_protection
//!         └─► set_page_table_pool_read_only (per pool unit, may split)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use mem_paging::{
//!     EncryptionMask, HardwareCpu, IdentityMapper, PageAllocator, PageTablePool,
//!     PagingContext, PagingPolicy, PhysicalAddress,
//! };
//!
//! # struct Firmware;
//! # impl PageAllocator for Firmware {
//! #     fn allocate_aligned_pages(&mut self, _: u64, _: u64) -> Option<PhysicalAddress> { None }
//! # }
//! let mut pool = PageTablePool::new(Firmware);
//! let cx = PagingContext::new(&IdentityMapper, EncryptionMask::NONE, PagingPolicy::default());
//! // SAFETY: runs at CPL0 in the firmware.
//! let mut cpu = unsafe { HardwareCpu::new() };
//! let root = cx.create_identity_mapping_page_tables(&mut pool, &mut cpu, 39, true)?;
//! # Ok::<(), mem_paging::PagingError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod addresses;
mod context;
pub mod cpu;
mod error;
mod identity;
pub mod info;
mod page_table;
mod phys_mapper;
mod policy;
mod pool;
mod protect;
mod split;
#[cfg(test)]
mod test_support;
#[cfg(feature = "uefi")]
mod uefi_alloc;

pub use crate::addresses::{EncryptionMask, PageSize, PhysicalAddress, Size1G, Size2M, Size4K};
pub use crate::context::{PagingContext, Translation};
#[cfg(target_arch = "x86_64")]
pub use crate::cpu::HardwareCpu;
pub use crate::cpu::{CpuControl, WriteProtectSuspended};
pub use crate::error::PagingError;
pub use crate::page_table::{
    NO_EXECUTE_BIT, PAGE_SIZE_BIT, PRESENT_BIT, PageTable, PageTableEntry, PagingLevel,
    WRITABLE_BIT,
};
pub use crate::phys_mapper::{IdentityMapper, PhysMapper};
pub use crate::policy::{NullDetectionMask, PagingPolicy, StackGeometry};
pub use crate::pool::{PageAllocator, PageTablePool, PoolBlock, PoolError};
#[cfg(feature = "uefi")]
pub use crate::uefi_alloc::UefiPageAllocator;
