//! Page-table pool backing store on top of UEFI boot services.

use crate::addresses::PhysicalAddress;
use crate::info::PAGE_SIZE;
use crate::pool::PageAllocator;
use core::ptr::NonNull;
use log::warn;
use uefi::boot::{self, AllocateType, MemoryType};

/// Aligned page allocator using `AllocatePages`/`FreePages`.
///
/// Boot services only guarantee 4 KiB alignment, so larger alignments are
/// served by over-allocating and returning the unaligned head and tail.
#[derive(Debug, Copy, Clone)]
pub struct UefiPageAllocator {
    memory_type: MemoryType,
}

impl UefiPageAllocator {
    #[must_use]
    pub const fn new(memory_type: MemoryType) -> Self {
        Self { memory_type }
    }
}

impl Default for UefiPageAllocator {
    fn default() -> Self {
        Self::new(MemoryType::BOOT_SERVICES_DATA)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn free(address: u64, pages: u64) {
    if pages == 0 {
        return;
    }
    if let Some(ptr) = NonNull::new(address as usize as *mut u8) {
        // SAFETY: the range was returned by `allocate_pages` and is not in use.
        if unsafe { boot::free_pages(ptr, pages as usize) }.is_err() {
            warn!("Failed to release {pages} pages at {address:#x}");
        }
    }
}

impl PageAllocator for UefiPageAllocator {
    #[allow(clippy::cast_possible_truncation)]
    fn allocate_aligned_pages(&mut self, pages: u64, alignment: u64) -> Option<PhysicalAddress> {
        let alignment = alignment.max(PAGE_SIZE);
        let slack = if alignment > PAGE_SIZE {
            alignment / PAGE_SIZE
        } else {
            0
        };

        let total = pages + slack;
        let ptr = boot::allocate_pages(AllocateType::AnyPages, self.memory_type, total as usize)
            .ok()?;
        let start = PhysicalAddress::from_nonnull(ptr).as_u64();
        let aligned = start.next_multiple_of(alignment);

        let head = (aligned - start) / PAGE_SIZE;
        let tail = slack - head;
        free(start, head);
        free(aligned + pages * PAGE_SIZE, tail);

        Some(PhysicalAddress::new(aligned))
    }
}
