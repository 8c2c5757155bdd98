//! # Split Policy
//!
//! Three boot-time switches decide where the identity map must use small pages:
//!
//! - **NULL detection** unmaps page 0, so the 4 KiB page at address 0 needs its own entry.
//! - **Stack guard** unmaps the lowest page of the boot stack.
//! - **NX for stack** marks every page of the boot stack no-execute.
//!
//! A large page is split whenever one of them has to act on part of it.

use crate::addresses::PhysicalAddress;
use bitfield_struct::bitfield;

/// Platform NULL-pointer-detection property byte.
#[bitfield(u8)]
#[derive(Eq, PartialEq)]
pub struct NullDetectionMask {
    /// Detect NULL dereferences outside SMM (bit 0).
    pub enabled: bool,
    /// Detect NULL dereferences inside SMM (bit 1).
    pub smm: bool,
    #[bits(5)]
    __reserved: u8,
    /// Turn detection off again at end of DXE (bit 7).
    pub disable_end_of_dxe: bool,
}

/// Location of the boot stack.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct StackGeometry {
    /// Lowest byte of the stack; the guard page when the stack guard is on.
    pub base: PhysicalAddress,
    /// Stack size in bytes.
    pub size: u64,
}

impl StackGeometry {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysicalAddress, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the highest stack byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u64().saturating_add(self.size)
    }

    /// `true` if `address` lies inside the stack.
    #[inline]
    #[must_use]
    pub const fn contains(&self, address: PhysicalAddress) -> bool {
        address.as_u64() >= self.base.as_u64() && address.as_u64() < self.end()
    }

    /// `true` if `[address, address + size)` shares a byte with the stack.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, address: PhysicalAddress, size: u64) -> bool {
        address.as_u64() < self.end() && address.as_u64().saturating_add(size) > self.base.as_u64()
    }
}

/// Boot-time inputs that shape the identity map.
///
/// The default disables every feature, which yields a map of only large pages.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PagingPolicy {
    pub null_detection: NullDetectionMask,
    pub stack_guard: bool,
    pub nx_for_stack: bool,
    pub stack: StackGeometry,
}

impl PagingPolicy {
    /// `true` if page 0 is to be left unmapped.
    #[inline]
    #[must_use]
    pub const fn null_detection_enabled(&self) -> bool {
        self.null_detection.enabled()
    }

    /// `true` if the 4 KiB page at `address` stays non-present.
    #[inline]
    #[must_use]
    pub const fn is_unmapped_page(&self, address: PhysicalAddress) -> bool {
        (self.null_detection_enabled() && address.as_u64() == 0)
            || (self.stack_guard && address.as_u64() == self.stack.base.as_u64())
    }

    /// `true` if the 4 KiB page at `address` gets the no-execute bit.
    #[inline]
    #[must_use]
    pub const fn is_no_execute_page(&self, address: PhysicalAddress) -> bool {
        self.nx_for_stack && self.stack.contains(address)
    }

    /// Decide whether the large page `[address, address + size)` must be split.
    ///
    /// True if page 0 is in it under NULL detection, if the stack base is in
    /// it under the stack guard, or if it overlaps the stack under NX-for-stack.
    #[must_use]
    pub const fn to_split_page_table(&self, address: PhysicalAddress, size: u64) -> bool {
        if self.null_detection_enabled() && address.as_u64() == 0 {
            return true;
        }

        if self.stack_guard {
            let base = self.stack.base.as_u64();
            if base >= address.as_u64() && base < address.as_u64().saturating_add(size) {
                return true;
            }
        }

        self.nx_for_stack && self.stack.overlaps(address, size)
    }
}
