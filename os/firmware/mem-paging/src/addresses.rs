//! # Physical Addresses, Page Sizes and the Encryption Mask
//!
//! Page tables built here are identity maps, so only physical addresses exist.
//! The [`EncryptionMask`] is the one bit a confidential guest ORs into every
//! address it stores in an entry; it has to be stripped again on the way out.

use crate::info::ADDRESS_MASK_1G;
use core::fmt;
use core::ops::{Add, AddAssign};
use core::ptr::NonNull;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the three x86-64 mapping granularities.
pub trait PageSize: sealed::Sealed + Copy + Eq + fmt::Debug {
    /// Page size in bytes.
    const SIZE: u64;
    /// log2 of [`SIZE`](Self::SIZE).
    const SHIFT: u32;
}

/// 4 KiB page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u64 = 0x1000;
    const SHIFT: u32 = 12;
}

/// 2 MiB page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Size2M;
impl sealed::Sealed for Size2M {}
impl PageSize for Size2M {
    const SIZE: u64 = 0x20_0000;
    const SHIFT: u32 = 21;
}

/// 1 GiB page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Size1G;
impl sealed::Sealed for Size1G {}
impl PageSize for Size1G {
    const SIZE: u64 = 0x4000_0000;
    const SHIFT: u32 = 30;
}

/// A physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Address of an identity-mapped pointer.
    #[inline]
    #[must_use]
    pub fn from_nonnull<T>(ptr: NonNull<T>) -> Self {
        Self(ptr.as_ptr() as usize as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// `true` if the address is a multiple of `align` (power of two).
    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Round down to a page boundary of size `S`.
    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !(S::SIZE - 1))
    }

    /// Offset of the address inside its page of size `S`.
    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#018x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Address-encryption (or TDX "shared") mask ORed into every physical address
/// stored in a page-table entry.
///
/// The raw value is clipped to the address bits a 1 GiB leaf can carry, so the
/// same mask is valid at every level.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct EncryptionMask(u64);

impl EncryptionMask {
    /// No confidential-computing marker.
    pub const NONE: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw & ADDRESS_MASK_1G)
    }

    /// Mask with only bit `position` set, e.g. the guest physical-address
    /// width minus one for TDX.
    #[inline]
    #[must_use]
    pub const fn from_bit(position: u32) -> Self {
        Self::new(1 << position)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Tag `address` with the mask.
    #[inline]
    #[must_use]
    pub const fn apply(self, address: PhysicalAddress) -> u64 {
        address.as_u64() | self.0
    }

    /// Remove the mask from a raw entry value.
    #[inline]
    #[must_use]
    pub const fn strip(self, raw: u64) -> u64 {
        raw & !self.0
    }
}

impl fmt::Debug for EncryptionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionMask({:#x})", self.0)
    }
}
