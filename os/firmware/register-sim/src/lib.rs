//! # Register Access Simulation
//!
//! Device models expose their registers as a dword-granular [`RegisterSpace`]:
//! each access names a dword-aligned address and a 4-bit *byte enable* that
//! selects the byte lanes taking part. [`RegisterAccess`] turns the accesses a
//! driver makes (1, 2, 4 or 8 bytes at any byte address) into that form:
//!
//! ```text
//!  write 4 bytes at 0x1006
//!
//!   dword 0x1004 │ ·· │ ·· │ b0 │ b1 │   byte enable 0b1100
//!   dword 0x1008 │ b2 │ b3 │ ·· │ ·· │   byte enable 0b0011
//! ```
//!
//! Lanes that are not enabled keep their value, so every partial write is a
//! read-modify-write of the enclosing register. [`LocalRegisterSpace`] is a
//! simple register file implementing that behaviour.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod access;
mod local;

pub use crate::access::RegisterAccess;
pub use crate::local::{LocalRegisterSpace, Register};

/// Byte enable selecting all four lanes of a dword.
pub const ALL_LANES: u8 = 0b1111;

/// Errors reported by register accesses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("unsupported access width of {0} bytes")]
    UnsupportedWidth(u8),
    #[error("no register at {address:#x}")]
    Unmapped { address: u64 },
    #[error("register address {address:#x} is not dword aligned")]
    Misaligned { address: u64 },
}

/// A dword-granular register file.
pub trait RegisterSpace {
    /// Read the dword at `address` (dword aligned). Lanes outside
    /// `byte_enable` read as zero.
    fn read(&mut self, address: u64, byte_enable: u8) -> u32;

    /// Write the lanes of `value` selected by `byte_enable` to the dword at
    /// `address` (dword aligned). Other lanes are left alone.
    fn write(&mut self, address: u64, byte_enable: u8, value: u32);

    /// `true` if a register decodes at `address`.
    fn is_mapped(&self, address: u64) -> bool {
        let _ = address;
        true
    }
}

/// Expand a byte enable into a mask covering the enabled lanes.
///
/// ```
/// assert_eq!(register_sim::byte_enable_mask(0b0110), 0x00FF_FF00);
/// ```
#[must_use]
pub const fn byte_enable_mask(byte_enable: u8) -> u32 {
    let mut mask = 0;
    let mut lane = 0;
    while lane < 4 {
        if byte_enable & (1 << lane) != 0 {
            mask |= 0xFF << (lane * 8);
        }
        lane += 1;
    }
    mask
}
