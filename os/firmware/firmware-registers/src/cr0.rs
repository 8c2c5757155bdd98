use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// CR0 in 64-bit mode.
///
/// Reserved bits are private and default to zero. The bit that matters for
/// page-table protection is [`write_protect`](Cr0::write_protect) (bit 16).
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Cr0 {
    /// Bit 0: PE: protected mode enable.
    pub protection_enable: bool,
    /// Bit 1: MP: monitor coprocessor.
    pub monitor_coprocessor: bool,
    /// Bit 2: EM: x87 emulation.
    pub emulation: bool,
    /// Bit 3: TS: task switched.
    pub task_switched: bool,
    /// Bit 4: ET: extension type (hardwired to 1 on modern CPUs).
    pub extension_type: bool,
    /// Bit 5: NE: native x87 error reporting.
    pub numeric_error: bool,
    #[bits(10, default = 0)]
    __reserved_6_15: u16,
    /// Bit 16: WP: write protect.
    ///
    /// When set, supervisor writes to read-only pages fault. When clear,
    /// supervisor code may write to any present page regardless of `R/W`.
    pub write_protect: bool,
    #[bits(default = false)]
    __reserved_17: bool,
    /// Bit 18: AM: alignment mask.
    pub alignment_mask: bool,
    #[bits(10, default = 0)]
    __reserved_19_28: u16,
    /// Bit 29: NW: not write-through.
    pub not_write_through: bool,
    /// Bit 30: CD: cache disable.
    pub cache_disable: bool,
    /// Bit 31: PG: paging.
    pub paging: bool,
    #[bits(32, default = 0)]
    __reserved_32_63: u32,
}

impl Cr0 {
    /// Raw mask of the WP bit.
    pub const WRITE_PROTECT_BIT: u64 = 1 << 16;
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let cr0: u64;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}
