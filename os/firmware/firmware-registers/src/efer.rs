use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_EFER` (MSR `0xC000_0080`).
///
/// Only the architecturally defined low bits are named; everything above
/// bit 15 is padding; `from_bits`/`into_bits` carry it through untouched.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Efer {
    /// Bit 0: SCE: `SYSCALL`/`SYSRET` enable.
    pub syscall_enable: bool,
    #[bits(7)]
    __reserved_1_7: u8,
    /// Bit 8: LME: long mode enable.
    pub long_mode_enable: bool,
    #[bits(1)]
    __reserved_9: u8,
    /// Bit 10: LMA: long mode active (read-only).
    pub long_mode_active: bool,
    /// Bit 11: NXE: no-execute enable.
    ///
    /// Without it, bit 63 of a page-table entry is reserved and setting it
    /// raises a reserved-bit page fault.
    pub no_execute_enable: bool,
    /// Bit 12: SVME: secure virtual machine enable (AMD).
    pub svm_enable: bool,
    /// Bit 13: LMSLE: long mode segment limit enable (AMD).
    pub long_mode_segment_limit_enable: bool,
    /// Bit 14: FFXSR: fast `FXSAVE`/`FXRSTOR`.
    pub fast_fxsave: bool,
    /// Bit 15: TCE: translation cache extension.
    pub translation_cache_extension: bool,
    #[bits(48)]
    __reserved_16_63: u64,
}

impl Efer {
    /// MSR index of `IA32_EFER`.
    pub const MSR_EFER: u32 = 0xC000_0080;
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        let (lo, hi): (u32, u32);
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") Self::MSR_EFER,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        Self::from_bits((u64::from(hi) << 32) | u64::from(lo))
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Efer {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn store_unsafe(self) {
        let efer = self.into_bits();
        let lo = efer as u32;
        let hi = (efer >> 32) as u32;
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") Self::MSR_EFER,
                in("eax") lo,
                in("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nxe_is_bit_11() {
        assert_eq!(Efer::new().with_no_execute_enable(true).into_bits(), 1 << 11);
    }

    #[test]
    fn upper_bits_survive_modification() {
        let raw = (1_u64 << 40) | (1 << 10) | (1 << 8);
        let efer = Efer::from_bits(raw).with_no_execute_enable(true);
        assert!(efer.long_mode_active());
        assert_eq!(efer.into_bits(), raw | (1 << 11));
    }
}
