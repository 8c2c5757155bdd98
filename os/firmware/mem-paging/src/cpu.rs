//! # CPU Control
//!
//! The few privileged CPU knobs the engine turns, behind a trait so the page
//! tables can be built and protected against a fake CPU in tests.

/// Privileged CPU state used while building and protecting page tables.
pub trait CpuControl {
    /// Current value of `CR0.WP`.
    fn write_protect_enabled(&self) -> bool;

    /// Set or clear `CR0.WP`, leaving every other `CR0` bit untouched.
    fn set_write_protect(&mut self, enabled: bool);

    /// Set `EFER.NXE` so the no-execute bit in entries takes effect.
    fn enable_execute_disable(&mut self);
}

/// Keeps `CR0.WP` cleared for as long as it lives.
///
/// Dropping the guard sets `CR0.WP` again, whatever its value was on entry.
pub struct WriteProtectSuspended<'c, C: CpuControl + ?Sized> {
    cpu: &'c mut C,
}

impl<'c, C: CpuControl + ?Sized> WriteProtectSuspended<'c, C> {
    #[must_use = "write protection comes back when the guard is dropped"]
    pub fn new(cpu: &'c mut C) -> Self {
        cpu.set_write_protect(false);
        Self { cpu }
    }
}

impl<C: CpuControl + ?Sized> Drop for WriteProtectSuspended<'_, C> {
    fn drop(&mut self) {
        self.cpu.set_write_protect(true);
    }
}

#[cfg(target_arch = "x86_64")]
pub use hardware::HardwareCpu;

#[cfg(target_arch = "x86_64")]
mod hardware {
    use super::CpuControl;
    use firmware_registers::{Cr0, Efer, LoadRegisterUnsafe, StoreRegisterUnsafe};

    /// The CPU this code runs on, accessed through `CR0` and `IA32_EFER`.
    #[derive(Debug)]
    pub struct HardwareCpu {
        _private: (),
    }

    impl HardwareCpu {
        /// # Safety
        /// The caller must run at CPL0 with paging enabled, and nothing else may
        /// modify `CR0` or `EFER` while the handle is in use.
        #[must_use]
        pub const unsafe fn new() -> Self {
            Self { _private: () }
        }
    }

    impl CpuControl for HardwareCpu {
        fn write_protect_enabled(&self) -> bool {
            // SAFETY: CPL0 is guaranteed by `HardwareCpu::new`.
            unsafe { Cr0::load_unsafe() }.write_protect()
        }

        fn set_write_protect(&mut self, enabled: bool) {
            // SAFETY: CPL0 is guaranteed by `HardwareCpu::new`; only WP changes.
            unsafe {
                let cr0 = Cr0::load_unsafe().with_write_protect(enabled);
                cr0.store_unsafe();
            }
        }

        fn enable_execute_disable(&mut self) {
            // SAFETY: CPL0 is guaranteed by `HardwareCpu::new`; only NXE changes.
            unsafe {
                let efer = Efer::load_unsafe();
                if !efer.no_execute_enable() {
                    efer.with_no_execute_enable(true).store_unsafe();
                }
            }
        }
    }
}
