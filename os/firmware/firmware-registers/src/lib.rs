//! # Typed x86-64 Control Registers for Paging Setup
//!
//! Only the registers the page-table engine touches are modeled:
//!
//! - [`Cr0`](cr0::Cr0): the **WP** (write protect) bit decides whether supervisor
//!   code may write to read-only pages. It has to be cleared while the firmware
//!   marks its own page tables read-only.
//! - [`Efer`](efer::Efer): the **NXE** bit enables the no-execute bit in page-table
//!   entries.
//!
//! Register access is privileged, so loading and storing goes through the
//! unsafe [`LoadRegisterUnsafe`] / [`StoreRegisterUnsafe`] traits. The inline
//! assembly is only compiled with the `asm` feature on `x86_64`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr0;
pub mod efer;

pub use cr0::Cr0;
pub use efer::Efer;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must run at CPL0; reading control registers and MSRs from
    /// any other privilege level raises `#GP`.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must run at CPL0 and the stored value must describe a CPU
    /// state that is consistent with the currently executing code
    /// (e.g. clearing `CR0.PG` while paging is in use is fatal).
    unsafe fn store_unsafe(self);
}
