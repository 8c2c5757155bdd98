use crate::{RegisterError, RegisterSpace, byte_enable_mask};
use alloc::collections::BTreeMap;
use log::{error, trace};

/// One simulated 32-bit register.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Register {
    value: u32,
    reset: u32,
    writable: u32,
    write_one_to_clear: u32,
}

impl Register {
    /// Register whose every bit is writable.
    #[must_use]
    pub const fn read_write(reset: u32) -> Self {
        Self {
            value: reset,
            reset,
            writable: u32::MAX,
            write_one_to_clear: 0,
        }
    }

    /// Register that ignores writes.
    #[must_use]
    pub const fn read_only(reset: u32) -> Self {
        Self {
            writable: 0,
            ..Self::read_write(reset)
        }
    }

    /// Restrict plain writes to the bits in `mask`.
    #[must_use]
    pub const fn with_writable_mask(self, mask: u32) -> Self {
        Self {
            writable: mask,
            ..self
        }
    }

    /// Bits in `mask` are cleared by writing 1 and unaffected by writing 0.
    #[must_use]
    pub const fn with_write_one_to_clear(self, mask: u32) -> Self {
        Self {
            write_one_to_clear: mask,
            ..self
        }
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }

    const fn apply(&mut self, lanes: u32, value: u32) {
        let plain = self.writable & !self.write_one_to_clear & lanes;
        let clear = self.write_one_to_clear & lanes & value;
        self.value = ((self.value & !plain) | (value & plain)) & !clear;
    }
}

/// Register file backed by a map of dword addresses to [`Register`]s.
///
/// Addresses without a register behave like an empty bus: reads return all
/// ones and writes are dropped. Both are logged as errors.
#[derive(Debug, Default, Clone)]
pub struct LocalRegisterSpace {
    registers: BTreeMap<u64, Register>,
}

impl LocalRegisterSpace {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registers: BTreeMap::new(),
        }
    }

    /// Place `register` at `address`, replacing any register already there.
    ///
    /// # Errors
    /// [`RegisterError::Misaligned`] if `address` is not a multiple of four.
    pub fn map(&mut self, address: u64, register: Register) -> Result<(), RegisterError> {
        if address & 0b11 != 0 {
            return Err(RegisterError::Misaligned { address });
        }
        self.registers.insert(address, register);
        Ok(())
    }

    /// Builder form of [`map`](Self::map).
    ///
    /// # Errors
    /// See [`map`](Self::map).
    pub fn with(mut self, address: u64, register: Register) -> Result<Self, RegisterError> {
        self.map(address, register)?;
        Ok(self)
    }

    /// Current value of the register at `address`, without side effects.
    #[must_use]
    pub fn peek(&self, address: u64) -> Option<u32> {
        self.registers.get(&address).map(Register::value)
    }

    /// Return every register to its reset value.
    pub fn reset(&mut self) {
        for register in self.registers.values_mut() {
            register.value = register.reset;
        }
    }
}

impl RegisterSpace for LocalRegisterSpace {
    fn read(&mut self, address: u64, byte_enable: u8) -> u32 {
        let lanes = byte_enable_mask(byte_enable);
        if let Some(register) = self.registers.get(&address) {
            let value = register.value & lanes;
            trace!("read  {address:#x} [{byte_enable:04b}] = {value:#010x}");
            value
        } else {
            error!("Read from unmapped register {address:#x} [{byte_enable:04b}]");
            lanes
        }
    }

    fn write(&mut self, address: u64, byte_enable: u8, value: u32) {
        let lanes = byte_enable_mask(byte_enable);
        if let Some(register) = self.registers.get_mut(&address) {
            register.apply(lanes, value);
            trace!(
                "write {address:#x} [{byte_enable:04b}] {value:#010x} -> {:#010x}",
                register.value
            );
        } else {
            error!("Write of {value:#010x} to unmapped register {address:#x} dropped");
        }
    }

    fn is_mapped(&self, address: u64) -> bool {
        self.registers.contains_key(&address)
    }
}
