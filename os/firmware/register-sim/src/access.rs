use crate::{RegisterError, RegisterSpace, byte_enable_mask};
use log::{error, trace};

/// Access widths a driver may use, in bytes.
const WIDTHS: [u8; 4] = [1, 2, 4, 8];

/// One dword-sized piece of a wider or unaligned access.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Chunk {
    /// Dword-aligned register address.
    dword: u64,
    /// Lanes of `dword` taking part.
    byte_enable: u8,
    /// First lane taking part.
    lane: u32,
    /// Position of the chunk's lowest byte within the access.
    shift: u32,
    /// Bytes in this chunk.
    len: u32,
}

/// Iterate the dwords touched by `width` bytes at `address`.
fn chunks(address: u64, width: u8) -> impl Iterator<Item = Chunk> {
    let width = u32::from(width);
    let mut done = 0;
    core::iter::from_fn(move || {
        if done >= width {
            return None;
        }
        let at = address + u64::from(done);
        #[allow(clippy::cast_possible_truncation)]
        let lane = (at & 0b11) as u32;
        let len = (4 - lane).min(width - done);
        #[allow(clippy::cast_possible_truncation)]
        let byte_enable = (((1_u32 << len) - 1) << lane) as u8;
        let chunk = Chunk {
            dword: at & !0b11,
            byte_enable,
            lane,
            shift: done * 8,
            len,
        };
        done += len;
        Some(chunk)
    })
}

/// Performs byte, word, dword and qword accesses at any alignment on top of a
/// [`RegisterSpace`].
#[derive(Debug, Clone)]
pub struct RegisterAccess<S> {
    space: S,
    strict: bool,
}

impl<S: RegisterSpace> RegisterAccess<S> {
    /// Accesses to unmapped registers are passed through to `space`.
    #[must_use]
    pub const fn new(space: S) -> Self {
        Self {
            space,
            strict: false,
        }
    }

    /// Accesses touching an unmapped register fail with
    /// [`RegisterError::Unmapped`] before any register is touched.
    #[must_use]
    pub const fn strict(space: S) -> Self {
        Self {
            space,
            strict: true,
        }
    }

    #[must_use]
    pub const fn space(&self) -> &S {
        &self.space
    }

    pub const fn space_mut(&mut self) -> &mut S {
        &mut self.space
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.space
    }

    fn check(&self, address: u64, width: u8) -> Result<(), RegisterError> {
        if !WIDTHS.contains(&width) {
            error!("Rejected {width}-byte register access at {address:#x}");
            return Err(RegisterError::UnsupportedWidth(width));
        }
        if self.strict
            && let Some(chunk) = chunks(address, width).find(|c| !self.space.is_mapped(c.dword))
        {
            error!("Rejected {width}-byte access at {address:#x}: {:#x} is unmapped", chunk.dword);
            return Err(RegisterError::Unmapped {
                address: chunk.dword,
            });
        }
        Ok(())
    }

    /// Read `width` bytes at `address`, little endian.
    ///
    /// # Errors
    /// [`RegisterError::UnsupportedWidth`] unless `width` is 1, 2, 4 or 8;
    /// [`RegisterError::Unmapped`] in strict mode.
    pub fn read(&mut self, address: u64, width: u8) -> Result<u64, RegisterError> {
        self.check(address, width)?;
        let mut value = 0_u64;
        for chunk in chunks(address, width) {
            let raw = self.space.read(chunk.dword, chunk.byte_enable);
            let part = (raw & byte_enable_mask(chunk.byte_enable)) >> (chunk.lane * 8);
            value |= u64::from(part) << chunk.shift;
        }
        trace!("read  {width} bytes at {address:#x} = {value:#x}");
        Ok(value)
    }

    /// Write the low `width` bytes of `value` to `address`, little endian.
    ///
    /// Bytes of the affected registers outside the access keep their value.
    ///
    /// # Errors
    /// See [`read`](Self::read).
    pub fn write(&mut self, address: u64, width: u8, value: u64) -> Result<(), RegisterError> {
        self.check(address, width)?;
        for chunk in chunks(address, width) {
            let bits = (value >> chunk.shift) & ((1_u64 << (chunk.len * 8)) - 1);
            #[allow(clippy::cast_possible_truncation)]
            let part = (bits as u32) << (chunk.lane * 8);
            self.space.write(chunk.dword, chunk.byte_enable, part);
        }
        trace!("write {width} bytes at {address:#x} = {value:#x}");
        Ok(())
    }
}
