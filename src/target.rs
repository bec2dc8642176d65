//! Word size, byte order and code patching primitives.
//!
//! The relocation core never hardcodes a byte order or pointer width; every
//! read of a record field and every write into the code body goes through a
//! [`RelocationTarget`].

use crate::{Result, format_error};
use alloc::format;

/// Byte order of a relocation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Reads an unsigned integer of `bytes.len()` bytes (1, 2, 4 or 8).
    #[inline]
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        let mut value = 0u64;
        match self {
            Endian::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | b as u64;
                }
            }
            Endian::Big => {
                for &b in bytes {
                    value = (value << 8) | b as u64;
                }
            }
        }
        value
    }

    /// Writes the low `bytes.len()` bytes of `value`.
    #[inline]
    pub fn write_uint(self, bytes: &mut [u8], value: u64) {
        let len = bytes.len();
        for (i, b) in bytes.iter_mut().enumerate() {
            let shift = match self {
                Endian::Little => i * 8,
                Endian::Big => (len - 1 - i) * 8,
            };
            *b = (value >> shift) as u8;
        }
    }
}

/// Pointer width of a relocation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// The all-ones value of this width.
    #[inline]
    pub const fn all_ones(self) -> u64 {
        match self {
            PointerWidth::Bits32 => u32::MAX as u64,
            PointerWidth::Bits64 => u64::MAX,
        }
    }

    /// Truncates `value` to this width.
    #[inline]
    pub const fn truncate(self, value: u64) -> u64 {
        value & self.all_ones()
    }
}

/// A mutable view of a loaded code body.
///
/// Addresses are absolute: `base` is the address of `bytes[0]`. Every access
/// is bounds checked and reported as a format error when it falls outside
/// the body.
pub struct CodeBuffer<'a> {
    bytes: &'a mut [u8],
    base: u64,
}

impl<'a> CodeBuffer<'a> {
    pub fn new(bytes: &'a mut [u8], base: u64) -> Self {
        Self { bytes, base }
    }

    /// Gets the address of the first byte.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    fn range(&self, address: u64, len: usize) -> Result<core::ops::Range<usize>> {
        let start = address
            .checked_sub(self.base)
            .and_then(|off| usize::try_from(off).ok())
            .filter(|&off| off.checked_add(len).is_some_and(|end| end <= self.bytes.len()));
        match start {
            Some(start) => Ok(start..start + len),
            None => Err(format_error(format!(
                "patch location {address:#x} (+{len}) is outside the code body [{:#x}, {:#x})",
                self.base,
                self.base.wrapping_add(self.bytes.len() as u64)
            ))),
        }
    }

    pub fn read(&self, address: u64, len: usize) -> Result<&[u8]> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn read_uint(&self, address: u64, size: usize, endian: Endian) -> Result<u64> {
        Ok(endian.read_uint(self.read(address, size)?))
    }

    pub fn write_uint(
        &mut self,
        address: u64,
        size: usize,
        endian: Endian,
        value: u64,
    ) -> Result<()> {
        let range = self.range(address, size)?;
        endian.write_uint(&mut self.bytes[range], value);
        Ok(())
    }
}

/// The machine a relocation table was produced for.
///
/// Implementors provide the byte order, the pointer width and the guard
/// patching sequence; everything else has a default expressed in terms of
/// those. Architectures whose instructions embed addresses differently
/// override the `*_address*` family.
pub trait RelocationTarget {
    fn endian(&self) -> Endian;

    fn pointer_width(&self) -> PointerWidth;

    /// Overwrites a guard at `location` so that it unconditionally branches
    /// to `destination`.
    fn patch_virtual_guard(
        &self,
        code: &mut CodeBuffer<'_>,
        location: u64,
        destination: u64,
    ) -> Result<()>;

    #[inline]
    fn word_size(&self) -> usize {
        self.pointer_width().bytes()
    }

    fn load_pointer(&self, code: &CodeBuffer<'_>, location: u64) -> Result<u64> {
        code.read_uint(location, self.word_size(), self.endian())
    }

    fn store_pointer(&self, code: &mut CodeBuffer<'_>, location: u64, value: u64) -> Result<()> {
        code.write_uint(location, self.word_size(), self.endian(), value)
    }

    /// Reads an address embedded in an instruction.
    fn load_address(&self, code: &CodeBuffer<'_>, location: u64) -> Result<u64> {
        self.load_pointer(code, location)
    }

    /// Writes an address embedded in an instruction.
    fn store_address(&self, code: &mut CodeBuffer<'_>, location: u64, value: u64) -> Result<()> {
        self.store_pointer(code, location, value)
    }

    /// Writes an address materialised by a fixed instruction sequence.
    /// `sequence` is the record's kind-specific flag byte.
    fn store_address_sequence(
        &self,
        code: &mut CodeBuffer<'_>,
        location: u64,
        value: u64,
        sequence: u8,
    ) -> Result<()> {
        let _ = sequence;
        self.store_address(code, location, value)
    }

    /// Reads a value split across two half-word immediates.
    fn load_address_pair(&self, code: &CodeBuffer<'_>, high: u64, low: u64) -> Result<u64> {
        let half = self.word_size() / 2;
        let hi = code.read_uint(high, half, self.endian())?;
        let lo = code.read_uint(low, half, self.endian())?;
        Ok((hi << (half * 8)) | lo)
    }

    /// Writes `value` split across two half-word immediates.
    fn store_address_pair(
        &self,
        code: &mut CodeBuffer<'_>,
        high: u64,
        low: u64,
        value: u64,
    ) -> Result<()> {
        let half = self.word_size() / 2;
        let endian = self.endian();
        code.write_uint(high, half, endian, value >> (half * 8))?;
        code.write_uint(low, half, endian, value)
    }

    /// Reads the constant pool index stored after the constant pool word of
    /// a thunk or trampoline site.
    fn load_cp_index(&self, code: &CodeBuffer<'_>, location: u64) -> Result<u32> {
        let Some(at) = location.checked_add(self.word_size() as u64) else {
            return Err(format_error(format!(
                "cp index after {location:#x} is outside the address space"
            )));
        };
        let value = code.read_uint(at, 4, self.endian())?;
        Ok(value as u32)
    }

    /// Address that a relative displacement stored at `location` is
    /// measured from.
    #[inline]
    fn eip_base(&self, location: u64) -> u64 {
        location.wrapping_add(4)
    }

    fn load_relative_target(&self, code: &CodeBuffer<'_>, location: u64) -> Result<u64> {
        let disp = code.read_uint(location, 4, self.endian())? as u32 as i32;
        Ok(self.eip_base(location).wrapping_add(disp as i64 as u64))
    }

    /// Stores `target` as a 32-bit displacement relative to
    /// [`eip_base`](RelocationTarget::eip_base).
    fn store_relative_target(
        &self,
        code: &mut CodeBuffer<'_>,
        location: u64,
        target: u64,
    ) -> Result<()> {
        let disp = target.wrapping_sub(self.eip_base(location)) as i64;
        let Ok(disp) = i32::try_from(disp) else {
            return Err(format_error(format!(
                "displacement from {location:#x} to {target:#x} does not fit in 32 bits"
            )));
        };
        code.write_uint(location, 4, self.endian(), disp as u32 as u64)
    }

    /// Whether a call at `call_site` must reach `helper` through a
    /// trampoline.
    fn use_trampoline(&self, helper: u64, call_site: u64) -> bool {
        let _ = (helper, call_site);
        false
    }
}
