use super::{
    kind::RecordKind,
    payload::{FieldReader, Payload},
};
use crate::{
    Result, format_error,
    target::{Endian, PointerWidth},
};
use alloc::format;
use bitflags::bitflags;

/// Size in bytes of the fixed record header.
pub const HEADER_SIZE: usize = 8;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Kind-independent record flags.
    pub struct RecordFlags: u8 {
        /// Offset entries are 32-bit instead of 16-bit.
        const WIDE_OFFSETS = 1;

        /// Patched values are displacements relative to the patch location.
        const EIP_RELATIVE = 2;

        /// Offsets come in (high, low) pairs naming the two halves of a split
        /// immediate.
        const ORDERED_PAIR = 4;
    }
}

/// The fixed 8-byte header every record starts with.
///
/// Layout: `size: u16 @0`, `type: u8 @2`, `flags: u8 @3`, `reloFlags: u8 @4`,
/// followed by three bytes of padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Size in bytes of the whole record, header and offsets included.
    pub size: u16,
    /// The raw kind byte.
    pub kind: u8,
    pub flags: RecordFlags,
    /// Kind-specific flag byte, passed through to the target as the
    /// instruction sequence selector.
    pub relo_flags: u8,
}

impl RecordHeader {
    pub(crate) fn parse(bytes: &[u8], endian: Endian) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(format_error(format!(
                "truncated record header: {} bytes left in group",
                bytes.len()
            )));
        }
        Ok(Self {
            size: endian.read_uint(&bytes[0..2]) as u16,
            kind: bytes[2],
            flags: RecordFlags::from_bits_retain(bytes[3]),
            relo_flags: bytes[4],
        })
    }

    pub(crate) fn write(&self, out: &mut [u8], endian: Endian) {
        endian.write_uint(&mut out[0..2], self.size as u64);
        out[2] = self.kind;
        out[3] = self.flags.bits();
        out[4] = self.relo_flags;
        out[5..HEADER_SIZE].fill(0);
    }
}

/// A structurally validated view of one record's bytes.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRecord<'a> {
    bytes: &'a [u8],
    header: RecordHeader,
    kind: RecordKind,
    endian: Endian,
    width: PointerWidth,
    payload_end: usize,
}

impl<'a> BinaryRecord<'a> {
    /// Validates the record at the start of `bytes` and decodes its payload.
    ///
    /// `bytes` may extend past the record; only `size` bytes are used.
    pub(crate) fn parse(
        bytes: &'a [u8],
        endian: Endian,
        width: PointerWidth,
    ) -> Result<(Self, Payload)> {
        let header = RecordHeader::parse(bytes, endian)?;
        let size = header.size as usize;
        if size < HEADER_SIZE {
            return Err(format_error(format!(
                "record size {size} does not span the {HEADER_SIZE}-byte header"
            )));
        }
        let Some(bytes) = bytes.get(..size) else {
            return Err(format_error(format!(
                "record size {size} overruns its group ({} bytes left)",
                bytes.len()
            )));
        };
        let kind = RecordKind::try_from(header.kind)?;
        let mut reader = FieldReader::new(bytes, endian, width);
        let payload = Payload::decode(kind.shape(), &mut reader)?;
        let payload_end = reader.finish();
        if payload_end > size {
            return Err(format_error(format!(
                "{kind} record size {size} is below its {payload_end}-byte header and payload"
            )));
        }
        let record = Self {
            bytes,
            header,
            kind,
            endian,
            width,
            payload_end,
        };
        let entry = record.offset_entry_size();
        if (size - payload_end) % entry != 0 {
            return Err(format_error(format!(
                "{kind} record: {} trailing bytes are not a whole number of {entry}-byte offsets",
                size - payload_end
            )));
        }
        if record.is_ordered_pair() && record.offset_count() % 2 != 0 {
            return Err(format_error(format!(
                "{kind} record has an odd number ({}) of ordered-pair offsets",
                record.offset_count()
            )));
        }
        Ok((record, payload))
    }

    #[inline]
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.header.size
    }

    #[inline]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    #[inline]
    pub fn flags(&self) -> RecordFlags {
        self.header.flags
    }

    #[inline]
    pub fn relo_flags(&self) -> u8 {
        self.header.relo_flags
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    #[inline]
    pub fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    #[inline]
    pub fn is_wide_offsets(&self) -> bool {
        self.header.flags.contains(RecordFlags::WIDE_OFFSETS)
    }

    #[inline]
    pub fn is_eip_relative(&self) -> bool {
        self.header.flags.contains(RecordFlags::EIP_RELATIVE)
    }

    #[inline]
    pub fn is_ordered_pair(&self) -> bool {
        self.header.flags.contains(RecordFlags::ORDERED_PAIR) || self.kind.is_ordered_pair_kind()
    }

    #[inline]
    fn offset_entry_size(&self) -> usize {
        if self.is_wide_offsets() { 4 } else { 2 }
    }

    /// Size of the header and payload, padded to the word size.
    #[inline]
    pub fn header_and_payload_size(&self) -> usize {
        self.payload_end
    }

    /// Number of raw offset entries.
    #[inline]
    pub fn offset_count(&self) -> usize {
        (self.bytes.len() - self.payload_end) / self.offset_entry_size()
    }

    /// The raw offset entries.
    pub fn offsets(&self) -> Offsets<'a> {
        Offsets {
            bytes: &self.bytes[self.payload_end..],
            entry: self.offset_entry_size(),
            endian: self.endian,
        }
    }

    /// The patch locations named by the offset list, relative to `origin`.
    pub fn locations(&self, origin: u64) -> Locations<'a> {
        Locations {
            offsets: self.offsets(),
            origin,
            paired: self.is_ordered_pair(),
        }
    }
}

/// Iterator over a record's signed offset entries.
#[derive(Debug, Clone)]
pub struct Offsets<'a> {
    bytes: &'a [u8],
    entry: usize,
    endian: Endian,
}

impl Iterator for Offsets<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        if self.bytes.len() < self.entry {
            return None;
        }
        let (raw, rest) = self.bytes.split_at(self.entry);
        self.bytes = rest;
        let value = self.endian.read_uint(raw);
        Some(if self.entry == 2 {
            value as u16 as i16 as i32
        } else {
            value as u32 as i32
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.bytes.len() / self.entry;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Offsets<'_> {}

/// Where a record writes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchLocation {
    /// Validation records patch nothing.
    None,
    At(u64),
    /// The two halves of a split immediate.
    Pair { high: u64, low: u64 },
}

impl PatchLocation {
    /// The address runtime assumptions are registered against: the location
    /// itself, or the high half of a pair.
    #[inline]
    pub fn address(self) -> Option<u64> {
        match self {
            PatchLocation::None => None,
            PatchLocation::At(address) | PatchLocation::Pair { high: address, .. } => Some(address),
        }
    }
}

/// Iterator over a record's patch locations.
#[derive(Debug, Clone)]
pub struct Locations<'a> {
    offsets: Offsets<'a>,
    origin: u64,
    paired: bool,
}

impl Iterator for Locations<'_> {
    type Item = PatchLocation;

    fn next(&mut self) -> Option<PatchLocation> {
        let first = self.offsets.next()?;
        if self.paired {
            // Pair entries address the immediate halfword of each instruction.
            let second = self.offsets.next()?;
            Some(PatchLocation::Pair {
                high: self.origin.wrapping_add_signed(first as i64 + 2),
                low: self.origin.wrapping_add_signed(second as i64 + 2),
            })
        } else {
            Some(PatchLocation::At(self.origin.wrapping_add_signed(first as i64)))
        }
    }
}
