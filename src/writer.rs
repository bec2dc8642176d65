//! Encoding of relocation tables.
//!
//! The compiler side of the format: records are described with a
//! [`RecordSpec`], packed into a group by a [`GroupWriter`] and groups are
//! concatenated by a [`TableWriter`]. Everything is encoded for one target's
//! byte order and word size.

use crate::{
    Result, format_error,
    record::{FieldWriter, HEADER_SIZE, Payload, RecordFlags, RecordHeader, RecordKind, align_up},
    target::{Endian, PointerWidth, RelocationTarget},
};
use alloc::{format, vec::Vec};

/// One record waiting to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    kind: RecordKind,
    payload: Payload,
    flags: RecordFlags,
    relo_flags: u8,
    offsets: Vec<i32>,
}

impl RecordSpec {
    pub fn new(kind: RecordKind, payload: Payload) -> Self {
        Self {
            kind,
            payload,
            flags: RecordFlags::empty(),
            relo_flags: 0,
            offsets: Vec::new(),
        }
    }

    pub fn eip_relative(mut self) -> Self {
        self.flags |= RecordFlags::EIP_RELATIVE;
        self
    }

    pub fn ordered_pair(mut self) -> Self {
        self.flags |= RecordFlags::ORDERED_PAIR;
        self
    }

    /// Forces 32-bit offset entries. Offsets outside the `i16` range select
    /// them automatically.
    pub fn wide_offsets(mut self) -> Self {
        self.flags |= RecordFlags::WIDE_OFFSETS;
        self
    }

    pub fn relo_flags(mut self, relo_flags: u8) -> Self {
        self.relo_flags = relo_flags;
        self
    }

    pub fn offset(mut self, offset: i32) -> Self {
        self.offsets.push(offset);
        self
    }

    pub fn offsets(mut self, offsets: impl IntoIterator<Item = i32>) -> Self {
        self.offsets.extend(offsets);
        self
    }

    #[inline]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Flags as they will be encoded.
    pub fn encoded_flags(&self) -> RecordFlags {
        let mut flags = self.flags;
        if self
            .offsets
            .iter()
            .any(|&offset| i16::try_from(offset).is_err())
        {
            flags |= RecordFlags::WIDE_OFFSETS;
        }
        flags
    }

    /// Appends the encoded record to `out`.
    ///
    /// Payload fields are aligned relative to the start of the record, so
    /// records need no padding between them.
    pub fn encode(&self, out: &mut Vec<u8>, endian: Endian, width: PointerWidth) -> Result<()> {
        if self.payload.shape() != self.kind.shape() {
            return Err(format_error(format!(
                "{} record cannot carry a {:?} payload",
                self.kind,
                self.payload.shape()
            )));
        }
        let flags = self.encoded_flags();
        let paired = flags.contains(RecordFlags::ORDERED_PAIR) || self.kind.is_ordered_pair_kind();
        if paired && self.offsets.len() % 2 != 0 {
            return Err(format_error(format!(
                "{} record has an odd number ({}) of ordered-pair offsets",
                self.kind,
                self.offsets.len()
            )));
        }
        let start = out.len();
        out.resize(start + HEADER_SIZE, 0);
        let mut writer = FieldWriter::new(out, start, endian, width);
        self.payload.encode(&mut writer);
        writer.finish();
        debug_assert_eq!(align_up(out.len() - start, width.bytes()), out.len() - start);

        let entry = if flags.contains(RecordFlags::WIDE_OFFSETS) { 4 } else { 2 };
        for &offset in &self.offsets {
            let at = out.len();
            out.resize(at + entry, 0);
            endian.write_uint(&mut out[at..], offset as u32 as u64);
        }

        let size = out.len() - start;
        let Ok(size) = u16::try_from(size) else {
            out.truncate(start);
            return Err(format_error(format!(
                "{} record of {size} bytes does not fit the 16-bit size field",
                self.kind
            )));
        };
        let header = RecordHeader {
            size,
            kind: self.kind.raw(),
            flags,
            relo_flags: self.relo_flags,
        };
        header.write(&mut out[start..], endian);
        Ok(())
    }
}

/// Packs records into one group.
#[derive(Debug, Clone)]
pub struct GroupWriter {
    bytes: Vec<u8>,
    endian: Endian,
    width: PointerWidth,
    records: usize,
}

impl GroupWriter {
    pub fn new<T>(target: &T) -> Self
    where
        T: RelocationTarget + ?Sized,
    {
        Self::with_layout(target.endian(), target.pointer_width())
    }

    pub fn with_layout(endian: Endian, width: PointerWidth) -> Self {
        Self {
            bytes: alloc::vec![0; width.bytes()],
            endian,
            width,
            records: 0,
        }
    }

    /// Appends a record. On error the group is left unchanged.
    pub fn push(&mut self, record: &RecordSpec) -> Result<&mut Self> {
        let start = self.bytes.len();
        if let Err(err) = record.encode(&mut self.bytes, self.endian, self.width) {
            self.bytes.truncate(start);
            return Err(err);
        }
        self.records += 1;
        Ok(self)
    }

    #[inline]
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Writes the size word and returns the encoded group.
    pub fn finish(mut self) -> Vec<u8> {
        let size = self.bytes.len() as u64;
        let word = self.width.bytes();
        self.endian.write_uint(&mut self.bytes[..word], size);
        self.bytes
    }
}

/// Concatenates groups into a table.
#[derive(Debug, Clone, Default)]
pub struct TableWriter {
    bytes: Vec<u8>,
    groups: usize,
}

impl TableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_group(&mut self, group: GroupWriter) -> &mut Self {
        self.bytes.extend_from_slice(&group.finish());
        self.groups += 1;
        self
    }

    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
