//! Kind-specific record fields.
//!
//! A payload is an ordered list of fields following the 8-byte header. Each
//! field is aligned to the smaller of its size and the target word, and the
//! header plus payload is padded to a whole number of words. Fields typed
//! `u64` below are target words: 4 bytes on 32-bit targets, zero extended on
//! read and truncated on write.

use super::header::HEADER_SIZE;
use crate::{
    Result, format_error,
    target::{Endian, PointerWidth},
};
use alloc::{format, vec::Vec};
use core::fmt;

/// A fixed-width integer stored in a record payload.
pub(crate) trait RecordField: Copy {
    fn size(width: PointerWidth) -> usize;

    fn from_raw(raw: u64) -> Self;

    fn to_raw(self) -> u64;

    fn fmt_value(self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.to_raw())
    }
}

macro_rules! fixed_field {
    ($($ty:ty),*) => {
        $(
            impl RecordField for $ty {
                #[inline]
                fn size(_: PointerWidth) -> usize {
                    size_of::<$ty>()
                }

                #[inline]
                fn from_raw(raw: u64) -> Self {
                    raw as $ty
                }

                #[inline]
                fn to_raw(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

fixed_field!(u8, u16, u32);

impl RecordField for i32 {
    #[inline]
    fn size(_: PointerWidth) -> usize {
        4
    }

    #[inline]
    fn from_raw(raw: u64) -> Self {
        raw as u32 as i32
    }

    #[inline]
    fn to_raw(self) -> u64 {
        self as u32 as u64
    }

    fn fmt_value(self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Target word.
impl RecordField for u64 {
    #[inline]
    fn size(width: PointerWidth) -> usize {
        width.bytes()
    }

    #[inline]
    fn from_raw(raw: u64) -> Self {
        raw
    }

    #[inline]
    fn to_raw(self) -> u64 {
        self
    }
}

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Reads payload fields from a record, starting right after the header.
pub(crate) struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    endian: Endian,
    width: PointerWidth,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], endian: Endian, width: PointerWidth) -> Self {
        Self {
            bytes,
            pos: HEADER_SIZE,
            endian,
            width,
        }
    }

    pub(crate) fn read<F: RecordField>(&mut self) -> Result<F> {
        let size = F::size(self.width);
        let start = align_up(self.pos, size.min(self.width.bytes()));
        let Some(raw) = self.bytes.get(start..start + size) else {
            return Err(format_error(format!(
                "record of {} bytes is too small for its payload",
                self.bytes.len()
            )));
        };
        self.pos = start + size;
        Ok(F::from_raw(self.endian.read_uint(raw)))
    }

    /// Size of the header and payload, padded to the word size.
    pub(crate) fn finish(self) -> usize {
        align_up(self.pos, self.width.bytes())
    }
}

/// Appends payload fields to a record under construction.
pub(crate) struct FieldWriter<'a> {
    out: &'a mut Vec<u8>,
    start: usize,
    endian: Endian,
    width: PointerWidth,
}

impl<'a> FieldWriter<'a> {
    /// `out` must already hold the record header at `start`.
    pub(crate) fn new(
        out: &'a mut Vec<u8>,
        start: usize,
        endian: Endian,
        width: PointerWidth,
    ) -> Self {
        Self {
            out,
            start,
            endian,
            width,
        }
    }

    fn pad_to(&mut self, align: usize) {
        let len = self.out.len() - self.start;
        self.out.resize(self.start + align_up(len, align), 0);
    }

    pub(crate) fn write<F: RecordField>(&mut self, value: F) {
        let size = F::size(self.width);
        self.pad_to(size.min(self.width.bytes()));
        let at = self.out.len();
        self.out.resize(at + size, 0);
        self.endian.write_uint(&mut self.out[at..], value.to_raw());
    }

    pub(crate) fn finish(mut self) {
        self.pad_to(self.width.bytes());
    }
}

macro_rules! payloads {
    ($($(#[$meta:meta])* $shape:ident { $($field:ident : $ty:ty),* $(,)? })*) => {
        /// The payload layout of a record kind.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PayloadShape {
            $($shape,)*
        }

        /// The decoded payload of a record.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Payload {
            $($(#[$meta])* $shape { $($field: $ty),* },)*
        }

        impl Payload {
            pub fn shape(&self) -> PayloadShape {
                match self {
                    $(Payload::$shape { .. } => PayloadShape::$shape,)*
                }
            }

            pub(crate) fn decode(
                shape: PayloadShape,
                reader: &mut FieldReader<'_>,
            ) -> Result<Self> {
                match shape {
                    $(PayloadShape::$shape => {
                        $(let $field = reader.read::<$ty>()?;)*
                        Ok(Payload::$shape { $($field),* })
                    })*
                }
            }

            pub(crate) fn encode(&self, writer: &mut FieldWriter<'_>) {
                match self {
                    $(Payload::$shape { $($field),* } => {
                        $(writer.write(*$field);)*
                    })*
                }
            }

            pub(crate) fn fmt_fields(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Payload::$shape { $($field),* } => {
                        $(
                            write!(f, "\t{} ", stringify!($field))?;
                            RecordField::fmt_value(*$field, f)?;
                            writeln!(f)?;
                        )*
                    })*
                }
                Ok(())
            }
        }
    };
}

payloads! {
    Empty {}
    ConstantPool { inlined_site_index: u64, constant_pool: u64 }
    Helper { helper_id: u32 }
    DataAddress { inlined_site_index: u64, constant_pool: u64, cp_index: u64, offset: u64 }
    ConstantPoolWithIndex { inlined_site_index: u64, constant_pool: u64, cp_index: u64 }
    WithOffset { offset: u64 }
    PicTrampolines { num_trampolines: u32 }
    MethodTracingCheck { destination_address: u64 }
    VerifyClassObjectForAlloc {
        inlined_site_index: u64,
        constant_pool: u64,
        cp_index: u64,
        branch_offset: u64,
        allocation_size: u64,
    }
    InlinedAllocation {
        inlined_site_index: u64,
        constant_pool: u64,
        cp_index: u64,
        branch_offset: u64,
    }
    ValidateClass {
        inlined_site_index: u64,
        constant_pool: u64,
        cp_index: u64,
        class_chain_offset: u64,
    }
    InlinedMethod {
        inlined_site_index: u64,
        constant_pool: u64,
        cp_index: u64,
        rom_class_offset: u64,
    }
    NopGuard {
        inlined_site_index: u64,
        constant_pool: u64,
        cp_index: u64,
        rom_class_offset: u64,
        destination_address: u64,
    }
    ProfiledInlinedMethod {
        inlined_site_index: u64,
        constant_pool: u64,
        cp_index: u64,
        rom_class_offset: u64,
        loader_chain_offset: u64,
        class_chain_offset: u64,
        vtable_slot: u64,
    }
    MethodPointer {
        inlined_site_index: u64,
        loader_chain_offset: u64,
        class_chain_offset: u64,
        vtable_slot: u64,
    }
    Pointer { inlined_site_index: u64, loader_chain_offset: u64, class_chain_offset: u64 }
    ValidateArbitraryClass { loader_chain_offset: u64, class_chain_offset: u64 }
    EmitClass { inlined_site_index: u64, bc_index: i32 }
    DebugCounter {
        inlined_site_index: u64,
        bc_index: i32,
        name_offset: u64,
        delta: i32,
        fidelity: u8,
        static_delta: i32,
    }
    J2IVirtualThunkPointer {
        inlined_site_index: u64,
        constant_pool: u64,
        offset_to_thunk_pointer: u64,
    }
    MethodCallAddress { method_address: u64 }
    ResolvedTrampolines { symbol_id: u16 }
    BlockFrequency { frequency_offset: u64 }
    ValidateRootClass { class_id: u16 }
    ValidateClassByName {
        class_id: u16,
        beholder_id: u16,
        primitive_type: u8,
        rom_class_offset: u64,
    }
    ValidateProfiledClass {
        class_id: u16,
        primitive_type: u8,
        class_chain_offset: u64,
        loader_chain_offset: u64,
    }
    ValidateClassFromCp { class_id: u16, beholder_id: u16, cp_index: u32 }
    ValidateDefiningClassFromCp { is_static: u8, class_id: u16, beholder_id: u16, cp_index: u32 }
    ValidateClassFromMethod { class_id: u16, method_id: u16 }
    /// A class derived from another one: component, array, super, `Class`
    /// class or concrete subclass.
    ValidateDerivedClass { class_id: u16, from_class_id: u16 }
    ValidateClassInstanceOfClass {
        object_type_is_fixed: u8,
        cast_type_is_fixed: u8,
        is_instance_of: u8,
        class_one_id: u16,
        class_two_id: u16,
    }
    ValidateSystemClassByName { system_class_id: u16, rom_class_offset: u64 }
    ValidateClassChain { class_id: u16, class_chain_offset: u64 }
    ValidateRomClass { class_id: u16, rom_class_offset: u64 }
    ValidatePrimitiveClass { class_id: u16, primitive_type: u8 }
    ValidateMethodFromInlinedSite { method_id: u16, inlined_site_index: u64 }
    ValidateMethodByName {
        method_id: u16,
        beholder_id: u16,
        rom_class_offset: u64,
        rom_method_offset: u64,
    }
    ValidateMethodFromClass { method_id: u16, beholder_id: u16, index: u32 }
    ValidateMethodFromCp { method_id: u16, beholder_id: u16, cp_index: u32 }
    ValidateVirtualMethodFromOffset {
        method_id: u16,
        beholder_id: u16,
        virtual_call_offset: i32,
        ignore_rt_resolve: u8,
    }
    ValidateInterfaceMethodFromCp {
        method_id: u16,
        beholder_id: u16,
        lookup_id: u16,
        cp_index: u32,
    }
    ValidateMethodFromClassAndSig {
        method_id: u16,
        method_class_id: u16,
        beholder_id: u16,
        rom_method_offset: u64,
    }
    ValidateStackWalkerMaySkipFrames { method_id: u16, method_class_id: u16, skip_frames: u8 }
    ValidateArrayClassFromJavaVm { array_class_id: u16, array_class_index: i32 }
    ValidateClassInfoIsInitialized { class_id: u16, is_initialized: u8 }
    ValidateMethodFromSingleImplementer {
        method_id: u16,
        this_class_id: u16,
        cp_index_or_vft_slot: i32,
        caller_method_id: u16,
        use_resolved_interface_method: u16,
    }
    ValidateMethodFromSingleInterfaceImplementer {
        method_id: u16,
        this_class_id: u16,
        cp_index: i32,
        caller_method_id: u16,
    }
    ValidateMethodFromSingleAbstractImplementer {
        method_id: u16,
        this_class_id: u16,
        vft_slot: i32,
        caller_method_id: u16,
    }
    SymbolFromManager { symbol_id: u16, symbol_type: u16 }
}

impl Payload {
    /// The raw inlined site index, for payloads that carry one.
    pub fn inlined_site_index(&self) -> Option<u64> {
        match *self {
            Payload::ConstantPool { inlined_site_index, .. }
            | Payload::DataAddress { inlined_site_index, .. }
            | Payload::ConstantPoolWithIndex { inlined_site_index, .. }
            | Payload::VerifyClassObjectForAlloc { inlined_site_index, .. }
            | Payload::InlinedAllocation { inlined_site_index, .. }
            | Payload::ValidateClass { inlined_site_index, .. }
            | Payload::InlinedMethod { inlined_site_index, .. }
            | Payload::NopGuard { inlined_site_index, .. }
            | Payload::ProfiledInlinedMethod { inlined_site_index, .. }
            | Payload::MethodPointer { inlined_site_index, .. }
            | Payload::Pointer { inlined_site_index, .. }
            | Payload::EmitClass { inlined_site_index, .. }
            | Payload::DebugCounter { inlined_site_index, .. }
            | Payload::J2IVirtualThunkPointer { inlined_site_index, .. }
            | Payload::ValidateMethodFromInlinedSite { inlined_site_index, .. } => {
                Some(inlined_site_index)
            }
            _ => None,
        }
    }

    /// The compile-time constant pool address, for payloads that carry one.
    pub fn constant_pool(&self) -> Option<u64> {
        match *self {
            Payload::ConstantPool { constant_pool, .. }
            | Payload::DataAddress { constant_pool, .. }
            | Payload::ConstantPoolWithIndex { constant_pool, .. }
            | Payload::VerifyClassObjectForAlloc { constant_pool, .. }
            | Payload::InlinedAllocation { constant_pool, .. }
            | Payload::ValidateClass { constant_pool, .. }
            | Payload::InlinedMethod { constant_pool, .. }
            | Payload::NopGuard { constant_pool, .. }
            | Payload::ProfiledInlinedMethod { constant_pool, .. }
            | Payload::J2IVirtualThunkPointer { constant_pool, .. } => Some(constant_pool),
            _ => None,
        }
    }

    pub fn cp_index(&self) -> Option<u64> {
        match *self {
            Payload::DataAddress { cp_index, .. }
            | Payload::ConstantPoolWithIndex { cp_index, .. }
            | Payload::VerifyClassObjectForAlloc { cp_index, .. }
            | Payload::InlinedAllocation { cp_index, .. }
            | Payload::ValidateClass { cp_index, .. }
            | Payload::InlinedMethod { cp_index, .. }
            | Payload::NopGuard { cp_index, .. }
            | Payload::ProfiledInlinedMethod { cp_index, .. } => Some(cp_index),
            _ => None,
        }
    }
}
