//! Relocation records.
//!
//! A record is a binary header, a kind-specific payload and a list of
//! offsets. Applying a record is a two-phase protocol: [`prepare`] runs once
//! and resolves whatever the record needs from the runtime into a
//! [`PrivateData`], then [`apply`] patches that value at every location named
//! by the offset list.
//!
//! [`prepare`]: RelocationRecord::prepare
//! [`apply`]: RelocationRecord::apply

mod address;
mod constant_pool;
mod context;
mod guard;
mod header;
mod kind;
mod payload;
mod print;
mod private_data;
mod symbol;
mod validate;

use crate::{
    Error, RelocationErrorCode, Result, format_error, relocation_error,
    runtime::SiteMethod,
    target::{Endian, PointerWidth, RelocationTarget},
};
use alloc::{borrow::Cow, format};
use delegate::delegate;

pub use context::RelocationContext;
pub use header::{
    BinaryRecord, HEADER_SIZE, Locations, Offsets, PatchLocation, RecordFlags, RecordHeader,
};
pub use kind::RecordKind;
pub use payload::{Payload, PayloadShape};
pub use private_data::PrivateData;

pub(crate) use payload::{FieldWriter, align_up};

/// What the group should do with a record before preparing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    /// Skip the record; it patches nothing.
    Ignore,
    Apply,
    /// Abandon the whole load with the given code.
    FailCompilation(RelocationErrorCode),
}

/// How a successfully applied record left the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Ignored,
    Applied,
    /// A speculative fast path was disabled. The code is still correct.
    GuardInvalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    ConstantPool,
    Address,
    Guard,
    Validate,
    Symbol,
}

impl RecordKind {
    const fn family(self) -> Family {
        use RecordKind::*;
        match self {
            ConstantPool
            | ConstantPoolOrderedPair
            | MethodObject
            | Thunks
            | J2IThunks
            | J2IVirtualThunkPointer
            | Trampolines
            | PicTrampolines
            | ClassObject
            | ClassAddress
            | DataAddress
            | StaticRamMethodConst
            | SpecialRamMethodConst
            | VirtualRamMethodConst
            | JniVirtualTargetAddress
            | JniStaticTargetAddress
            | JniSpecialTargetAddress => Family::ConstantPool,
            VerifyClassObjectForAlloc
            | VerifyRefArrayForAlloc
            | InlinedStaticMethodWithNopGuard
            | InlinedSpecialMethodWithNopGuard
            | InlinedVirtualMethodWithNopGuard
            | InlinedInterfaceMethodWithNopGuard
            | InlinedAbstractMethodWithNopGuard
            | InlinedHcrMethod
            | InlinedInterfaceMethod
            | InlinedVirtualMethod
            | ProfiledMethodGuard
            | ProfiledClassGuard
            | ProfiledInlinedMethod
            | MethodPointer
            | ClassPointer
            | ArbitraryClassAddress => Family::Guard,
            ValidateInstanceField
            | ValidateStaticField
            | ValidateClass
            | ValidateArbitraryClass => Family::Validate,
            _ if self.uses_symbol_validation() => Family::Symbol,
            _ => Family::Address,
        }
    }
}

/// A decoded relocation record borrowing its bytes from the table.
#[derive(Debug, Clone, Copy)]
pub struct RelocationRecord<'a> {
    binary: BinaryRecord<'a>,
    payload: Payload,
}

impl<'a> RelocationRecord<'a> {
    /// Decodes the record at the start of `bytes`, using the byte order and
    /// word size of `target`.
    ///
    /// Every structural check happens here: the kind must be known, the size
    /// must span the header and payload, the offsets must fill the rest
    /// exactly and ordered-pair offsets must come in pairs.
    pub fn create<T>(bytes: &'a [u8], target: &T) -> Result<Self>
    where
        T: RelocationTarget + ?Sized,
    {
        Self::parse(bytes, target.endian(), target.pointer_width())
    }

    #[inline]
    pub(crate) fn parse(bytes: &'a [u8], endian: Endian, width: PointerWidth) -> Result<Self> {
        let (binary, payload) = BinaryRecord::parse(bytes, endian, width)?;
        Ok(Self { binary, payload })
    }

    delegate! {
        to self.binary {
            pub fn header(&self) -> &RecordHeader;
            /// Size in bytes of the whole record.
            pub fn size(&self) -> u16;
            pub fn kind(&self) -> RecordKind;
            pub fn flags(&self) -> RecordFlags;
            /// The kind-specific flag byte.
            pub fn relo_flags(&self) -> u8;
            pub fn is_wide_offsets(&self) -> bool;
            pub fn is_eip_relative(&self) -> bool;
            pub fn is_ordered_pair(&self) -> bool;
            pub fn offset_count(&self) -> usize;
            pub fn offsets(&self) -> Offsets<'a>;
            pub fn locations(&self, origin: u64) -> Locations<'a>;
        }
    }

    #[inline]
    pub fn binary(&self) -> &BinaryRecord<'a> {
        &self.binary
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline]
    pub fn is_validation_record(&self) -> bool {
        self.kind().is_validation_record()
    }

    /// Decides whether the record is applied, skipped or fails the load.
    pub fn action(&self, ctx: &RelocationContext<'_, '_>) -> Result<RecordAction> {
        let kind = self.kind();
        let options = ctx.options();
        if kind.uses_symbol_validation() && !options.is_symbol_validation_enabled() {
            return Ok(RecordAction::FailCompilation(
                RelocationErrorCode::SymbolValidationFailure,
            ));
        }
        let ignore = match kind {
            RecordKind::ResolvedTrampolines => !options.is_method_trampolines_enabled(),
            RecordKind::Hcr => !options.is_hcr_enabled(),
            RecordKind::CheckMethodEnter => {
                !ctx.runtime.method_enter_reported(ctx.runtime.method())
            }
            RecordKind::CheckMethodExit => !ctx.runtime.method_exit_reported(ctx.runtime.method()),
            RecordKind::DebugCounter => {
                !options.is_debug_counters_enabled() || self.site_is_unavailable(ctx)?
            }
            _ if kind.is_validation_record()
                || kind.is_inlined_method_guard()
                || kind.is_pointer() =>
            {
                false
            }
            _ => self.site_is_unavailable(ctx)?,
        };
        Ok(if ignore {
            RecordAction::Ignore
        } else {
            RecordAction::Apply
        })
    }

    /// A record tied to an inlined site whose method is unloaded or was
    /// never validated patches nothing.
    fn site_is_unavailable(&self, ctx: &RelocationContext<'_, '_>) -> Result<bool> {
        let Some(raw) = self.payload.inlined_site_index() else {
            return Ok(false);
        };
        let site = ctx.site_index(raw);
        if site.is_none() {
            return Ok(false);
        }
        Ok(matches!(
            ctx.site_method(site)?,
            SiteMethod::Inactive | SiteMethod::Unloaded
        ))
    }

    /// Resolves everything the record needs before it is applied.
    pub fn prepare(&self, ctx: &mut RelocationContext<'_, '_>) -> Result<PrivateData> {
        match self.kind().family() {
            Family::ConstantPool => constant_pool::prepare(self, ctx),
            Family::Address => address::prepare(self, ctx),
            Family::Guard => guard::prepare(self, ctx),
            Family::Validate => Ok(PrivateData::None),
            Family::Symbol => symbol::prepare(self, ctx),
        }
    }

    /// Applies the record at one location.
    pub fn apply(
        &self,
        ctx: &mut RelocationContext<'_, '_>,
        data: &PrivateData,
        location: PatchLocation,
    ) -> Result<RecordOutcome> {
        match self.kind().family() {
            Family::ConstantPool => constant_pool::apply(self, ctx, data, location),
            Family::Address => address::apply(self, ctx, data, location),
            Family::Guard => guard::apply(self, ctx, data, location),
            Family::Validate => validate::apply(self, ctx),
            Family::Symbol => symbol::apply(self, ctx, data, location),
        }
    }

    /// Applies the record at every location of its offset list. Validation
    /// records are applied exactly once, with no location.
    pub fn apply_at_all_offsets(
        &self,
        ctx: &mut RelocationContext<'_, '_>,
        data: &PrivateData,
    ) -> Result<RecordOutcome> {
        if self.is_validation_record() {
            return self.apply(ctx, data, PatchLocation::None);
        }
        let mut outcome = RecordOutcome::Applied;
        for location in self.locations(ctx.origin) {
            #[cfg(feature = "log")]
            log::trace!("{} at {location:x?}", self.name());
            if self.apply(ctx, data, location)? == RecordOutcome::GuardInvalidated {
                outcome = RecordOutcome::GuardInvalidated;
            }
        }
        Ok(outcome)
    }

    /// A relocation error naming this record.
    #[cold]
    pub(crate) fn fail(
        &self,
        code: RelocationErrorCode,
        detail: impl Into<Cow<'static, str>>,
    ) -> Error {
        relocation_error(code, format!("{}: {}", self.name(), detail.into()))
    }

    /// The record's payload does not fit the family it was dispatched to.
    #[cold]
    pub(crate) fn unexpected_payload(&self) -> Error {
        format_error(format!(
            "{} record carries a {:?} payload",
            self.name(),
            self.payload.shape()
        ))
    }

    /// Inlined site of the payload; `None` for the outermost method or when
    /// the payload has no site.
    #[inline]
    pub(crate) fn site(&self, ctx: &RelocationContext<'_, '_>) -> Option<usize> {
        self.payload
            .inlined_site_index()
            .and_then(|raw| ctx.site_index(raw))
    }
}
