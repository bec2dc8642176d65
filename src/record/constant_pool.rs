//! Records resolved against a constant pool: constant pool and method
//! object words, thunks, trampolines, class objects, static data addresses,
//! RAM method constants and JNI targets.

use super::{
    PatchLocation, Payload, PrivateData, RecordKind, RecordOutcome, RelocationContext,
    RelocationRecord,
};
use crate::{
    RelocationErrorCode, Result,
    runtime::{ClassQuery, MethodDispatch, MethodQuery, RuntimeAssumption, ThunkLookup},
};
use alloc::format;

pub(super) fn prepare(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<PrivateData> {
    let site = record.site(ctx);
    match (record.kind(), *record.payload()) {
        (
            RecordKind::ClassObject | RecordKind::ClassAddress,
            Payload::ConstantPoolWithIndex {
                constant_pool,
                cp_index,
                ..
            },
        ) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            if new_cp == 0 {
                ctx.stats(|stats| stats.unresolved_cp += 1);
                return Err(record.fail(
                    RelocationErrorCode::ClassValidationFailure,
                    "no constant pool for the inlined site",
                ));
            }
            let query = ClassQuery::FromCp {
                cp: new_cp,
                cp_index: cp_index as u32,
            };
            match ctx.runtime.lookup_class(query) {
                Some(class) => Ok(PrivateData::Address {
                    address: class.raw(),
                }),
                None => {
                    ctx.stats(|stats| stats.unresolved_class += 1);
                    Err(record.fail(
                        RelocationErrorCode::ClassValidationFailure,
                        format!("class at cp index {cp_index} does not resolve"),
                    ))
                }
            }
        }
        (
            RecordKind::DataAddress,
            Payload::DataAddress {
                constant_pool,
                cp_index,
                offset,
                ..
            },
        ) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            if new_cp == 0 {
                ctx.stats(|stats| stats.unresolved_cp += 1);
                return Err(record.fail(
                    RelocationErrorCode::StaticFieldResolutionFailure,
                    "no constant pool for the inlined site",
                ));
            }
            match ctx.runtime.static_field_address(new_cp, cp_index as u32) {
                Some(address) => Ok(PrivateData::Address {
                    address: ctx.pointer_width().truncate(address.wrapping_add(offset)),
                }),
                None => Err(record.fail(
                    RelocationErrorCode::StaticFieldResolutionFailure,
                    format!("static field at cp index {cp_index} does not resolve"),
                )),
            }
        }
        (
            kind @ (RecordKind::StaticRamMethodConst
            | RecordKind::SpecialRamMethodConst
            | RecordKind::VirtualRamMethodConst
            | RecordKind::JniStaticTargetAddress
            | RecordKind::JniSpecialTargetAddress
            | RecordKind::JniVirtualTargetAddress),
            Payload::ConstantPoolWithIndex {
                constant_pool,
                cp_index,
                ..
            },
        ) => {
            let dispatch = match kind {
                RecordKind::StaticRamMethodConst | RecordKind::JniStaticTargetAddress => {
                    MethodDispatch::Static
                }
                RecordKind::SpecialRamMethodConst | RecordKind::JniSpecialTargetAddress => {
                    MethodDispatch::Special
                }
                _ => MethodDispatch::Virtual,
            };
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            let method = ctx.runtime.lookup_method(MethodQuery::FromCp {
                cp: new_cp,
                cp_index: cp_index as u32,
                dispatch,
                caller: None,
            });
            let Some(method) = method else {
                return Err(record.fail(
                    RelocationErrorCode::MethodResolutionFailure,
                    format!("method at cp index {cp_index} does not resolve"),
                ));
            };
            let address = if matches!(
                kind,
                RecordKind::JniStaticTargetAddress
                    | RecordKind::JniSpecialTargetAddress
                    | RecordKind::JniVirtualTargetAddress
            ) {
                ctx.runtime.jni_address(method).ok_or_else(|| {
                    record.fail(
                        RelocationErrorCode::MethodResolutionFailure,
                        "method has no native entry point",
                    )
                })?
            } else {
                method.raw()
            };
            Ok(PrivateData::Method { method, address })
        }
        (
            RecordKind::ConstantPool
            | RecordKind::ConstantPoolOrderedPair
            | RecordKind::MethodObject
            | RecordKind::Thunks
            | RecordKind::J2IThunks
            | RecordKind::J2IVirtualThunkPointer
            | RecordKind::Trampolines
            | RecordKind::PicTrampolines,
            _,
        ) => Ok(PrivateData::None),
        _ => Err(record.unexpected_payload()),
    }
}

pub(super) fn apply(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
    data: &PrivateData,
    location: PatchLocation,
) -> Result<RecordOutcome> {
    let name = record.name();
    let site = record.site(ctx);
    match (record.kind(), *record.payload(), data) {
        (
            RecordKind::ConstantPool | RecordKind::ConstantPoolOrderedPair,
            Payload::ConstantPool { constant_pool, .. },
            _,
        ) => {
            // Relative references to the constant pool move with the code.
            if record.is_eip_relative() {
                return Ok(RecordOutcome::Applied);
            }
            let old = ctx.load_address(location, name)?;
            let new = ctx.compute_new_constant_pool(site, constant_pool, old)?;
            ctx.store_address(location, new, name)?;
        }
        (RecordKind::MethodObject, Payload::ConstantPool { constant_pool, .. }, _) => {
            let old = ctx.load_address(location, name)?;
            let new = old
                .wrapping_sub(constant_pool)
                .wrapping_add(ctx.runtime.constant_pool());
            ctx.store_address(location, ctx.pointer_width().truncate(new), name)?;
        }
        (RecordKind::Thunks, Payload::ConstantPool { constant_pool, .. }, _) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            ctx.store_address(location, new_cp, name)?;
            let at = RelocationContext::single_location(location, name)?;
            let cp_index = ctx.target.load_cp_index(ctx.code, at)?;
            find_or_create_thunk(record, ctx, new_cp, cp_index)?;
        }
        (
            RecordKind::J2IThunks,
            Payload::ConstantPoolWithIndex {
                constant_pool,
                cp_index,
                ..
            },
            _,
        ) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            let thunk = find_or_create_thunk(record, ctx, new_cp, cp_index as u32)?;
            ctx.store_pointer(location, thunk, name)?;
        }
        (
            RecordKind::J2IVirtualThunkPointer,
            Payload::J2IVirtualThunkPointer {
                constant_pool,
                offset_to_thunk_pointer,
                ..
            },
            _,
        ) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            ctx.store_address(location, new_cp, name)?;
            let at = RelocationContext::single_location(location, name)?;
            let cp_index = ctx.target.load_cp_index(ctx.code, at)?;
            let thunk = find_or_create_thunk(record, ctx, new_cp, cp_index)?;
            ctx.store_pointer(
                PatchLocation::At(at.wrapping_add(offset_to_thunk_pointer)),
                thunk,
                name,
            )?;
        }
        (RecordKind::Trampolines, Payload::ConstantPool { constant_pool, .. }, _) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            ctx.store_address(location, new_cp, name)?;
            let at = RelocationContext::single_location(location, name)?;
            let cp_index = ctx.target.load_cp_index(ctx.code, at)?;
            if !ctx.runtime.reserve_unresolved_trampoline(new_cp, cp_index) {
                return Err(record.fail(
                    RelocationErrorCode::TrampolineFailure,
                    format!("no trampoline for cp index {cp_index}"),
                ));
            }
        }
        (RecordKind::PicTrampolines, Payload::PicTrampolines { num_trampolines }, _) => {
            if !ctx.runtime.reserve_trampolines(num_trampolines) {
                return Err(record.fail(
                    RelocationErrorCode::PicTrampolineFailure,
                    format!("cannot reserve {num_trampolines} trampolines"),
                ));
            }
        }
        (
            RecordKind::ClassObject | RecordKind::ClassAddress,
            _,
            &PrivateData::Address { address },
        ) => {
            if ctx.options().is_hcr_enabled() {
                if let Some(at) = location.address() {
                    let size = ctx.target.word_size();
                    ctx.register(RuntimeAssumption::ClassRedefinition {
                        value: address,
                        location: at,
                        size,
                        unresolved: false,
                    })?;
                }
            }
            ctx.store_address_sequence(location, address, record.relo_flags(), name)?;
        }
        (RecordKind::DataAddress, _, &PrivateData::Address { address }) => {
            ctx.store_address_sequence(location, address, record.relo_flags(), name)?;
        }
        (
            RecordKind::StaticRamMethodConst
            | RecordKind::SpecialRamMethodConst
            | RecordKind::VirtualRamMethodConst,
            _,
            &PrivateData::Method { address, .. },
        ) => {
            ctx.store_address(location, address, name)?;
        }
        (
            RecordKind::JniStaticTargetAddress
            | RecordKind::JniSpecialTargetAddress
            | RecordKind::JniVirtualTargetAddress,
            _,
            &PrivateData::Method { method, address },
        ) => {
            if let Some(at) = location.address() {
                ctx.register(RuntimeAssumption::JniCallSite {
                    method,
                    location: at,
                })?;
            }
            if record.is_eip_relative() {
                ctx.store_relative_target(location, address, name)?;
            } else {
                ctx.store_address_sequence(location, address, record.relo_flags(), name)?;
            }
        }
        _ => return Err(record.unexpected_payload()),
    }
    Ok(RecordOutcome::Applied)
}

fn find_or_create_thunk(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
    cp: u64,
    cp_index: u32,
) -> Result<u64> {
    match ctx.runtime.find_or_create_thunk(cp, cp_index) {
        ThunkLookup::Found(thunk) => Ok(thunk),
        ThunkLookup::CacheFull => Err(record.fail(
            RelocationErrorCode::CodeCacheFull,
            format!("no room for the thunk of cp index {cp_index}"),
        )),
        ThunkLookup::Missing => Err(record.fail(
            RelocationErrorCode::ThunkFailure,
            format!("no thunk for cp index {cp_index}"),
        )),
    }
}
