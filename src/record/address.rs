//! Records that patch a runtime address: helpers, code-relative method
//! addresses, fixed sequences and global values, body info and RAM method
//! words, profiling addresses, method tracing checks, debug counters and
//! class records.

use super::{
    PatchLocation, Payload, PrivateData, RecordKind, RecordOutcome, RelocationContext,
    RelocationRecord,
};
use crate::{
    RelocationErrorCode, Result,
    runtime::{CacheOffset, DebugCounter, RuntimeAssumption, SiteMethod},
};
use alloc::format;

/// `reloFlags` bit of an HCR record whose site holds a full word.
const HCR_NEEDS_FULL_SIZE: u8 = 0x1;

pub(super) fn prepare(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<PrivateData> {
    let address = |address: u64| -> Result<PrivateData> { Ok(PrivateData::Address { address }) };
    match (record.kind(), *record.payload()) {
        (
            RecordKind::HelperAddress | RecordKind::AbsoluteHelperAddress,
            Payload::Helper { helper_id },
        ) => match ctx.runtime.helper_address(helper_id) {
            Some(address) => Ok(PrivateData::Helper { address }),
            None => Err(record.fail(
                RelocationErrorCode::HelperNotFound,
                format!("helper {helper_id} is not available"),
            )),
        },
        (
            RecordKind::FixedSequenceAddress | RecordKind::FixedSequenceAddress2,
            Payload::WithOffset { offset },
        ) => {
            if offset == 0 {
                address(0)
            } else {
                let value = ctx.runtime.new_code_start().wrapping_add(offset);
                address(ctx.pointer_width().truncate(value))
            }
        }
        (RecordKind::GlobalValue, Payload::WithOffset { offset }) => {
            match ctx.runtime.global_value(offset) {
                Some(value) => address(value),
                None => Err(record.fail(
                    RelocationErrorCode::InvalidRelocation,
                    format!("unknown global value {offset}"),
                )),
            }
        }
        (RecordKind::BodyInfoAddress | RecordKind::BodyInfoAddressLoad, _) => {
            address(ctx.runtime.body_info())
        }
        (
            RecordKind::RamMethod
            | RecordKind::RamMethodSequence
            | RecordKind::RamMethodSequenceReg,
            _,
        ) => address(ctx.runtime.method().raw()),
        (RecordKind::ArrayCopyHelper, _) => match ctx.runtime.array_copy_helper() {
            Some(value) => address(value),
            None => Err(record.fail(
                RelocationErrorCode::HelperNotFound,
                "no array copy helper",
            )),
        },
        (RecordKind::ArrayCopyToc, _) => match ctx.runtime.array_copy_toc() {
            Some(value) => address(value),
            None => Err(record.fail(
                RelocationErrorCode::HelperNotFound,
                "no array copy table of contents entry",
            )),
        },
        (
            RecordKind::CheckMethodEnter | RecordKind::CheckMethodExit,
            Payload::MethodTracingCheck { destination_address },
        ) => Ok(PrivateData::MethodTracingCheck {
            destination: ctx.rebase(destination_address),
        }),
        (RecordKind::BlockFrequency, Payload::BlockFrequency { frequency_offset }) => {
            match ctx.runtime.block_frequency_base() {
                Some(base) => {
                    address(ctx.pointer_width().truncate(base.wrapping_add(frequency_offset)))
                }
                None => Err(record.fail(
                    RelocationErrorCode::BlockFrequencyFailure,
                    "method has no block frequency array",
                )),
            }
        }
        (RecordKind::RecompQueuedFlag, _) => match ctx.runtime.recomp_queued_flag_address() {
            Some(value) => address(value),
            None => Err(record.fail(
                RelocationErrorCode::RecompQueuedFlagFailure,
                "method has no recompilation queued flag",
            )),
        },
        (RecordKind::CatchBlockCounter, _) => match ctx.runtime.catch_block_counter_address() {
            Some(value) => address(value),
            None => Err(record.fail(
                RelocationErrorCode::CatchBlockCounterFailure,
                "method has no catch block counter",
            )),
        },
        (RecordKind::EmitClass, Payload::EmitClass { bc_index, .. }) => {
            let method = ctx.site_method(record.site(ctx))?;
            Ok(PrivateData::EmitClass { method, bc_index })
        }
        (
            RecordKind::DebugCounter,
            Payload::DebugCounter {
                inlined_site_index,
                bc_index,
                name_offset,
                delta,
                fidelity,
                static_delta,
            },
        ) => {
            let Some(name) = ctx.runtime.debug_counter_name(CacheOffset(name_offset)) else {
                return Err(record.fail(
                    RelocationErrorCode::DebugCounterFailure,
                    format!("no counter name at cache offset {name_offset:#x}"),
                ));
            };
            let method = match ctx.site_index(inlined_site_index) {
                Some(site) => Some(ctx.site_method(Some(site))?),
                None => None,
            };
            let counter = DebugCounter {
                name,
                method,
                bc_index,
                delta,
                fidelity,
                static_delta,
            };
            let site_unavailable = matches!(
                counter.method,
                Some(SiteMethod::Inactive | SiteMethod::Unloaded)
            );
            if counter.is_aggregate() && site_unavailable {
                return Err(record.fail(
                    RelocationErrorCode::DebugCounterFailure,
                    format!("aggregate counter {} has no active site method", counter.name),
                ));
            }
            Ok(PrivateData::DebugCounter { counter })
        }
        (
            RecordKind::RelativeMethodAddress
            | RecordKind::AbsoluteMethodAddress
            | RecordKind::AbsoluteMethodAddressOrderedPair
            | RecordKind::MethodCallAddress
            | RecordKind::Hcr
            | RecordKind::ClassUnloadAssumption,
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
    let sequence = record.relo_flags();
    match (record.kind(), *record.payload(), data) {
        (
            RecordKind::HelperAddress,
            Payload::Helper { helper_id },
            &PrivateData::Helper { address },
        ) => {
            if record.is_eip_relative() {
                let at = RelocationContext::single_location(location, name)?;
                let mut target = address;
                if ctx.options().is_stress_trampolines() || ctx.target.use_trampoline(address, at) {
                    target = ctx.runtime.helper_trampoline(helper_id, at).ok_or_else(|| {
                        record.fail(
                            RelocationErrorCode::HelperNotFound,
                            format!("no trampoline reaches helper {helper_id} from {at:#x}"),
                        )
                    })?;
                }
                ctx.store_relative_target(location, target, name)?;
            } else {
                ctx.store_address(location, address, name)?;
            }
        }
        (RecordKind::AbsoluteHelperAddress, _, &PrivateData::Helper { address }) => {
            ctx.store_address_sequence(location, address, sequence, name)?;
        }
        (
            RecordKind::RelativeMethodAddress
            | RecordKind::AbsoluteMethodAddress
            | RecordKind::AbsoluteMethodAddressOrderedPair,
            _,
            _,
        ) => {
            if record.is_eip_relative() {
                let old = ctx.load_relative_target(location, name)?;
                let new = ctx.rebase(old);
                ctx.store_relative_target(location, new, name)?;
            } else {
                let old = ctx.load_address(location, name)?;
                let new = ctx.rebase(old);
                ctx.store_address(location, new, name)?;
            }
        }
        (RecordKind::MethodCallAddress, Payload::MethodCallAddress { method_address }, _) => {
            let new = ctx.rebase(method_address);
            if record.is_eip_relative() {
                ctx.store_relative_target(location, new, name)?;
            } else {
                ctx.store_address(location, new, name)?;
            }
        }
        (
            RecordKind::BodyInfoAddress | RecordKind::RamMethod,
            _,
            &PrivateData::Address { address },
        ) => {
            ctx.store_address(location, address, name)?;
        }
        (
            RecordKind::FixedSequenceAddress
            | RecordKind::FixedSequenceAddress2
            | RecordKind::GlobalValue
            | RecordKind::BodyInfoAddressLoad
            | RecordKind::RamMethodSequence
            | RecordKind::RamMethodSequenceReg
            | RecordKind::ArrayCopyHelper
            | RecordKind::ArrayCopyToc
            | RecordKind::BlockFrequency
            | RecordKind::RecompQueuedFlag
            | RecordKind::CatchBlockCounter,
            _,
            &PrivateData::Address { address },
        ) => {
            ctx.store_address_sequence(location, address, sequence, name)?;
        }
        (RecordKind::Hcr, Payload::WithOffset { offset }, _) => {
            let at = RelocationContext::single_location(location, name)?;
            let assumption = if offset != 0 {
                RuntimeAssumption::ClassRedefinition {
                    value: ctx.runtime.method().raw(),
                    location: at,
                    size: ctx.target.word_size(),
                    unresolved: true,
                }
            } else {
                let size = if sequence & HCR_NEEDS_FULL_SIZE != 0 {
                    ctx.target.word_size()
                } else {
                    1
                };
                RuntimeAssumption::ClassRedefinition {
                    value: ctx.all_ones(),
                    location: at,
                    size,
                    unresolved: true,
                }
            };
            ctx.register(assumption)?;
        }
        (
            RecordKind::CheckMethodEnter | RecordKind::CheckMethodExit,
            _,
            &PrivateData::MethodTracingCheck { destination },
        ) => {
            ctx.patch_virtual_guard(location, destination, name)?;
        }
        (RecordKind::EmitClass, _, &PrivateData::EmitClass { method, bc_index }) => {
            let at = RelocationContext::single_location(location, name)?;
            ctx.runtime.add_class_record(at, bc_index, method);
        }
        (RecordKind::DebugCounter, _, PrivateData::DebugCounter { counter }) => {
            let Some(address) = ctx.runtime.find_or_create_debug_counter(counter) else {
                return Err(record.fail(
                    RelocationErrorCode::DebugCounterFailure,
                    format!("cannot create counter {}", counter.name),
                ));
            };
            ctx.store_address_sequence(location, address, sequence, name)?;
        }
        (RecordKind::ClassUnloadAssumption, _, _) => {
            let at = RelocationContext::single_location(location, name)?;
            ctx.register(RuntimeAssumption::ClassUnload {
                class: None,
                location: at,
            })?;
        }
        _ => return Err(record.unexpected_payload()),
    }
    Ok(RecordOutcome::Applied)
}
