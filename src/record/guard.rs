//! Speculative records: inline allocation checks, inlined-method guards,
//! profiled guards and class or method pointers.
//!
//! A failed assumption here never fails the load. The record instead
//! disables the fast path it protects, by patching the guard to branch or by
//! storing an all-ones pointer, and reports
//! [`RecordOutcome::GuardInvalidated`].

use super::{
    PatchLocation, Payload, PrivateData, RecordKind, RecordOutcome, RelocationContext,
    RelocationRecord,
};
use crate::{
    RelocationErrorCode, Result,
    runtime::{
        AotStats, CacheOffset, ClassQuery, MethodDispatch, MethodQuery, OpaqueClass,
        OpaqueMethod, RuntimeAssumption, SiteMethod, ValidationCounts,
    },
};

pub(super) fn prepare(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<PrivateData> {
    match *record.payload() {
        Payload::VerifyClassObjectForAlloc {
            constant_pool,
            cp_index,
            ..
        }
        | Payload::InlinedAllocation {
            constant_pool,
            cp_index,
            ..
        } => prepare_inlined_allocation(record, ctx, constant_pool, cp_index),
        Payload::NopGuard {
            inlined_site_index,
            cp_index,
            rom_class_offset,
            destination_address,
            ..
        } => {
            let destination = ctx.rebase(destination_address);
            prepare_inlined_method(
                record,
                ctx,
                inlined_site_index,
                cp_index,
                rom_class_offset,
                destination,
            )
        }
        Payload::InlinedMethod {
            inlined_site_index,
            cp_index,
            rom_class_offset,
            ..
        } => prepare_inlined_method(record, ctx, inlined_site_index, cp_index, rom_class_offset, 0),
        Payload::ProfiledInlinedMethod { .. } => prepare_profiled_guard(record, ctx),
        Payload::MethodPointer { .. } | Payload::Pointer { .. } => prepare_pointer(record, ctx),
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
    let kind = record.kind();
    match (*record.payload(), data) {
        (
            Payload::VerifyClassObjectForAlloc { branch_offset, .. }
            | Payload::InlinedAllocation { branch_offset, .. },
            &PrivateData::InlinedAllocation { code_is_okay },
        ) => {
            if code_is_okay {
                return Ok(RecordOutcome::Applied);
            }
            let at = RelocationContext::single_location(location, name)?;
            ctx.patch_virtual_guard(location, at.wrapping_add(branch_offset), name)?;
            Ok(RecordOutcome::GuardInvalidated)
        }
        (
            _,
            &PrivateData::InlinedMethod {
                failed,
                method,
                receiver,
                destination,
            },
        ) => {
            let is_nop_guard = matches!(record.payload(), Payload::NopGuard { .. });
            let method = match method {
                Some(method) if !failed => method,
                _ => {
                    if is_nop_guard {
                        ctx.patch_virtual_guard(location, destination, name)?;
                    }
                    return Ok(RecordOutcome::GuardInvalidated);
                }
            };
            if is_nop_guard {
                let at = RelocationContext::single_location(location, name)?;
                register_guard_assumptions(ctx, kind, method, receiver, at, destination)?;
            }
            Ok(RecordOutcome::Applied)
        }
        (
            _,
            &PrivateData::ProfiledGuard {
                failed,
                guard_value,
                class,
                need_unload,
            },
        ) => {
            if kind == RecordKind::ProfiledInlinedMethod {
                return Ok(if failed {
                    RecordOutcome::GuardInvalidated
                } else {
                    RecordOutcome::Applied
                });
            }
            if failed {
                let all_ones = ctx.all_ones();
                ctx.store_pointer(location, all_ones, name)?;
                return Ok(RecordOutcome::GuardInvalidated);
            }
            ctx.store_pointer(location, guard_value, name)?;
            register_unload(ctx, class, need_unload, location)?;
            Ok(RecordOutcome::Applied)
        }
        (
            _,
            &PrivateData::Pointer {
                activated,
                pointer,
                class,
                need_unload,
            },
        ) => {
            if kind == RecordKind::ArbitraryClassAddress {
                ctx.store_address_sequence(location, pointer, record.relo_flags(), name)?;
                return Ok(RecordOutcome::Applied);
            }
            ctx.store_pointer(location, pointer, name)?;
            if !activated {
                return Ok(RecordOutcome::GuardInvalidated);
            }
            register_unload(ctx, class, need_unload, location)?;
            if ctx.options().is_hcr_enabled() {
                if let Some(at) = location.address() {
                    let size = ctx.target.word_size();
                    ctx.register(RuntimeAssumption::ClassRedefinition {
                        value: pointer,
                        location: at,
                        size,
                        unresolved: false,
                    })?;
                }
            }
            Ok(RecordOutcome::Applied)
        }
        _ => Err(record.unexpected_payload()),
    }
}

fn prepare_inlined_allocation(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
    constant_pool: u64,
    cp_index: u64,
) -> Result<PrivateData> {
    let new_cp = ctx.compute_new_constant_pool(record.site(ctx), constant_pool, constant_pool)?;
    let class = if new_cp == 0 {
        None
    } else {
        ctx.runtime.lookup_class(ClassQuery::FromCp {
            cp: new_cp,
            cp_index: cp_index as u32,
        })
    };
    let code_is_okay = match (class, *record.payload()) {
        (Some(class), Payload::VerifyClassObjectForAlloc { allocation_size, .. }) => {
            ctx.runtime.inline_allocation_size(class) == Some(allocation_size)
        }
        (Some(class), _) => ctx.runtime.lookup_class(ClassQuery::ArrayOf(class)).is_some(),
        (None, _) => false,
    };
    #[cfg(feature = "log")]
    log::debug!("{}: inline allocation at cp index {cp_index} okay: {code_is_okay}", record.name());
    ctx.stats(|stats| stats.inlined_allocations.record(code_is_okay));
    Ok(PrivateData::InlinedAllocation { code_is_okay })
}

fn dispatch_of(kind: RecordKind) -> MethodDispatch {
    match kind {
        RecordKind::InlinedStaticMethodWithNopGuard => MethodDispatch::Static,
        RecordKind::InlinedSpecialMethodWithNopGuard | RecordKind::InlinedHcrMethod => {
            MethodDispatch::Special
        }
        RecordKind::InlinedInterfaceMethodWithNopGuard | RecordKind::InlinedInterfaceMethod => {
            MethodDispatch::Interface
        }
        RecordKind::InlinedAbstractMethodWithNopGuard => MethodDispatch::Abstract,
        _ => MethodDispatch::Virtual,
    }
}

fn counts_of(stats: &mut AotStats, dispatch: MethodDispatch) -> &mut ValidationCounts {
    match dispatch {
        MethodDispatch::Static => &mut stats.static_methods,
        MethodDispatch::Special => &mut stats.special_methods,
        MethodDispatch::Virtual => &mut stats.virtual_methods,
        MethodDispatch::Interface => &mut stats.interface_methods,
        MethodDispatch::Abstract => &mut stats.abstract_methods,
    }
}

/// Binds a validated method to its inlined site.
fn activate_site(
    ctx: &mut RelocationContext<'_, '_>,
    site: usize,
    method: OpaqueMethod,
) -> Result<()> {
    ctx.runtime.set_inlined_site_method(site, method);
    let class = ctx.runtime.class_of_method(method);
    if ctx.loaders_differ(class) {
        ctx.register(RuntimeAssumption::InlinedSiteUnload { class, site })?;
    }
    Ok(())
}

/// Resolves the method inlined at `site` the way its caller resolves it
/// now, and checks that it is still the method the code was compiled for.
fn resolve_inlined_method(
    ctx: &mut RelocationContext<'_, '_>,
    site: Option<usize>,
    cp_index: u32,
    dispatch: MethodDispatch,
    rom_class_offset: u64,
) -> Result<Option<(OpaqueMethod, u64)>> {
    let Some(index) = site else {
        return Ok(None);
    };
    let options = ctx.options();
    if options.is_inline_site_disabled(index) || options.is_ch_opts_disabled() {
        return Ok(None);
    }
    let SiteMethod::Method(caller) = ctx.caller_method(index)? else {
        return Ok(None);
    };
    let cp = ctx.runtime.constant_pool_of(caller);
    let Some(method) = ctx.runtime.lookup_method(MethodQuery::FromCp {
        cp,
        cp_index,
        dispatch,
        caller: Some(caller),
    }) else {
        return Ok(None);
    };
    let runtime = &*ctx.runtime;
    if runtime.is_method_traced(method)
        || runtime.method_enter_reported(method)
        || runtime.method_exit_reported(method)
    {
        return Ok(None);
    }
    let rom_class = runtime.rom_class_of(runtime.class_of_method(method));
    if runtime.pointer_from_cache_offset(CacheOffset(rom_class_offset)) != Some(rom_class) {
        return Ok(None);
    }
    Ok(Some((method, cp)))
}

fn prepare_inlined_method(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
    inlined_site_index: u64,
    cp_index: u64,
    rom_class_offset: u64,
    destination: u64,
) -> Result<PrivateData> {
    let kind = record.kind();
    let site = ctx.site_index(inlined_site_index);
    let dispatch = dispatch_of(kind);
    let cp_index = cp_index as u32;
    let mut method = None;
    let mut receiver = None;
    if let Some((resolved, cp)) =
        resolve_inlined_method(ctx, site, cp_index, dispatch, rom_class_offset)?
    {
        receiver = match dispatch {
            MethodDispatch::Interface => ctx
                .runtime
                .lookup_class(ClassQuery::FromITableIndexCp { cp, cp_index }),
            MethodDispatch::Abstract => Some(ctx.runtime.class_of_method(resolved)),
            _ => None,
        };
        let receiver_ok = receiver.is_some()
            || !matches!(dispatch, MethodDispatch::Interface | MethodDispatch::Abstract);
        if receiver_ok {
            method = Some(resolved);
        }
    }
    let failed = method.is_none();
    if let (Some(method), Some(index)) = (method, site) {
        activate_site(ctx, index, method)?;
    }
    #[cfg(feature = "log")]
    log::debug!(
        "{}: inlined site {site:?} cp index {cp_index} resolved to {method:?}",
        record.name()
    );
    ctx.stats(|stats| {
        if failed {
            stats.inlined_method_validation_failed += 1;
        } else {
            stats.inlined_method_relocated += 1;
        }
        counts_of(stats, dispatch).record(!failed);
    });
    Ok(PrivateData::InlinedMethod {
        failed,
        method,
        receiver,
        destination,
    })
}

fn register_guard_assumptions(
    ctx: &mut RelocationContext<'_, '_>,
    kind: RecordKind,
    method: OpaqueMethod,
    receiver: Option<OpaqueClass>,
    location: u64,
    destination: u64,
) -> Result<()> {
    let class = ctx.runtime.class_of_method(method);
    match kind {
        RecordKind::InlinedVirtualMethodWithNopGuard => {
            ctx.register(RuntimeAssumption::GuardOnMethodOverride {
                method,
                location,
                destination,
            })?;
        }
        RecordKind::InlinedInterfaceMethodWithNopGuard
        | RecordKind::InlinedAbstractMethodWithNopGuard => {
            ctx.register(RuntimeAssumption::GuardOnSubclassExtension {
                class: receiver.unwrap_or(class),
                location,
                destination,
            })?;
        }
        _ => {}
    }
    if kind == RecordKind::InlinedHcrMethod || ctx.options().is_hcr_enabled() {
        ctx.register(RuntimeAssumption::GuardOnClassRedefinition {
            class,
            location,
            destination,
        })?;
    }
    Ok(())
}

fn prepare_profiled_guard(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<PrivateData> {
    let Payload::ProfiledInlinedMethod {
        inlined_site_index,
        rom_class_offset,
        loader_chain_offset,
        class_chain_offset,
        vtable_slot,
        ..
    } = *record.payload()
    else {
        return Err(record.unexpected_payload());
    };
    let kind = record.kind();
    let site = ctx.site_index(inlined_site_index);
    let mut resolved = None;
    let disabled = site.is_none_or(|index| ctx.options().is_inline_site_disabled(index));
    if !disabled {
        let class = ctx
            .runtime
            .class_loader_for_chain(CacheOffset(loader_chain_offset))
            .and_then(|loader| {
                ctx.runtime.lookup_class(ClassQuery::InLoader {
                    loader,
                    rom_class: CacheOffset(rom_class_offset),
                })
            })
            .filter(|&class| {
                ctx.runtime
                    .class_matches_cached_version(class, CacheOffset(class_chain_offset))
            });
        if let Some(class) = class {
            let method = ctx.runtime.lookup_method(MethodQuery::VTableSlot {
                class,
                slot: vtable_slot,
            });
            if let Some(method) = method.filter(|&m| !ctx.runtime.is_method_traced(m)) {
                resolved = Some((class, method));
            }
        }
    }
    let (failed, guard_value, class, need_unload) = match (resolved, site) {
        (Some((class, method)), Some(index)) => {
            activate_site(ctx, index, method)?;
            let guard_value = match kind {
                RecordKind::ProfiledClassGuard => class.raw(),
                RecordKind::ProfiledMethodGuard => method.raw(),
                _ => 0,
            };
            (false, guard_value, Some(class), ctx.loaders_differ(class))
        }
        _ => (true, ctx.all_ones(), None, false),
    };
    ctx.stats(|stats| {
        let counts = match kind {
            RecordKind::ProfiledClassGuard => &mut stats.profiled_class_guards,
            RecordKind::ProfiledMethodGuard => &mut stats.profiled_method_guards,
            _ => &mut stats.profiled_inlined_methods,
        };
        counts.record(!failed);
    });
    Ok(PrivateData::ProfiledGuard {
        failed,
        guard_value,
        class,
        need_unload,
    })
}

fn prepare_pointer(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<PrivateData> {
    let (inlined_site_index, loader_chain_offset, class_chain_offset, vtable_slot) =
        match *record.payload() {
            Payload::MethodPointer {
                inlined_site_index,
                loader_chain_offset,
                class_chain_offset,
                vtable_slot,
            } => (inlined_site_index, loader_chain_offset, class_chain_offset, Some(vtable_slot)),
            Payload::Pointer {
                inlined_site_index,
                loader_chain_offset,
                class_chain_offset,
            } => (inlined_site_index, loader_chain_offset, class_chain_offset, None),
            _ => return Err(record.unexpected_payload()),
        };
    let kind = record.kind();
    let inactive = PrivateData::Pointer {
        activated: false,
        pointer: ctx.all_ones(),
        class: None,
        need_unload: false,
    };
    let site_method = ctx.site_method(ctx.site_index(inlined_site_index))?;
    let arbitrary = kind == RecordKind::ArbitraryClassAddress;
    if !arbitrary && matches!(site_method, SiteMethod::Inactive | SiteMethod::Unloaded) {
        return Ok(inactive);
    }
    let loader = ctx
        .runtime
        .class_loader_for_chain(CacheOffset(loader_chain_offset));
    if arbitrary && loader != Some(ctx.runtime.system_class_loader()) {
        return Err(record.fail(
            RelocationErrorCode::ClassValidationFailure,
            "class is not loaded by the system class loader",
        ));
    }
    let class = loader.and_then(|loader| {
        ctx.runtime.lookup_class(ClassQuery::FromChain {
            loader,
            chain: CacheOffset(class_chain_offset),
        })
    });
    let Some(class) = class else {
        if arbitrary {
            return Err(record.fail(
                RelocationErrorCode::ClassValidationFailure,
                "class chain does not resolve",
            ));
        }
        return Ok(inactive);
    };
    let pointer = match vtable_slot {
        Some(slot) => match ctx
            .runtime
            .lookup_method(MethodQuery::VTableSlot { class, slot })
        {
            Some(method) => method.raw(),
            None => return Ok(inactive),
        },
        None => class.raw(),
    };
    Ok(PrivateData::Pointer {
        activated: true,
        pointer,
        class: Some(class),
        need_unload: ctx.loaders_differ(class),
    })
}

fn register_unload(
    ctx: &mut RelocationContext<'_, '_>,
    class: Option<OpaqueClass>,
    need_unload: bool,
    location: PatchLocation,
) -> Result<()> {
    if let (true, Some(class), Some(at)) = (need_unload, class, location.address()) {
        ctx.register(RuntimeAssumption::ClassUnload {
            class: Some(class),
            location: at,
        })?;
    }
    Ok(())
}
