//! Records backed by the symbol validation manager.
//!
//! `Validate*` records resolve a class or method the way the compiler did
//! and bind the result to an ID; later records refer to those IDs instead of
//! repeating the lookup.

use super::{
    PatchLocation, Payload, PrivateData, RecordKind, RecordOutcome, RelocationContext,
    RelocationRecord,
};
use crate::{
    RelocationErrorCode, Result, format_error,
    runtime::{
        CacheOffset, ClassQuery, MethodDispatch, MethodQuery, OpaqueClass, OpaqueMethod,
        RuntimeAssumption, YesNoMaybe,
    },
    svm::{Symbol, SymbolType},
};
use alloc::format;

pub(super) fn prepare(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<PrivateData> {
    match *record.payload() {
        Payload::SymbolFromManager {
            symbol_id,
            symbol_type,
        } => {
            let symbol = ctx.svm.symbol(symbol_id)?;
            let Some(expected) = SymbolType::from_u16(symbol_type) else {
                return Err(format_error(format!(
                    "{}: unknown symbol type {symbol_type}",
                    record.name()
                )));
            };
            let matches = match (expected, symbol) {
                (SymbolType::Opaque, _) => true,
                (SymbolType::Class, Symbol::Class(_)) => true,
                (SymbolType::Method, Symbol::Method(_)) => true,
                _ => false,
            };
            if !matches {
                return Err(format_error(format!(
                    "{}: symbol {symbol_id} is {symbol:?}, expected {expected:?}",
                    record.name()
                )));
            }
            Ok(PrivateData::Symbol { symbol })
        }
        Payload::ResolvedTrampolines { symbol_id } => {
            let method = ctx.svm.method(symbol_id)?;
            Ok(PrivateData::Method {
                method,
                address: method.raw(),
            })
        }
        _ => Ok(PrivateData::None),
    }
}

pub(super) fn apply(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
    data: &PrivateData,
    location: PatchLocation,
) -> Result<RecordOutcome> {
    let name = record.name();
    match (record.kind(), data) {
        (RecordKind::SymbolFromManager, &PrivateData::Symbol { symbol }) => {
            ctx.store_pointer(location, symbol.raw(), name)?;
            register_symbol_unload(ctx, symbol, location)?;
        }
        (RecordKind::DiscontiguousSymbolFromManager, &PrivateData::Symbol { symbol }) => {
            ctx.store_address_sequence(location, symbol.raw(), record.relo_flags(), name)?;
            register_symbol_unload(ctx, symbol, location)?;
        }
        (RecordKind::ResolvedTrampolines, &PrivateData::Method { method, .. }) => {
            let at = RelocationContext::single_location(location, name)?;
            if !ctx.runtime.reserve_resolved_trampoline(method, at) {
                return Err(record.fail(
                    RelocationErrorCode::TrampolineFailure,
                    format!("no trampoline for call site {at:#x}"),
                ));
            }
        }
        _ => {
            if !validate(record, ctx)? {
                return Err(record.fail(
                    RelocationErrorCode::SymbolValidationFailure,
                    "symbol does not match the compiled code",
                ));
            }
        }
    }
    Ok(RecordOutcome::Applied)
}

fn register_symbol_unload(
    ctx: &mut RelocationContext<'_, '_>,
    symbol: Symbol,
    location: PatchLocation,
) -> Result<()> {
    let class = match symbol {
        Symbol::Class(class) => class,
        Symbol::Method(method) => ctx.runtime.class_of_method(method),
        Symbol::Opaque(_) => return Ok(()),
    };
    if let (true, Some(at)) = (ctx.loaders_differ(class), location.address()) {
        ctx.register(RuntimeAssumption::ClassUnload {
            class: Some(class),
            location: at,
        })?;
    }
    Ok(())
}

/// Binds a resolved class to `id`, stripping array dimensions first.
fn validate_class(
    ctx: &mut RelocationContext<'_, '_>,
    id: u16,
    class: Option<OpaqueClass>,
) -> bool {
    let class = class.map(|class| ctx.runtime.base_component_class(class));
    ctx.svm.validate_symbol(id, class.map(Symbol::Class))
}

/// Binds a resolved class to `id` as is.
fn validate_exact_class(
    ctx: &mut RelocationContext<'_, '_>,
    id: u16,
    class: Option<OpaqueClass>,
) -> bool {
    ctx.svm.validate_symbol(id, class.map(Symbol::Class))
}

fn validate_method(
    ctx: &mut RelocationContext<'_, '_>,
    id: u16,
    method: Option<OpaqueMethod>,
) -> bool {
    ctx.svm.validate_symbol(id, method.map(Symbol::Method))
}

/// Constant pool a beholder class resolves references through.
fn beholder_cp(ctx: &RelocationContext<'_, '_>, beholder_id: u16) -> Result<u64> {
    let beholder = ctx.svm.class(beholder_id)?;
    Ok(ctx.runtime.constant_pool_of_class(beholder))
}

fn validate(record: &RelocationRecord<'_>, ctx: &mut RelocationContext<'_, '_>) -> Result<bool> {
    let kind = record.kind();
    let valid = match *record.payload() {
        Payload::ValidateRootClass { class_id } => {
            let class = ctx.runtime.class_of_method(ctx.runtime.method());
            validate_class(ctx, class_id, Some(class))
        }
        Payload::ValidateClassByName {
            class_id,
            beholder_id,
            primitive_type,
            rom_class_offset,
        } => {
            if primitive_type != 0 {
                ctx.svm.get(class_id).is_some()
            } else {
                let cp = beholder_cp(ctx, beholder_id)?;
                let class = ctx.runtime.lookup_class(ClassQuery::ByName {
                    cp,
                    rom_class: CacheOffset(rom_class_offset),
                });
                validate_class(ctx, class_id, class)
            }
        }
        Payload::ValidateProfiledClass {
            class_id,
            primitive_type,
            class_chain_offset,
            loader_chain_offset,
        } => {
            if primitive_type != 0 {
                ctx.svm.get(class_id).is_some()
            } else {
                let class = ctx
                    .runtime
                    .class_loader_for_chain(CacheOffset(loader_chain_offset))
                    .and_then(|loader| {
                        ctx.runtime.lookup_class(ClassQuery::FromChain {
                            loader,
                            chain: CacheOffset(class_chain_offset),
                        })
                    });
                validate_class(ctx, class_id, class)
            }
        }
        Payload::ValidateClassFromCp {
            class_id,
            beholder_id,
            cp_index,
        } => {
            let cp = beholder_cp(ctx, beholder_id)?;
            let query = match kind {
                RecordKind::ValidateStaticClassFromCp => ClassQuery::StaticFromCp { cp, cp_index },
                RecordKind::ValidateClassFromITableIndexCp => {
                    ClassQuery::FromITableIndexCp { cp, cp_index }
                }
                RecordKind::ValidateDeclaringClassFromFieldOrStatic => {
                    ClassQuery::DeclaringFromFieldOrStatic {
                        cp,
                        cp_index: cp_index as i32,
                    }
                }
                _ => ClassQuery::FromCp { cp, cp_index },
            };
            let class = ctx.runtime.lookup_class(query);
            validate_class(ctx, class_id, class)
        }
        Payload::ValidateDefiningClassFromCp {
            is_static,
            class_id,
            beholder_id,
            cp_index,
        } => {
            let cp = beholder_cp(ctx, beholder_id)?;
            let class = ctx.runtime.lookup_class(ClassQuery::DefiningFromCp {
                cp,
                cp_index,
                is_static: is_static != 0,
            });
            validate_class(ctx, class_id, class)
        }
        Payload::ValidateClassFromMethod {
            class_id,
            method_id,
        } => {
            let method = ctx.svm.method(method_id)?;
            let class = ctx.runtime.class_of_method(method);
            validate_class(ctx, class_id, Some(class))
        }
        Payload::ValidateDerivedClass {
            class_id,
            from_class_id,
        } => {
            let from = ctx.svm.class(from_class_id)?;
            match kind {
                RecordKind::ValidateComponentClassFromArrayClass => {
                    let class = ctx.runtime.lookup_class(ClassQuery::ComponentOf(from));
                    validate_exact_class(ctx, class_id, class)
                }
                RecordKind::ValidateArrayClassFromComponentClass => {
                    let class = ctx.runtime.lookup_class(ClassQuery::ArrayOf(from));
                    validate_exact_class(ctx, class_id, class)
                }
                RecordKind::ValidateClassClass => {
                    let class = ctx.runtime.lookup_class(ClassQuery::ClassClassOf(from));
                    validate_exact_class(ctx, class_id, class)
                }
                RecordKind::ValidateSuperClassFromClass => {
                    let class = ctx.runtime.lookup_class(ClassQuery::SuperOf(from));
                    validate_class(ctx, class_id, class)
                }
                _ => {
                    let class = ctx.runtime.lookup_class(ClassQuery::ConcreteSubclassOf(from));
                    validate_class(ctx, class_id, class)
                }
            }
        }
        Payload::ValidateClassInstanceOfClass {
            object_type_is_fixed,
            cast_type_is_fixed,
            is_instance_of,
            class_one_id,
            class_two_id,
        } => {
            let one = ctx.svm.class(class_one_id)?;
            let two = ctx.svm.class(class_two_id)?;
            let answer = ctx.runtime.is_instance_of(
                one,
                two,
                object_type_is_fixed != 0,
                cast_type_is_fixed != 0,
            );
            answer == YesNoMaybe::from_u8(is_instance_of)
        }
        Payload::ValidateSystemClassByName {
            system_class_id,
            rom_class_offset,
        } => {
            let class = ctx.runtime.lookup_class(ClassQuery::SystemByName {
                rom_class: CacheOffset(rom_class_offset),
            });
            validate_class(ctx, system_class_id, class)
        }
        Payload::ValidateClassChain {
            class_id,
            class_chain_offset,
        } => {
            let class = ctx.svm.class(class_id)?;
            ctx.runtime
                .class_matches_cached_version(class, CacheOffset(class_chain_offset))
        }
        Payload::ValidateRomClass {
            class_id,
            rom_class_offset,
        } => {
            let class = ctx.svm.class(class_id)?;
            ctx.runtime.pointer_from_cache_offset(CacheOffset(rom_class_offset))
                == Some(ctx.runtime.rom_class_of(class))
        }
        Payload::ValidatePrimitiveClass {
            class_id,
            primitive_type,
        } => {
            let class = ctx.svm.class(class_id)?;
            ctx.runtime.primitive_type_of(class) == Some(primitive_type)
        }
        Payload::ValidateMethodFromInlinedSite {
            method_id,
            inlined_site_index,
        } => {
            let site = ctx.site_index(inlined_site_index);
            let method = ctx.site_method(site)?.method();
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateMethodByName {
            method_id,
            beholder_id,
            rom_class_offset,
            rom_method_offset,
        } => {
            let cp = beholder_cp(ctx, beholder_id)?;
            let method = ctx.runtime.lookup_method(MethodQuery::ByName {
                cp,
                rom_class: CacheOffset(rom_class_offset),
                rom_method: CacheOffset(rom_method_offset),
            });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateMethodFromClass {
            method_id,
            beholder_id,
            index,
        } => {
            let class = ctx.svm.class(beholder_id)?;
            let method = ctx
                .runtime
                .lookup_method(MethodQuery::FromClass { class, index });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateMethodFromCp {
            method_id,
            beholder_id,
            cp_index,
        } => {
            let cp = beholder_cp(ctx, beholder_id)?;
            let dispatch = match kind {
                RecordKind::ValidateStaticMethodFromCp => Some(MethodDispatch::Static),
                RecordKind::ValidateSpecialMethodFromCp => Some(MethodDispatch::Special),
                RecordKind::ValidateVirtualMethodFromCp => Some(MethodDispatch::Virtual),
                _ => None,
            };
            let query = match dispatch {
                Some(dispatch) => MethodQuery::FromCp {
                    cp,
                    cp_index,
                    dispatch,
                    caller: None,
                },
                None => MethodQuery::ImproperInterfaceFromCp { cp, cp_index },
            };
            let method = ctx.runtime.lookup_method(query);
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateVirtualMethodFromOffset {
            method_id,
            beholder_id,
            virtual_call_offset,
            ignore_rt_resolve,
        } => {
            let class = ctx.svm.class(beholder_id)?;
            let method = ctx.runtime.lookup_method(MethodQuery::VirtualFromOffset {
                class,
                offset: virtual_call_offset,
                ignore_rt_resolve: ignore_rt_resolve != 0,
            });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateInterfaceMethodFromCp {
            method_id,
            beholder_id,
            lookup_id,
            cp_index,
        } => {
            let cp = beholder_cp(ctx, beholder_id)?;
            let lookup = ctx.svm.class(lookup_id)?;
            let method = ctx.runtime.lookup_method(MethodQuery::InterfaceFromCp {
                cp,
                lookup,
                cp_index,
            });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateMethodFromClassAndSig {
            method_id,
            method_class_id,
            beholder_id,
            rom_method_offset,
        } => {
            let class = ctx.svm.class(method_class_id)?;
            let beholder = ctx.svm.class(beholder_id)?;
            let method = ctx
                .runtime
                .lookup_method(MethodQuery::FromClassAndSignature {
                    class,
                    beholder,
                    rom_method: CacheOffset(rom_method_offset),
                });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateStackWalkerMaySkipFrames {
            method_id,
            method_class_id,
            skip_frames,
        } => {
            let method = ctx.svm.method(method_id)?;
            let class = ctx.svm.class(method_class_id)?;
            ctx.runtime.stack_walker_may_skip_frames(method, class) == (skip_frames != 0)
        }
        Payload::ValidateArrayClassFromJavaVm {
            array_class_id,
            array_class_index,
        } => {
            let class = ctx.runtime.lookup_class(ClassQuery::ArrayFromJavaVm {
                index: array_class_index,
            });
            validate_exact_class(ctx, array_class_id, class)
        }
        Payload::ValidateClassInfoIsInitialized {
            class_id,
            is_initialized,
        } => {
            let class = ctx.svm.class(class_id)?;
            is_initialized == 0 || ctx.runtime.is_class_initialized(class)
        }
        Payload::ValidateMethodFromSingleImplementer {
            method_id,
            this_class_id,
            cp_index_or_vft_slot,
            caller_method_id,
            use_resolved_interface_method,
        } => {
            let this_class = ctx.svm.class(this_class_id)?;
            let caller = ctx.svm.method(caller_method_id)?;
            let method = ctx.runtime.lookup_method(MethodQuery::SingleImplementer {
                this_class,
                cp_index_or_slot: cp_index_or_vft_slot,
                caller,
                use_resolved_interface_method: YesNoMaybe::from_u8(
                    use_resolved_interface_method.min(u8::MAX as u16) as u8,
                ),
            });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateMethodFromSingleInterfaceImplementer {
            method_id,
            this_class_id,
            cp_index,
            caller_method_id,
        } => {
            let this_class = ctx.svm.class(this_class_id)?;
            let caller = ctx.svm.method(caller_method_id)?;
            let method = ctx
                .runtime
                .lookup_method(MethodQuery::SingleInterfaceImplementer {
                    this_class,
                    cp_index,
                    caller,
                });
            validate_method(ctx, method_id, method)
        }
        Payload::ValidateMethodFromSingleAbstractImplementer {
            method_id,
            this_class_id,
            vft_slot,
            caller_method_id,
        } => {
            let this_class = ctx.svm.class(this_class_id)?;
            let caller = ctx.svm.method(caller_method_id)?;
            let method = ctx
                .runtime
                .lookup_method(MethodQuery::SingleAbstractImplementer {
                    this_class,
                    vft_slot,
                    caller,
                });
            validate_method(ctx, method_id, method)
        }
        _ => return Err(record.unexpected_payload()),
    };
    #[cfg(feature = "log")]
    log::debug!("{}: validation {}", record.name(), if valid { "passed" } else { "failed" });
    Ok(valid)
}
