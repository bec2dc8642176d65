//! Class and field validation records.
//!
//! These check that a class the code was compiled against resolves to the
//! same shape at load time. They patch nothing; a mismatch fails the load.

use super::{Payload, RecordKind, RecordOutcome, RelocationContext, RelocationRecord};
use crate::{
    RelocationErrorCode, Result,
    runtime::{CacheOffset, ClassQuery, OpaqueClass},
};
use alloc::format;

pub(super) fn apply(
    record: &RelocationRecord<'_>,
    ctx: &mut RelocationContext<'_, '_>,
) -> Result<RecordOutcome> {
    let site = record.site(ctx);
    let (valid, code) = match (record.kind(), *record.payload()) {
        (
            kind @ (RecordKind::ValidateClass | RecordKind::ValidateInstanceField),
            Payload::ValidateClass {
                constant_pool,
                cp_index,
                class_chain_offset,
                ..
            },
        ) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            let cp_index = cp_index as u32;
            let (query, code) = if kind == RecordKind::ValidateClass {
                (
                    ClassQuery::FromCp { cp: new_cp, cp_index },
                    RelocationErrorCode::ClassValidationFailure,
                )
            } else {
                (
                    ClassQuery::DefiningFromCp {
                        cp: new_cp,
                        cp_index,
                        is_static: false,
                    },
                    RelocationErrorCode::FieldValidationFailure,
                )
            };
            let class = resolve(ctx, new_cp, query);
            let valid = class.is_some_and(|class| {
                ctx.runtime
                    .class_matches_cached_version(class, CacheOffset(class_chain_offset))
            });
            (valid, code)
        }
        (
            RecordKind::ValidateStaticField,
            Payload::InlinedMethod {
                constant_pool,
                cp_index,
                rom_class_offset,
                ..
            },
        ) => {
            let new_cp = ctx.compute_new_constant_pool(site, constant_pool, constant_pool)?;
            let query = ClassQuery::DefiningFromCp {
                cp: new_cp,
                cp_index: cp_index as u32,
                is_static: true,
            };
            let class = resolve(ctx, new_cp, query);
            let valid = class.is_some_and(|class| {
                let runtime = &*ctx.runtime;
                runtime.pointer_from_cache_offset(CacheOffset(rom_class_offset))
                    == Some(runtime.rom_class_of(class))
            });
            (valid, RelocationErrorCode::FieldValidationFailure)
        }
        (
            RecordKind::ValidateArbitraryClass,
            Payload::ValidateArbitraryClass {
                loader_chain_offset,
                class_chain_offset,
            },
        ) => {
            let valid = ctx
                .runtime
                .class_loader_for_chain(CacheOffset(loader_chain_offset))
                .and_then(|loader| {
                    ctx.runtime.lookup_class(ClassQuery::FromChain {
                        loader,
                        chain: CacheOffset(class_chain_offset),
                    })
                })
                .is_some();
            (valid, RelocationErrorCode::ClassValidationFailure)
        }
        _ => return Err(record.unexpected_payload()),
    };
    ctx.stats(|stats| {
        stats.class_validations += 1;
        if !valid {
            stats.class_validations_failed += 1;
        }
    });
    if valid {
        Ok(RecordOutcome::Applied)
    } else {
        Err(record.fail(
            code,
            format!("class of site {site:?} does not match the compiled code"),
        ))
    }
}

/// A constant pool of 0 belongs to an unloaded site and resolves nothing.
fn resolve(ctx: &mut RelocationContext<'_, '_>, cp: u64, query: ClassQuery) -> Option<OpaqueClass> {
    if cp == 0 {
        ctx.stats(|stats| stats.unresolved_cp += 1);
        return None;
    }
    ctx.runtime.lookup_class(query)
}
