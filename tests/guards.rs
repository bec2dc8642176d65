mod common;

use aot_relo::{
    Payload, RecordKind, RelocationErrorCode, RelocationOptions, X86_64Target,
    runtime::{
        CacheOffset, ClassQuery, MethodDispatch, MethodQuery, OpaqueClass, OpaqueClassLoader,
        OpaqueMethod, RuntimeAssumption, SiteMethod,
    },
};
use common::*;
use rstest::rstest;

const INLINED: OpaqueMethod = OpaqueMethod(0x6100);
const INLINED_CLASS: OpaqueClass = OpaqueClass(0x6200);
const ROM_CLASS_OFFSET: u64 = 0x80;
const GUARD: usize = 0x20;
const SLOW_PATH: u64 = 0x60;

/// A runtime whose outermost method resolves cp index 5 virtually to
/// [`INLINED`], with the site inlining it still inactive.
fn inlining_runtime(options: RelocationOptions, rom_matches: bool) -> (MockRuntime, usize) {
    init_logger();
    let mut runtime = MockRuntime::with_options(options);
    runtime.add_method(INLINED, INLINED_CLASS, 0x6300);
    let site = runtime.add_site(SiteMethod::Inactive, None);
    for dispatch in [MethodDispatch::Virtual, MethodDispatch::Interface] {
        runtime.add_method_lookup(
            MethodQuery::FromCp {
                cp: METHOD_CP,
                cp_index: 5,
                dispatch,
                caller: Some(METHOD),
            },
            INLINED,
        );
    }
    runtime.set_rom_class(INLINED_CLASS, 0xF00D, ROM_CLASS_OFFSET);
    if !rom_matches {
        runtime.cache.insert(ROM_CLASS_OFFSET, 0xBAD);
    }
    (runtime, site)
}

fn nop_guard(kind: RecordKind, site: usize) -> aot_relo::RecordSpec {
    nop_guard_to(kind, site, OLD_START + SLOW_PATH)
}

fn nop_guard_to(kind: RecordKind, site: usize, destination_address: u64) -> aot_relo::RecordSpec {
    spec(
        kind,
        Payload::NopGuard {
            inlined_site_index: site as u64,
            constant_pool: 0x7000,
            cp_index: 5,
            rom_class_offset: ROM_CLASS_OFFSET,
            destination_address,
        },
    )
    .offset(GUARD as i32)
}

fn assert_jumps_to_slow_path(body: &[u8]) {
    let disp = SLOW_PATH as i32 - (GUARD as i32 + 5);
    assert_eq!(body[GUARD], 0xe9);
    assert_eq!(body[GUARD + 1..GUARD + 5], disp.to_le_bytes());
}

#[rstest]
fn valid_nop_guard_keeps_the_fast_path() {
    let (mut runtime, site) = inlining_runtime(RelocationOptions::new(), true);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[nop_guard(RecordKind::InlinedVirtualMethodWithNopGuard, site)],
    )
    .unwrap();

    assert_eq!(report.applied, 1);
    assert!(body.iter().all(|&b| b == 0));
    assert_eq!(runtime.sites[site].method, SiteMethod::Method(INLINED));
    assert_eq!(
        runtime.assumptions,
        [RuntimeAssumption::GuardOnMethodOverride {
            method: INLINED,
            location: NEW_START + GUARD as u64,
            destination: NEW_START + SLOW_PATH,
        }]
    );
    assert_eq!(runtime.stats.virtual_methods.succeeded, 1);
    assert_eq!(runtime.stats.inlined_method_relocated, 1);
}

#[rstest]
fn stale_nop_guard_branches_to_the_slow_path() {
    let (mut runtime, site) = inlining_runtime(RelocationOptions::new(), false);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[nop_guard(RecordKind::InlinedVirtualMethodWithNopGuard, site)],
    )
    .unwrap();

    assert_eq!(report.invalidated, 1);
    assert_jumps_to_slow_path(&body);
    assert_eq!(runtime.sites[site].method, SiteMethod::Inactive);
    assert!(runtime.assumptions.is_empty());
    assert_eq!(runtime.stats.virtual_methods.failed, 1);
}

#[rstest]
fn slow_path_out_of_jump_range_fails() {
    let (mut runtime, site) = inlining_runtime(RelocationOptions::new(), false);
    let far = OLD_START + 0x1_0000_0000 + SLOW_PATH;
    let mut body = code_body();
    let err = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[nop_guard_to(RecordKind::InlinedVirtualMethodWithNopGuard, site, far)],
    )
    .unwrap_err();

    assert_eq!(err.code(), RelocationErrorCode::InvalidRelocation);
    assert!(err.to_string().contains("cannot jump to"));
    assert!(body.iter().all(|&b| b == 0));
}

#[rstest]
#[case::disabled_site(RelocationOptions::new().disable_inline_site(0))]
#[case::no_class_hierarchy_optimisations(RelocationOptions::new().disable_ch_opts(true))]
fn options_can_veto_inlining(#[case] options: RelocationOptions) {
    let (mut runtime, site) = inlining_runtime(options, true);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[nop_guard(RecordKind::InlinedVirtualMethodWithNopGuard, site)],
    )
    .unwrap();
    assert_eq!(report.invalidated, 1);
    assert_jumps_to_slow_path(&body);
}

#[rstest]
fn hcr_guards_register_redefinition() {
    let (mut runtime, site) = inlining_runtime(RelocationOptions::new(), true);
    runtime.add_method_lookup(
        MethodQuery::FromCp {
            cp: METHOD_CP,
            cp_index: 5,
            dispatch: MethodDispatch::Special,
            caller: Some(METHOD),
        },
        INLINED,
    );
    let mut body = code_body();
    relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[nop_guard(RecordKind::InlinedHcrMethod, site)],
    )
    .unwrap();
    assert_eq!(
        runtime.assumptions,
        [RuntimeAssumption::GuardOnClassRedefinition {
            class: INLINED_CLASS,
            location: NEW_START + GUARD as u64,
            destination: NEW_START + SLOW_PATH,
        }]
    );
}

#[rstest]
fn interface_guard_needs_a_receiver_class() {
    let (mut runtime, site) = inlining_runtime(RelocationOptions::new(), true);
    let mut body = code_body();
    let record = spec(
        RecordKind::InlinedInterfaceMethod,
        Payload::InlinedMethod {
            inlined_site_index: site as u64,
            constant_pool: 0x7000,
            cp_index: 5,
            rom_class_offset: ROM_CLASS_OFFSET,
        },
    )
    .offset(GUARD as i32);
    let report = relocate(X86_64Target, &mut runtime, &mut body, &[record.clone()]).unwrap();
    assert_eq!(report.invalidated, 1);
    // Only nop guards are patched.
    assert!(body.iter().all(|&b| b == 0));

    let (mut runtime, site) = inlining_runtime(RelocationOptions::new(), true);
    runtime.add_class(
        ClassQuery::FromITableIndexCp {
            cp: METHOD_CP,
            cp_index: 5,
        },
        OpaqueClass(0x6400),
    );
    let report = relocate(X86_64Target, &mut runtime, &mut body, &[record]).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(runtime.sites[site].method, SiteMethod::Method(INLINED));
    assert_eq!(runtime.stats.interface_methods.succeeded, 1);
}

#[rstest]
#[case::size_matches(32, false)]
#[case::size_differs(48, true)]
fn inlined_allocation_checks_the_instance_size(#[case] compiled_size: u64, #[case] patched: bool) {
    let mut runtime = MockRuntime::new();
    let class = OpaqueClass(0x7100);
    runtime.add_class(
        ClassQuery::FromCp {
            cp: METHOD_CP,
            cp_index: 9,
        },
        class,
    );
    runtime.inline_sizes.insert(class, 32);
    let record = spec(
        RecordKind::VerifyClassObjectForAlloc,
        Payload::VerifyClassObjectForAlloc {
            inlined_site_index: outermost(&X86_64Target),
            constant_pool: 0x7000,
            cp_index: 9,
            branch_offset: SLOW_PATH - GUARD as u64,
            allocation_size: compiled_size,
        },
    )
    .offset(GUARD as i32);
    let mut body = code_body();
    let report = relocate(X86_64Target, &mut runtime, &mut body, &[record]).unwrap();

    if patched {
        assert_eq!(report.invalidated, 1);
        assert_jumps_to_slow_path(&body);
        assert_eq!(runtime.stats.inlined_allocations.failed, 1);
    } else {
        assert_eq!(report.applied, 1);
        assert!(body.iter().all(|&b| b == 0));
        assert_eq!(runtime.stats.inlined_allocations.succeeded, 1);
    }
}

const PROFILED: OpaqueClass = OpaqueClass(0x8100);
const PROFILED_METHOD: OpaqueMethod = OpaqueMethod(0x8200);
const OTHER_LOADER: OpaqueClassLoader = OpaqueClassLoader(0x30);

fn profiled_runtime(chain_matches: bool) -> (MockRuntime, usize) {
    init_logger();
    let mut runtime = MockRuntime::new();
    let site = runtime.add_site(SiteMethod::Inactive, None);
    runtime.add_method(PROFILED_METHOD, PROFILED, 0x8300);
    runtime.loaders.insert(PROFILED, OTHER_LOADER);
    runtime.chain_loaders.insert(0x90, OTHER_LOADER);
    runtime.add_class(
        ClassQuery::InLoader {
            loader: OTHER_LOADER,
            rom_class: CacheOffset(ROM_CLASS_OFFSET),
        },
        PROFILED,
    );
    if chain_matches {
        runtime.matching_chains.insert((PROFILED, 0xA0));
    }
    runtime.add_method_lookup(
        MethodQuery::VTableSlot {
            class: PROFILED,
            slot: 3,
        },
        PROFILED_METHOD,
    );
    (runtime, site)
}

fn profiled(kind: RecordKind, site: usize) -> aot_relo::RecordSpec {
    spec(
        kind,
        Payload::ProfiledInlinedMethod {
            inlined_site_index: site as u64,
            constant_pool: 0x7000,
            cp_index: 2,
            rom_class_offset: ROM_CLASS_OFFSET,
            loader_chain_offset: 0x90,
            class_chain_offset: 0xA0,
            vtable_slot: 3,
        },
    )
    .offset(GUARD as i32)
}

#[rstest]
#[case::class_guard(RecordKind::ProfiledClassGuard, PROFILED.raw())]
#[case::method_guard(RecordKind::ProfiledMethodGuard, PROFILED_METHOD.raw())]
fn profiled_guard_stores_the_profiled_value(#[case] kind: RecordKind, #[case] expected: u64) {
    let (mut runtime, site) = profiled_runtime(true);
    let mut body = code_body();
    let report = relocate(X86_64Target, &mut runtime, &mut body, &[profiled(kind, site)]).unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(read_u64_le(&body, GUARD), expected);
    assert_eq!(runtime.sites[site].method, SiteMethod::Method(PROFILED_METHOD));
    assert!(runtime.assumptions.contains(&RuntimeAssumption::ClassUnload {
        class: Some(PROFILED),
        location: NEW_START + GUARD as u64,
    }));
    assert!(runtime.assumptions.contains(&RuntimeAssumption::InlinedSiteUnload {
        class: PROFILED,
        site,
    }));
}

#[rstest]
fn stale_profiled_guard_never_matches() {
    let (mut runtime, site) = profiled_runtime(false);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[profiled(RecordKind::ProfiledClassGuard, site)],
    )
    .unwrap();
    assert_eq!(report.invalidated, 1);
    assert_eq!(read_u64_le(&body, GUARD), u64::MAX);
    assert_eq!(runtime.stats.profiled_class_guards.failed, 1);
}

#[rstest]
fn profiled_inlined_method_only_activates_its_site() {
    let (mut runtime, site) = profiled_runtime(true);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[profiled(RecordKind::ProfiledInlinedMethod, site)],
    )
    .unwrap();
    assert_eq!(report.applied, 1);
    assert!(body.iter().all(|&b| b == 0));
    assert_eq!(runtime.sites[site].method, SiteMethod::Method(PROFILED_METHOD));
}

fn class_pointer(kind: RecordKind, site: u64) -> aot_relo::RecordSpec {
    spec(
        kind,
        Payload::Pointer {
            inlined_site_index: site,
            loader_chain_offset: 0x90,
            class_chain_offset: 0xA0,
        },
    )
    .offset(GUARD as i32)
}

#[rstest]
fn class_pointer_of_an_inactive_site_is_all_ones() {
    let (mut runtime, site) = profiled_runtime(true);
    runtime.add_chain(0x90, OTHER_LOADER, 0xA0, PROFILED);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[class_pointer(RecordKind::ClassPointer, site as u64)],
    )
    .unwrap();
    assert_eq!(report.invalidated, 1);
    assert_eq!(read_u64_le(&body, GUARD), u64::MAX);
}

#[rstest]
fn class_pointer_of_an_active_site_is_the_class() {
    let mut runtime = MockRuntime::with_options(RelocationOptions::new().hcr_enabled(true));
    runtime.add_chain(0x90, APP_LOADER, 0xA0, PROFILED);
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[class_pointer(RecordKind::ClassPointer, outermost(&X86_64Target))],
    )
    .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(read_u64_le(&body, GUARD), PROFILED.raw());
    assert_eq!(
        runtime.assumptions,
        [RuntimeAssumption::ClassRedefinition {
            value: PROFILED.raw(),
            location: NEW_START + GUARD as u64,
            size: 8,
            unresolved: false,
        }]
    );
}

#[rstest]
fn arbitrary_class_must_come_from_the_system_loader() {
    let mut runtime = MockRuntime::new();
    runtime.add_chain(0x90, APP_LOADER, 0xA0, PROFILED);
    let mut body = code_body();
    let err = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[class_pointer(RecordKind::ArbitraryClassAddress, outermost(&X86_64Target))],
    )
    .unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::ClassValidationFailure);

    let mut runtime = MockRuntime::new();
    runtime.add_chain(0x90, SYSTEM_LOADER, 0xA0, PROFILED);
    let mut body = code_body();
    relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[class_pointer(RecordKind::ArbitraryClassAddress, outermost(&X86_64Target))],
    )
    .unwrap();
    assert_eq!(read_u64_le(&body, GUARD), PROFILED.raw());
}
