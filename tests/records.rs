mod common;

use aot_relo::{
    GroupWriter, Payload, Ppc32Target, RecordFlags, RecordKind, RecordSpec, RelocationErrorCode,
    RelocationOptions, RelocationRecord, RelocationTable, RelocationTarget, TableWriter,
    X86_64Target,
    runtime::{
        ClassQuery, MethodDispatch, MethodQuery, OpaqueClass, OpaqueMethod, RuntimeAssumption,
        SiteMethod, ThunkLookup,
    },
};
use common::*;
use rstest::rstest;

const COMPILED_CP: u64 = 0x7000;

fn outer() -> u64 {
    outermost(&X86_64Target)
}

fn cp_with_index(kind: RecordKind, cp_index: u64) -> RecordSpec {
    spec(
        kind,
        Payload::ConstantPoolWithIndex {
            inlined_site_index: outer(),
            constant_pool: COMPILED_CP,
            cp_index,
        },
    )
    .offset(0x10)
}

fn cp_record(kind: RecordKind) -> RecordSpec {
    spec(
        kind,
        Payload::ConstantPool {
            inlined_site_index: outer(),
            constant_pool: COMPILED_CP,
        },
    )
    .offset(0x10)
}

#[rstest]
fn data_address_adds_the_field_offset(mut runtime: MockRuntime) {
    runtime.static_fields.insert((METHOD_CP, 4), 0x9000);
    let record = spec(
        RecordKind::DataAddress,
        Payload::DataAddress {
            inlined_site_index: outer(),
            constant_pool: COMPILED_CP,
            cp_index: 4,
            offset: 8,
        },
    )
    .offset(0x10);
    let mut body = code_body();
    relocate(X86_64Target, &mut runtime, &mut body, &[record.clone()]).unwrap();
    assert_eq!(read_u64_le(&body, 0x10), 0x9008);

    let mut runtime = MockRuntime::new();
    let err = relocate(X86_64Target, &mut runtime, &mut code_body(), &[record]).unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::StaticFieldResolutionFailure);
}

#[rstest]
#[case::without_hcr(false)]
#[case::with_hcr(true)]
fn class_object_is_resolved_through_the_constant_pool(#[case] hcr: bool) {
    let class = OpaqueClass(0x8800);
    let mut runtime = MockRuntime::with_options(RelocationOptions::new().hcr_enabled(hcr));
    runtime.add_class(
        ClassQuery::FromCp {
            cp: METHOD_CP,
            cp_index: 3,
        },
        class,
    );
    let mut body = code_body();
    relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[cp_with_index(RecordKind::ClassObject, 3)],
    )
    .unwrap();

    assert_eq!(read_u64_le(&body, 0x10), class.raw());
    let expected = hcr.then_some(RuntimeAssumption::ClassRedefinition {
        value: class.raw(),
        location: NEW_START + 0x10,
        size: 8,
        unresolved: false,
    });
    assert_eq!(runtime.assumptions, expected.into_iter().collect::<Vec<_>>());
}

#[rstest]
fn unresolved_class_object_fails(mut runtime: MockRuntime) {
    let err = relocate(
        X86_64Target,
        &mut runtime,
        &mut code_body(),
        &[cp_with_index(RecordKind::ClassAddress, 3)],
    )
    .unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::ClassValidationFailure);
    assert_eq!(runtime.stats.unresolved_class, 1);
}

#[rstest]
fn ram_method_constant_names_the_resolved_method(mut runtime: MockRuntime) {
    let method = OpaqueMethod(0x6600);
    runtime.add_method_lookup(
        MethodQuery::FromCp {
            cp: METHOD_CP,
            cp_index: 5,
            dispatch: MethodDispatch::Static,
            caller: None,
        },
        method,
    );
    let mut body = code_body();
    relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[cp_with_index(RecordKind::StaticRamMethodConst, 5)],
    )
    .unwrap();
    assert_eq!(read_u64_le(&body, 0x10), method.raw());

    // The same entry read with virtual dispatch does not resolve.
    let err = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[cp_with_index(RecordKind::VirtualRamMethodConst, 5)],
    )
    .unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::MethodResolutionFailure);
}

#[rstest]
fn method_object_keeps_its_offset_into_the_constant_pool(mut runtime: MockRuntime) {
    let mut body = code_body();
    write_u64_le(&mut body, 0x10, COMPILED_CP + 0x40);
    relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[cp_record(RecordKind::MethodObject)],
    )
    .unwrap();
    assert_eq!(read_u64_le(&body, 0x10), METHOD_CP + 0x40);
}

#[rstest]
#[case::found(ThunkLookup::Found(0xDEAD), None)]
#[case::cache_full(ThunkLookup::CacheFull, Some(RelocationErrorCode::CodeCacheFull))]
#[case::missing(ThunkLookup::Missing, Some(RelocationErrorCode::ThunkFailure))]
fn thunks_are_looked_up_by_the_embedded_cp_index(
    mut runtime: MockRuntime,
    #[case] lookup: ThunkLookup,
    #[case] error: Option<RelocationErrorCode>,
) {
    runtime.thunks.insert((METHOD_CP, 9), lookup);
    let mut body = code_body();
    // The cp index follows the constant pool word.
    body[0x18..0x1C].copy_from_slice(&9u32.to_le_bytes());
    let result = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[cp_record(RecordKind::Thunks)],
    );
    assert_eq!(result.err().map(|err| err.code()), error);
    assert_eq!(read_u64_le(&body, 0x10), METHOD_CP);
}

#[rstest]
fn trampolines_store_the_new_constant_pool(mut runtime: MockRuntime) {
    let mut body = code_body();
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut body,
        &[cp_record(RecordKind::Trampolines)],
    )
    .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(read_u64_le(&body, 0x10), METHOD_CP);
}

#[rstest]
fn pic_trampolines_respect_the_budget(mut runtime: MockRuntime) {
    runtime.trampoline_budget = 4;
    let pic = spec(
        RecordKind::PicTrampolines,
        Payload::PicTrampolines { num_trampolines: 3 },
    )
    .offset(0x10);
    let err = relocate(
        X86_64Target,
        &mut runtime,
        &mut code_body(),
        &[pic.clone(), pic],
    )
    .unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::PicTrampolineFailure);
    assert_eq!(runtime.trampoline_budget, 1);
}

#[rstest]
#[case::byte_site(0, 0, u64::MAX, 1)]
#[case::full_word_site(0, 1, u64::MAX, 8)]
#[case::method_site(0x40, 0, METHOD.raw(), 8)]
fn hcr_sites_are_registered(
    #[case] offset: u64,
    #[case] relo_flags: u8,
    #[case] value: u64,
    #[case] size: usize,
) {
    let record = spec(RecordKind::Hcr, Payload::WithOffset { offset })
        .relo_flags(relo_flags)
        .offset(0x10);

    let mut runtime = MockRuntime::new();
    let report = relocate(X86_64Target, &mut runtime, &mut code_body(), &[record.clone()]).unwrap();
    assert_eq!(report.ignored, 1);
    assert!(runtime.assumptions.is_empty());

    let mut runtime = MockRuntime::with_options(RelocationOptions::new().hcr_enabled(true));
    relocate(X86_64Target, &mut runtime, &mut code_body(), &[record]).unwrap();
    assert_eq!(
        runtime.assumptions,
        [RuntimeAssumption::ClassRedefinition {
            value,
            location: NEW_START + 0x10,
            size,
            unresolved: true,
        }]
    );
}

#[rstest]
fn method_enter_check_jumps_only_when_reported(mut runtime: MockRuntime) {
    let record = spec(
        RecordKind::CheckMethodEnter,
        Payload::MethodTracingCheck {
            destination_address: OLD_START + 0x80,
        },
    )
    .offset(0x10);
    let mut body = code_body();
    let report = relocate(X86_64Target, &mut runtime, &mut body, &[record.clone()]).unwrap();
    assert_eq!(report.ignored, 1);
    assert!(body.iter().all(|&b| b == 0));

    runtime.enter_reported = true;
    relocate(X86_64Target, &mut runtime, &mut body, &[record]).unwrap();
    let disp = (0x80 - (0x10 + 5)) as i32;
    assert_eq!(body[0x10], 0xE9);
    assert_eq!(body[0x11..0x15], disp.to_le_bytes());
}

fn debug_counter(name_offset: u64) -> RecordSpec {
    spec(
        RecordKind::DebugCounter,
        Payload::DebugCounter {
            inlined_site_index: outer(),
            bc_index: 3,
            name_offset,
            delta: 0,
            fidelity: 1,
            static_delta: 0,
        },
    )
    .offset(0x10)
}

#[rstest]
fn debug_counters_are_created_when_enabled() {
    let mut runtime = MockRuntime::new();
    runtime.counter_names.insert(0x500, "calls".into());
    let report = relocate(
        X86_64Target,
        &mut runtime,
        &mut code_body(),
        &[debug_counter(0x500)],
    )
    .unwrap();
    assert_eq!(report.ignored, 1);
    assert!(runtime.counters.is_empty());

    let mut runtime = MockRuntime::with_options(RelocationOptions::new().debug_counters(true));
    runtime.counter_names.insert(0x500, "calls".into());
    let mut body = code_body();
    relocate(X86_64Target, &mut runtime, &mut body, &[debug_counter(0x500)]).unwrap();
    assert_eq!(runtime.counters.len(), 1);
    assert_eq!(runtime.counters[0].name, "calls");
    assert_eq!(runtime.counters[0].method, None);
    assert_eq!(read_u64_le(&body, 0x10), 0xC0_0008);

    let err = relocate(X86_64Target, &mut runtime, &mut body, &[debug_counter(0x600)]).unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::DebugCounterFailure);
}

#[rstest]
fn emit_class_records_the_site_method(mut runtime: MockRuntime) {
    let record = spec(
        RecordKind::EmitClass,
        Payload::EmitClass {
            inlined_site_index: outer(),
            bc_index: 12,
        },
    )
    .offset(0x30);
    relocate(X86_64Target, &mut runtime, &mut code_body(), &[record]).unwrap();
    assert_eq!(
        runtime.class_records,
        [(NEW_START + 0x30, 12, SiteMethod::Method(METHOD))]
    );
}

#[rstest]
#[case::inactive(SiteMethod::Inactive)]
#[case::unloaded(SiteMethod::Unloaded)]
fn unavailable_sites_patch_nothing(mut runtime: MockRuntime, #[case] method: SiteMethod) {
    let site = runtime.add_site(method, None);
    let record = spec(
        RecordKind::ConstantPool,
        Payload::ConstantPool {
            inlined_site_index: site as u64,
            constant_pool: COMPILED_CP,
        },
    )
    .offset(0x10);
    let mut body = code_body();
    write_u64_le(&mut body, 0x10, COMPILED_CP);
    let report = relocate(X86_64Target, &mut runtime, &mut body, &[record]).unwrap();
    assert_eq!(report.ignored, 1);
    assert_eq!(read_u64_le(&body, 0x10), COMPILED_CP);
}

#[rstest]
fn method_addresses_move_with_the_code(mut runtime: MockRuntime) {
    let mut body = code_body();
    write_u64_le(&mut body, 0x10, OLD_START + 0x44);
    let records = [
        spec(RecordKind::AbsoluteMethodAddress, Payload::Empty {}).offset(0x10),
        spec(
            RecordKind::MethodCallAddress,
            Payload::MethodCallAddress {
                method_address: OLD_START + 0x90,
            },
        )
        .eip_relative()
        .offset(0x20),
    ];
    relocate(X86_64Target, &mut runtime, &mut body, &records).unwrap();
    assert_eq!(read_u64_le(&body, 0x10), NEW_START + 0x44);
    assert_eq!(body[0x20..0x24], 0x6Ci32.to_le_bytes());
}

#[rstest]
fn stressed_helper_calls_go_through_trampolines() {
    let options = RelocationOptions::new().stress_trampolines(true);
    let record = spec(RecordKind::HelperAddress, Payload::Helper { helper_id: 7 })
        .eip_relative()
        .offset(0x20);

    let mut runtime = MockRuntime::with_options(options.clone());
    runtime.helpers.insert(7, 0x1234_5678);
    runtime.helper_trampolines.insert(7, NEW_START + 0x80);
    let mut body = code_body();
    relocate(X86_64Target, &mut runtime, &mut body, &[record.clone()]).unwrap();
    assert_eq!(body[0x20..0x24], 0x5Ci32.to_le_bytes());

    let mut runtime = MockRuntime::with_options(options);
    runtime.helpers.insert(7, 0x1234_5678);
    let err = relocate(X86_64Target, &mut runtime, &mut code_body(), &[record]).unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::HelperNotFound);
}

#[rstest]
fn runtime_words_are_written_as_is(mut runtime: MockRuntime) {
    let records = [
        spec(RecordKind::BodyInfoAddress, Payload::Empty {}).offset(0x10),
        spec(RecordKind::RamMethod, Payload::Empty {}).offset(0x18),
        spec(RecordKind::FixedSequenceAddress, Payload::WithOffset { offset: 0x40 }).offset(0x20),
        spec(RecordKind::FixedSequenceAddress2, Payload::WithOffset { offset: 0 }).offset(0x28),
        spec(RecordKind::ClassUnloadAssumption, Payload::Empty {}).offset(0x30),
    ];
    let mut body = code_body();
    write_u64_le(&mut body, 0x28, 0xFFFF);
    let report = relocate(X86_64Target, &mut runtime, &mut body, &records).unwrap();

    assert_eq!(report.applied, records.len());
    assert_eq!(read_u64_le(&body, 0x10), 0xB0D1);
    assert_eq!(read_u64_le(&body, 0x18), METHOD.raw());
    assert_eq!(read_u64_le(&body, 0x20), NEW_START + 0x40);
    assert_eq!(read_u64_le(&body, 0x28), 0);
    assert_eq!(
        runtime.assumptions,
        [RuntimeAssumption::ClassUnload {
            class: None,
            location: NEW_START + 0x30,
        }]
    );
}

#[rstest]
#[case::class(RecordKind::ValidateClass, RelocationErrorCode::ClassValidationFailure)]
#[case::instance_field(
    RecordKind::ValidateInstanceField,
    RelocationErrorCode::FieldValidationFailure
)]
fn class_validation_compares_class_chains(
    #[case] kind: RecordKind,
    #[case] failure: RelocationErrorCode,
) {
    let class = OpaqueClass(0x8900);
    let query = match kind {
        RecordKind::ValidateClass => ClassQuery::FromCp {
            cp: METHOD_CP,
            cp_index: 3,
        },
        _ => ClassQuery::DefiningFromCp {
            cp: METHOD_CP,
            cp_index: 3,
            is_static: false,
        },
    };
    let record = |chain: u64| {
        spec(
            kind,
            Payload::ValidateClass {
                inlined_site_index: outer(),
                constant_pool: COMPILED_CP,
                cp_index: 3,
                class_chain_offset: chain,
            },
        )
    };
    let mut runtime = MockRuntime::new();
    runtime.add_class(query, class);
    runtime.matching_chains.insert((class, 0xC0));

    let report = relocate(X86_64Target, &mut runtime, &mut code_body(), &[record(0xC0)]).unwrap();
    assert_eq!(report.applied, 1);
    let err = relocate(X86_64Target, &mut runtime, &mut code_body(), &[record(0xC8)]).unwrap_err();
    assert_eq!(err.code(), failure);
    assert_eq!(runtime.stats.class_validations, 2);
    assert_eq!(runtime.stats.class_validations_failed, 1);
}

#[rstest]
fn arbitrary_class_needs_its_loader(mut runtime: MockRuntime) {
    let record = spec(
        RecordKind::ValidateArbitraryClass,
        Payload::ValidateArbitraryClass {
            loader_chain_offset: 0xD0,
            class_chain_offset: 0xE0,
        },
    );
    let err = relocate(
        X86_64Target,
        &mut runtime,
        &mut code_body(),
        &[record.clone()],
    )
    .unwrap_err();
    assert_eq!(err.code(), RelocationErrorCode::ClassValidationFailure);

    runtime.add_chain(0xD0, APP_LOADER, 0xE0, OpaqueClass(0x8A00));
    relocate(X86_64Target, &mut runtime, &mut code_body(), &[record]).unwrap();
}

/// Decodes a payload of `kind`'s shape from a patterned byte run, so that
/// every field carries a distinct non-zero value.
fn patterned_payload(kind: RecordKind, target: &dyn RelocationTarget) -> Payload {
    const SIZE: usize = 72;
    let mut bytes = vec![0u8; SIZE];
    target.endian().write_uint(&mut bytes[..2], SIZE as u64);
    bytes[2] = kind.raw();
    for (i, b) in bytes[8..].iter_mut().enumerate() {
        *b = 0x11 + i as u8;
    }
    *RelocationRecord::create(&bytes, target).unwrap().payload()
}

#[rstest]
fn every_kind_survives_a_write_and_parse(
    #[values(&X86_64Target as &dyn RelocationTarget, &Ppc32Target as &dyn RelocationTarget)]
    target: &dyn RelocationTarget,
    #[values(false, true)] wide: bool,
    #[values(false, true)] eip_relative: bool,
    #[values(false, true)] ordered_pair: bool,
) {
    let offsets: [i32; 4] = if wide {
        [0x10, -0x8, 0x1_0000, -0x2_0000]
    } else {
        [0x10, -0x8, 0x7ff0, -0x7ff0]
    };
    for &kind in RecordKind::ALL {
        let payload = patterned_payload(kind, target);
        assert_eq!(payload.shape(), kind.shape());

        let mut record = spec(kind, payload).relo_flags(0x5).offsets(offsets);
        if wide {
            record = record.wide_offsets();
        }
        if eip_relative {
            record = record.eip_relative();
        }
        if ordered_pair {
            record = record.ordered_pair();
        }
        let mut group = GroupWriter::new(target);
        group.push(&record).unwrap();
        let mut table = TableWriter::new();
        table.push_group(group);
        let bytes = table.finish();

        let groups: Vec<_> = RelocationTable::new(&bytes, target)
            .groups()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(groups.len(), 1);
        let records: Vec<_> = groups[0].records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1, "{kind}");
        let decoded = &records[0];

        assert_eq!(decoded.kind(), kind);
        assert_eq!(*decoded.payload(), payload, "{kind}");
        assert_eq!(decoded.relo_flags(), 0x5);
        assert_eq!(decoded.flags(), record.encoded_flags(), "{kind}");
        assert_eq!(decoded.flags().contains(RecordFlags::WIDE_OFFSETS), wide);
        assert_eq!(decoded.flags().contains(RecordFlags::EIP_RELATIVE), eip_relative);
        assert_eq!(decoded.flags().contains(RecordFlags::ORDERED_PAIR), ordered_pair);
        assert_eq!(decoded.offsets().collect::<Vec<_>>(), offsets);
        assert_eq!(decoded.size() as usize, bytes.len() - target.word_size(), "{kind}");
    }
}
