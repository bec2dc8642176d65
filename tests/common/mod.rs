#![allow(dead_code)]

use aot_relo::{
    AotStats, CodeBuffer, GroupWriter, Payload, RecordKind, RecordSpec, RelocationOptions,
    RelocationReport, RelocationTarget, Relocator, Result, TableWriter,
    runtime::{
        CacheOffset, ClassQuery, DebugCounter, InlinedSite, MethodQuery, OpaqueClass,
        OpaqueClassLoader, OpaqueMethod, RelocationRuntime, RuntimeAssumption, SiteMethod,
        ThunkLookup, YesNoMaybe,
    },
};
use rstest::fixture;
use std::collections::{HashMap, HashSet};

pub const NEW_START: u64 = 0x10_0000;
pub const OLD_START: u64 = 0x40_0000;
pub const CODE_LEN: usize = 0x100;

pub const METHOD: OpaqueMethod = OpaqueMethod(0x1000);
pub const METHOD_CLASS: OpaqueClass = OpaqueClass(0x2000);
pub const METHOD_CP: u64 = 0x3000;
pub const APP_LOADER: OpaqueClassLoader = OpaqueClassLoader(0x10);
pub const SYSTEM_LOADER: OpaqueClassLoader = OpaqueClassLoader(0x20);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[fixture]
pub fn runtime() -> MockRuntime {
    init_logger();
    MockRuntime::new()
}

/// Word-sized all-ones, the encoding of the outermost inlined site.
pub fn outermost<T: RelocationTarget>(target: &T) -> u64 {
    target.pointer_width().all_ones()
}

/// A host with just enough of a class model to drive every record kind.
pub struct MockRuntime {
    pub options: RelocationOptions,
    pub sites: Vec<InlinedSite>,
    pub method_cps: HashMap<OpaqueMethod, u64>,
    pub class_cps: HashMap<OpaqueClass, u64>,
    pub method_classes: HashMap<OpaqueMethod, OpaqueClass>,
    pub loaders: HashMap<OpaqueClass, OpaqueClassLoader>,
    pub rom_classes: HashMap<OpaqueClass, u64>,
    pub cache: HashMap<u64, u64>,
    pub classes: Vec<(ClassQuery, OpaqueClass)>,
    pub methods: Vec<(MethodQuery, OpaqueMethod)>,
    pub chain_loaders: HashMap<u64, OpaqueClassLoader>,
    pub matching_chains: HashSet<(OpaqueClass, u64)>,
    pub static_fields: HashMap<(u64, u32), u64>,
    pub helpers: HashMap<u32, u64>,
    pub helper_trampolines: HashMap<u32, u64>,
    pub thunks: HashMap<(u64, u32), ThunkLookup>,
    pub inline_sizes: HashMap<OpaqueClass, u64>,
    pub primitive_types: HashMap<OpaqueClass, u8>,
    pub instance_of: HashMap<(OpaqueClass, OpaqueClass), YesNoMaybe>,
    pub counter_names: HashMap<u64, String>,
    pub counters: Vec<DebugCounter>,
    pub enter_reported: bool,
    pub trampoline_budget: u32,
    pub assumptions: Vec<RuntimeAssumption>,
    pub class_records: Vec<(u64, i32, SiteMethod)>,
    pub stats: AotStats,
}

impl Default for MockRuntime {
    fn default() -> Self {
        let mut runtime = Self {
            options: RelocationOptions::new(),
            sites: Vec::new(),
            method_cps: HashMap::new(),
            class_cps: HashMap::new(),
            method_classes: HashMap::new(),
            loaders: HashMap::new(),
            rom_classes: HashMap::new(),
            cache: HashMap::new(),
            classes: Vec::new(),
            methods: Vec::new(),
            chain_loaders: HashMap::new(),
            matching_chains: HashSet::new(),
            static_fields: HashMap::new(),
            helpers: HashMap::new(),
            helper_trampolines: HashMap::new(),
            thunks: HashMap::new(),
            inline_sizes: HashMap::new(),
            primitive_types: HashMap::new(),
            instance_of: HashMap::new(),
            counter_names: HashMap::new(),
            counters: Vec::new(),
            enter_reported: false,
            trampoline_budget: u32::MAX,
            assumptions: Vec::new(),
            class_records: Vec::new(),
            stats: AotStats::default(),
        };
        runtime.add_method(METHOD, METHOD_CLASS, METHOD_CP);
        runtime
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RelocationOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Registers a method of `class`, loaded by the application loader.
    pub fn add_method(&mut self, method: OpaqueMethod, class: OpaqueClass, cp: u64) -> &mut Self {
        self.method_cps.insert(method, cp);
        self.method_classes.insert(method, class);
        self.class_cps.insert(class, cp);
        self.loaders.entry(class).or_insert(APP_LOADER);
        self
    }

    pub fn add_site(&mut self, method: SiteMethod, caller: Option<usize>) -> usize {
        self.sites.push(InlinedSite { method, caller });
        self.sites.len() - 1
    }

    pub fn add_class(&mut self, query: ClassQuery, class: OpaqueClass) -> &mut Self {
        self.classes.push((query, class));
        self
    }

    pub fn add_method_lookup(&mut self, query: MethodQuery, method: OpaqueMethod) -> &mut Self {
        self.methods.push((query, method));
        self
    }

    pub fn set_rom_class(
        &mut self,
        class: OpaqueClass,
        rom_class: u64,
        cache_offset: u64,
    ) -> &mut Self {
        self.rom_classes.insert(class, rom_class);
        self.cache.insert(cache_offset, rom_class);
        self
    }

    /// Makes `chain` resolve to `class` in `loader`.
    pub fn add_chain(
        &mut self,
        loader_chain: u64,
        loader: OpaqueClassLoader,
        chain: u64,
        class: OpaqueClass,
    ) -> &mut Self {
        self.chain_loaders.insert(loader_chain, loader);
        self.matching_chains.insert((class, chain));
        self.add_class(
            ClassQuery::FromChain {
                loader,
                chain: CacheOffset(chain),
            },
            class,
        )
    }
}

impl RelocationRuntime for MockRuntime {
    fn options(&self) -> &RelocationOptions {
        &self.options
    }

    fn new_code_start(&self) -> u64 {
        NEW_START
    }

    fn old_code_start(&self) -> u64 {
        OLD_START
    }

    fn method(&self) -> OpaqueMethod {
        METHOD
    }

    fn constant_pool(&self) -> u64 {
        METHOD_CP
    }

    fn body_info(&self) -> u64 {
        0xB0D1
    }

    fn constant_pool_of(&self, method: OpaqueMethod) -> u64 {
        self.method_cps.get(&method).copied().unwrap_or(0)
    }

    fn constant_pool_of_class(&self, class: OpaqueClass) -> u64 {
        self.class_cps.get(&class).copied().unwrap_or(0)
    }

    fn class_of_method(&self, method: OpaqueMethod) -> OpaqueClass {
        self.method_classes[&method]
    }

    fn class_loader_of(&self, class: OpaqueClass) -> OpaqueClassLoader {
        self.loaders.get(&class).copied().unwrap_or(APP_LOADER)
    }

    fn system_class_loader(&self) -> OpaqueClassLoader {
        SYSTEM_LOADER
    }

    fn rom_class_of(&self, class: OpaqueClass) -> u64 {
        self.rom_classes.get(&class).copied().unwrap_or(0)
    }

    fn pointer_from_cache_offset(&self, offset: CacheOffset) -> Option<u64> {
        self.cache.get(&offset.raw()).copied()
    }

    fn inlined_site(&self, index: usize) -> Option<InlinedSite> {
        self.sites.get(index).copied()
    }

    fn set_inlined_site_method(&mut self, index: usize, method: OpaqueMethod) {
        self.sites[index].method = SiteMethod::Method(method);
    }

    fn lookup_class(&mut self, query: ClassQuery) -> Option<OpaqueClass> {
        self.classes
            .iter()
            .find(|(q, _)| *q == query)
            .map(|(_, class)| *class)
    }

    fn lookup_method(&mut self, query: MethodQuery) -> Option<OpaqueMethod> {
        self.methods
            .iter()
            .find(|(q, _)| *q == query)
            .map(|(_, method)| *method)
    }

    fn class_loader_for_chain(&self, chain: CacheOffset) -> Option<OpaqueClassLoader> {
        self.chain_loaders.get(&chain.raw()).copied()
    }

    fn class_matches_cached_version(&self, class: OpaqueClass, chain: CacheOffset) -> bool {
        self.matching_chains.contains(&(class, chain.raw()))
    }

    fn static_field_address(&mut self, cp: u64, cp_index: u32) -> Option<u64> {
        self.static_fields.get(&(cp, cp_index)).copied()
    }

    fn helper_address(&self, helper: u32) -> Option<u64> {
        self.helpers.get(&helper).copied()
    }

    fn register_assumption(&mut self, assumption: RuntimeAssumption) -> Result<()> {
        self.assumptions.push(assumption);
        Ok(())
    }

    fn primitive_type_of(&self, class: OpaqueClass) -> Option<u8> {
        self.primitive_types.get(&class).copied()
    }

    fn is_instance_of(
        &self,
        class: OpaqueClass,
        cast: OpaqueClass,
        _object_type_is_fixed: bool,
        _cast_type_is_fixed: bool,
    ) -> YesNoMaybe {
        self.instance_of
            .get(&(class, cast))
            .copied()
            .unwrap_or(YesNoMaybe::Maybe)
    }

    fn method_enter_reported(&self, method: OpaqueMethod) -> bool {
        self.enter_reported && method == METHOD
    }

    fn helper_trampoline(&mut self, helper: u32, _call_site: u64) -> Option<u64> {
        self.helper_trampolines.get(&helper).copied()
    }

    fn find_or_create_thunk(&mut self, cp: u64, cp_index: u32) -> ThunkLookup {
        self.thunks
            .get(&(cp, cp_index))
            .copied()
            .unwrap_or(ThunkLookup::Missing)
    }

    fn reserve_trampolines(&mut self, count: u32) -> bool {
        match self.trampoline_budget.checked_sub(count) {
            Some(left) => {
                self.trampoline_budget = left;
                true
            }
            None => false,
        }
    }

    fn inline_allocation_size(&self, class: OpaqueClass) -> Option<u64> {
        self.inline_sizes.get(&class).copied()
    }

    fn debug_counter_name(&self, offset: CacheOffset) -> Option<String> {
        self.counter_names.get(&offset.raw()).cloned()
    }

    fn find_or_create_debug_counter(&mut self, counter: &DebugCounter) -> Option<u64> {
        self.counters.push(counter.clone());
        Some(0xC0_0000 + self.counters.len() as u64 * 8)
    }

    fn add_class_record(&mut self, location: u64, bc_index: i32, method: SiteMethod) {
        self.class_records.push((location, bc_index, method));
    }

    fn stats(&mut self) -> Option<&mut AotStats> {
        Some(&mut self.stats)
    }
}

/// A zeroed code body loaded at [`NEW_START`].
pub fn code_body() -> Vec<u8> {
    vec![0; CODE_LEN]
}

/// Encodes `records` as a single-group table for `target`.
pub fn table<T: RelocationTarget>(target: &T, records: &[RecordSpec]) -> Vec<u8> {
    let mut group = GroupWriter::new(target);
    for record in records {
        group.push(record).unwrap();
    }
    let mut table = TableWriter::new();
    table.push_group(group);
    table.finish()
}

pub fn relocate<T: RelocationTarget + Copy>(
    target: T,
    runtime: &mut MockRuntime,
    body: &mut [u8],
    records: &[RecordSpec],
) -> Result<RelocationReport> {
    init_logger();
    let table = table(&target, records);
    let mut code = CodeBuffer::new(body, NEW_START);
    Relocator::new(&table, target).relocate(runtime, &mut code)
}

pub fn spec(kind: RecordKind, payload: Payload) -> RecordSpec {
    RecordSpec::new(kind, payload)
}

pub fn read_u64_le(body: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(body[offset..offset + 8].try_into().unwrap())
}

pub fn write_u64_le(body: &mut [u8], offset: usize, value: u64) {
    body[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn read_u32_be(body: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap())
}
