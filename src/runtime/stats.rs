/// Succeeded/failed counters for one family of guarded validations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidationCounts {
    pub succeeded: u64,
    pub failed: u64,
}

impl ValidationCounts {
    #[inline]
    pub(crate) fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Counters a host may collect while loading AOT code.
///
/// Returned by [`RelocationRuntime::stats`](crate::RelocationRuntime::stats);
/// a host that does not collect statistics returns `None` there.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AotStats {
    /// Class or data lookups that found no constant pool for their site.
    pub unresolved_cp: u64,
    /// Class lookups whose constant pool entry did not resolve.
    pub unresolved_class: u64,
    pub inlined_method_relocated: u64,
    pub inlined_method_validation_failed: u64,
    pub class_validations: u64,
    pub class_validations_failed: u64,
    pub static_methods: ValidationCounts,
    pub special_methods: ValidationCounts,
    pub virtual_methods: ValidationCounts,
    pub interface_methods: ValidationCounts,
    pub abstract_methods: ValidationCounts,
    pub profiled_inlined_methods: ValidationCounts,
    pub profiled_class_guards: ValidationCounts,
    pub profiled_method_guards: ValidationCounts,
    pub inlined_allocations: ValidationCounts,
}
