use crate::{
    runtime::{DebugCounter, OpaqueClass, OpaqueMethod, SiteMethod},
    svm::Symbol,
};

/// Values a record computes in its prepare phase and consumes when it is
/// applied at each of its locations.
///
/// Preparation runs once per record; application runs once per offset, so
/// anything that requires a runtime lookup is computed here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PrivateData {
    #[default]
    None,
    /// A resolved address to store.
    Address { address: u64 },
    /// A resolved method and the address to store for it.
    Method { method: OpaqueMethod, address: u64 },
    /// A helper entry point, possibly replaced by a trampoline at apply time.
    Helper { address: u64 },
    /// An inlined-method guard.
    InlinedMethod {
        failed: bool,
        method: Option<OpaqueMethod>,
        /// Class whose extension invalidates the guard (interface and
        /// abstract guards).
        receiver: Option<OpaqueClass>,
        destination: u64,
    },
    ProfiledGuard {
        failed: bool,
        guard_value: u64,
        class: Option<OpaqueClass>,
        need_unload: bool,
    },
    /// A class or method pointer.
    Pointer {
        activated: bool,
        pointer: u64,
        class: Option<OpaqueClass>,
        need_unload: bool,
    },
    InlinedAllocation { code_is_okay: bool },
    MethodTracingCheck { destination: u64 },
    EmitClass { method: SiteMethod, bc_index: i32 },
    DebugCounter { counter: DebugCounter },
    Symbol { symbol: Symbol },
}
