//! The host services consulted while relocating.
//!
//! The relocation core never inspects the managed runtime's object model.
//! Classes, methods and class loaders are opaque handles, and every question
//! about them is a narrow query on [`RelocationRuntime`].

mod stats;

use crate::{RelocationOptions, Result};
use alloc::string::String;

pub use stats::{AotStats, ValidationCounts};

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// The raw handle value.
            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// A loaded class.
    OpaqueClass
);
opaque_handle!(
    /// A loaded method.
    OpaqueMethod
);
opaque_handle!(
    /// A class loader.
    OpaqueClassLoader
);
opaque_handle!(
    /// An offset into the shared class cache (class chains, ROM classes,
    /// ROM methods, debug counter names).
    CacheOffset
);

/// The method currently associated with an inlined call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteMethod {
    /// The site has not been validated yet, or its validation failed.
    Inactive,
    /// The inlined method's class has been unloaded.
    Unloaded,
    Method(OpaqueMethod),
}

impl SiteMethod {
    #[inline]
    pub fn method(self) -> Option<OpaqueMethod> {
        match self {
            SiteMethod::Method(method) => Some(method),
            _ => None,
        }
    }

    #[inline]
    pub fn is_inactive(self) -> bool {
        matches!(self, SiteMethod::Inactive)
    }
}

/// One entry of the compiled body's inlined call site table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlinedSite {
    pub method: SiteMethod,
    /// Index of the calling site, `None` for the outermost method.
    pub caller: Option<usize>,
}

/// The JVM dispatch rule used to resolve a method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodDispatch {
    Static,
    Special,
    /// Resolves to `None` when the method is overridden.
    Virtual,
    /// Resolves to the single implementer, `None` if there is more than one.
    Interface,
    /// Resolves to the single implementer of an abstract method.
    Abstract,
}

/// A three-valued answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNoMaybe {
    Yes,
    No,
    Maybe,
}

impl YesNoMaybe {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => YesNoMaybe::No,
            1 => YesNoMaybe::Yes,
            _ => YesNoMaybe::Maybe,
        }
    }
}

/// Outcome of a thunk lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThunkLookup {
    Found(u64),
    /// A thunk exists but there is no room to install it.
    CacheFull,
    Missing,
}

/// Queries answered with a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassQuery {
    /// Resolve the class entry `cp_index` of the constant pool at `cp`.
    FromCp { cp: u64, cp_index: u32 },
    /// The class that defines the field referenced by `cp_index`.
    DefiningFromCp { cp: u64, cp_index: u32, is_static: bool },
    /// The class of the static field referenced by `cp_index`.
    StaticFromCp { cp: u64, cp_index: u32 },
    /// The interface class of the method reference `cp_index`.
    FromITableIndexCp { cp: u64, cp_index: u32 },
    /// The declaring class of the field or static referenced by `cp_index`.
    DeclaringFromFieldOrStatic { cp: u64, cp_index: i32 },
    /// The class named by a ROM class, as seen from a constant pool.
    ByName { cp: u64, rom_class: CacheOffset },
    /// The class named by a ROM class in the system class loader.
    SystemByName { rom_class: CacheOffset },
    /// The class named by a ROM class in a class loader.
    InLoader { loader: OpaqueClassLoader, rom_class: CacheOffset },
    /// The class identified by a class chain in a class loader.
    FromChain { loader: OpaqueClassLoader, chain: CacheOffset },
    ComponentOf(OpaqueClass),
    ArrayOf(OpaqueClass),
    SuperOf(OpaqueClass),
    /// The `Class` class of an object class.
    ClassClassOf(OpaqueClass),
    /// The single concrete subclass of a class.
    ConcreteSubclassOf(OpaqueClass),
    /// A primitive array class from the VM's well-known table.
    ArrayFromJavaVm { index: i32 },
}

/// Queries answered with a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodQuery {
    /// Resolve the method reference `cp_index` with the given dispatch rule.
    /// `caller` is the method the reference appears in.
    FromCp {
        cp: u64,
        cp_index: u32,
        dispatch: MethodDispatch,
        caller: Option<OpaqueMethod>,
    },
    InterfaceFromCp { cp: u64, lookup: OpaqueClass, cp_index: u32 },
    ImproperInterfaceFromCp { cp: u64, cp_index: u32 },
    VirtualFromOffset { class: OpaqueClass, offset: i32, ignore_rt_resolve: bool },
    ByName { cp: u64, rom_class: CacheOffset, rom_method: CacheOffset },
    /// The `index`-th method of a class.
    FromClass { class: OpaqueClass, index: u32 },
    FromClassAndSignature { class: OpaqueClass, beholder: OpaqueClass, rom_method: CacheOffset },
    /// The method in vtable slot `slot` of a class.
    VTableSlot { class: OpaqueClass, slot: u64 },
    SingleImplementer {
        this_class: OpaqueClass,
        cp_index_or_slot: i32,
        caller: OpaqueMethod,
        use_resolved_interface_method: YesNoMaybe,
    },
    SingleInterfaceImplementer { this_class: OpaqueClass, cp_index: i32, caller: OpaqueMethod },
    SingleAbstractImplementer { this_class: OpaqueClass, vft_slot: i32, caller: OpaqueMethod },
}

/// A fact the loaded code relies on, registered so the host can repatch the
/// code if it stops holding.
///
/// Registration is append-only; the relocation core never removes entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeAssumption {
    /// Repatch `location` when `class` is unloaded. `None` stands for any
    /// class unload.
    ClassUnload { class: Option<OpaqueClass>, location: u64 },
    /// Repatch the `size` bytes at `location` holding `value` (a class or
    /// method pointer) when its class is redefined.
    ClassRedefinition { value: u64, location: u64, size: usize, unresolved: bool },
    /// Patch the guard at `location` to `destination` when `class` is
    /// redefined.
    GuardOnClassRedefinition { class: OpaqueClass, location: u64, destination: u64 },
    /// Patch the guard when `method` is overridden.
    GuardOnMethodOverride { method: OpaqueMethod, location: u64, destination: u64 },
    /// Patch the guard when any subclass of `class` gains an implementation.
    GuardOnSubclassExtension { class: OpaqueClass, location: u64, destination: u64 },
    /// A direct JNI call to `method` at `location`.
    JniCallSite { method: OpaqueMethod, location: u64 },
    /// Deactivate inlined site `site` when `class` is unloaded.
    InlinedSiteUnload { class: OpaqueClass, site: usize },
}

/// A debug counter requested by the compiled code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugCounter {
    pub name: String,
    /// The inlined site method, when the record names a site.
    pub method: Option<SiteMethod>,
    pub bc_index: i32,
    /// Non-zero for aggregate counters.
    pub delta: i32,
    pub fidelity: u8,
    pub static_delta: i32,
}

impl DebugCounter {
    #[inline]
    pub fn is_aggregate(&self) -> bool {
        self.delta != 0
    }
}

/// Host services for one code body being loaded.
///
/// Methods with defaults describe optional services; a host that does not
/// provide them gets the conservative answer (nothing found, nothing
/// reported).
pub trait RelocationRuntime {
    fn options(&self) -> &RelocationOptions;

    /// Address the code body has been loaded at.
    fn new_code_start(&self) -> u64;

    /// Address the code body started at when it was compiled.
    fn old_code_start(&self) -> u64;

    /// The method being loaded.
    fn method(&self) -> OpaqueMethod;

    /// Constant pool of the method being loaded.
    fn constant_pool(&self) -> u64;

    /// Address of the body info of the method being loaded.
    fn body_info(&self) -> u64;

    fn constant_pool_of(&self, method: OpaqueMethod) -> u64;

    fn constant_pool_of_class(&self, class: OpaqueClass) -> u64;

    fn class_of_method(&self, method: OpaqueMethod) -> OpaqueClass;

    fn class_loader_of(&self, class: OpaqueClass) -> OpaqueClassLoader;

    /// The bootstrap class loader.
    fn system_class_loader(&self) -> OpaqueClassLoader;

    /// Shared-cache address of a class's ROM class.
    fn rom_class_of(&self, class: OpaqueClass) -> u64;

    fn pointer_from_cache_offset(&self, offset: CacheOffset) -> Option<u64>;

    fn inlined_site(&self, index: usize) -> Option<InlinedSite>;

    fn set_inlined_site_method(&mut self, index: usize, method: OpaqueMethod);

    fn lookup_class(&mut self, query: ClassQuery) -> Option<OpaqueClass>;

    fn lookup_method(&mut self, query: MethodQuery) -> Option<OpaqueMethod>;

    /// The class loader that loaded the first class of `chain`.
    fn class_loader_for_chain(&self, chain: CacheOffset) -> Option<OpaqueClassLoader>;

    fn class_matches_cached_version(&self, class: OpaqueClass, chain: CacheOffset) -> bool;

    fn static_field_address(&mut self, cp: u64, cp_index: u32) -> Option<u64>;

    fn helper_address(&self, helper: u32) -> Option<u64>;

    fn register_assumption(&mut self, assumption: RuntimeAssumption) -> Result<()>;

    /// Strips array dimensions from a class.
    fn base_component_class(&self, class: OpaqueClass) -> OpaqueClass {
        class
    }

    /// Signature character of a primitive class.
    fn primitive_type_of(&self, class: OpaqueClass) -> Option<u8> {
        let _ = class;
        None
    }

    fn is_instance_of(
        &self,
        class: OpaqueClass,
        cast: OpaqueClass,
        object_type_is_fixed: bool,
        cast_type_is_fixed: bool,
    ) -> YesNoMaybe {
        let _ = (class, cast, object_type_is_fixed, cast_type_is_fixed);
        YesNoMaybe::Maybe
    }

    fn stack_walker_may_skip_frames(&self, method: OpaqueMethod, class: OpaqueClass) -> bool {
        let _ = (method, class);
        false
    }

    fn is_class_initialized(&self, class: OpaqueClass) -> bool {
        let _ = class;
        false
    }

    /// Whether calls to `method` are traced; tracing defeats inlining.
    fn is_method_traced(&self, method: OpaqueMethod) -> bool {
        let _ = method;
        false
    }

    fn method_enter_reported(&self, method: OpaqueMethod) -> bool {
        let _ = method;
        false
    }

    fn method_exit_reported(&self, method: OpaqueMethod) -> bool {
        let _ = method;
        false
    }

    /// A trampoline that reaches `helper` from `call_site`.
    fn helper_trampoline(&mut self, helper: u32, call_site: u64) -> Option<u64> {
        let _ = (helper, call_site);
        None
    }

    /// Native entry point of a JNI method.
    fn jni_address(&self, method: OpaqueMethod) -> Option<u64> {
        let _ = method;
        None
    }

    fn find_or_create_thunk(&mut self, cp: u64, cp_index: u32) -> ThunkLookup {
        let _ = (cp, cp_index);
        ThunkLookup::Missing
    }

    fn reserve_trampolines(&mut self, count: u32) -> bool {
        let _ = count;
        true
    }

    fn reserve_unresolved_trampoline(&mut self, cp: u64, cp_index: u32) -> bool {
        let _ = (cp, cp_index);
        true
    }

    fn reserve_resolved_trampoline(&mut self, method: OpaqueMethod, call_site: u64) -> bool {
        let _ = (method, call_site);
        true
    }

    /// Address of a runtime global variable.
    fn global_value(&self, index: u64) -> Option<u64> {
        let _ = index;
        None
    }

    /// Instance size the allocator would use for `class`, when the class
    /// can be allocated inline.
    fn inline_allocation_size(&self, class: OpaqueClass) -> Option<u64> {
        let _ = class;
        None
    }

    fn array_copy_helper(&self) -> Option<u64> {
        None
    }

    /// Table-of-contents entry of the array copy helper, on targets that
    /// call through one.
    fn array_copy_toc(&self) -> Option<u64> {
        None
    }

    fn debug_counter_name(&self, offset: CacheOffset) -> Option<String> {
        let _ = offset;
        None
    }

    /// Returns the address the code should bump for `counter`.
    fn find_or_create_debug_counter(&mut self, counter: &DebugCounter) -> Option<u64> {
        let _ = counter;
        None
    }

    /// Base of the block frequency array of the method being loaded.
    fn block_frequency_base(&mut self) -> Option<u64> {
        None
    }

    fn recomp_queued_flag_address(&mut self) -> Option<u64> {
        None
    }

    fn catch_block_counter_address(&mut self) -> Option<u64> {
        None
    }

    /// Records that the class of `method` is materialised at `location`.
    fn add_class_record(&mut self, location: u64, bc_index: i32, method: SiteMethod) {
        let _ = (location, bc_index, method);
    }

    fn stats(&mut self) -> Option<&mut AotStats> {
        None
    }
}
