use super::payload::PayloadShape;
use crate::{Error, Result, format_error};
use alloc::format;
use core::fmt::Display;

macro_rules! record_kinds {
    ($($(#[$meta:meta])* $name:ident = $value:literal => $shape:ident,)*) => {
        /// The kind byte of a relocation record.
        ///
        /// The numbering is part of the persisted format. Slots 7, 44, 45, 56
        /// and 57 are retired and decode as unknown kinds.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum RecordKind {
            $($(#[$meta])* $name = $value,)*
        }

        impl RecordKind {
            /// Every supported kind, in numeric order.
            pub const ALL: &'static [RecordKind] = &[$(RecordKind::$name,)*];

            /// The human-readable name used by the print layer.
            pub const fn name(self) -> &'static str {
                match self {
                    $(RecordKind::$name => stringify!($name),)*
                }
            }

            /// The payload layout records of this kind carry.
            pub const fn shape(self) -> PayloadShape {
                match self {
                    $(RecordKind::$name => PayloadShape::$shape,)*
                }
            }
        }

        impl TryFrom<u8> for RecordKind {
            type Error = Error;

            fn try_from(value: u8) -> Result<Self> {
                match value {
                    $($value => Ok(RecordKind::$name),)*
                    _ => Err(format_error(format!("unknown relocation record kind {value}"))),
                }
            }
        }
    };
}

record_kinds! {
    ConstantPool = 0 => ConstantPool,
    HelperAddress = 1 => Helper,
    RelativeMethodAddress = 2 => Empty,
    AbsoluteMethodAddress = 3 => Empty,
    /// Address of a static field plus an offset.
    DataAddress = 4 => DataAddress,
    ClassObject = 5 => ConstantPoolWithIndex,
    MethodObject = 6 => ConstantPool,
    AbsoluteHelperAddress = 8 => Helper,
    FixedSequenceAddress = 9 => WithOffset,
    FixedSequenceAddress2 = 10 => WithOffset,
    JniVirtualTargetAddress = 11 => ConstantPoolWithIndex,
    JniStaticTargetAddress = 12 => ConstantPoolWithIndex,
    ArrayCopyHelper = 13 => Empty,
    ArrayCopyToc = 14 => Empty,
    BodyInfoAddress = 15 => Empty,
    Thunks = 16 => ConstantPool,
    StaticRamMethodConst = 17 => ConstantPoolWithIndex,
    Trampolines = 18 => ConstantPool,
    PicTrampolines = 19 => PicTrampolines,
    CheckMethodEnter = 20 => MethodTracingCheck,
    RamMethod = 21 => Empty,
    RamMethodSequence = 22 => Empty,
    RamMethodSequenceReg = 23 => Empty,
    VerifyClassObjectForAlloc = 24 => VerifyClassObjectForAlloc,
    ConstantPoolOrderedPair = 25 => ConstantPool,
    AbsoluteMethodAddressOrderedPair = 26 => Empty,
    VerifyRefArrayForAlloc = 27 => InlinedAllocation,
    J2IThunks = 28 => ConstantPoolWithIndex,
    GlobalValue = 29 => WithOffset,
    BodyInfoAddressLoad = 30 => Empty,
    ValidateInstanceField = 31 => ValidateClass,
    InlinedStaticMethodWithNopGuard = 32 => NopGuard,
    InlinedSpecialMethodWithNopGuard = 33 => NopGuard,
    InlinedVirtualMethodWithNopGuard = 34 => NopGuard,
    InlinedInterfaceMethodWithNopGuard = 35 => NopGuard,
    SpecialRamMethodConst = 36 => ConstantPoolWithIndex,
    /// Guard that is patched when the inlined method's class is redefined.
    InlinedHcrMethod = 37 => NopGuard,
    ValidateStaticField = 38 => InlinedMethod,
    ValidateClass = 39 => ValidateClass,
    ClassAddress = 40 => ConstantPoolWithIndex,
    /// A site that must be repatched on class redefinition.
    Hcr = 41 => WithOffset,
    ProfiledMethodGuard = 42 => ProfiledInlinedMethod,
    ProfiledClassGuard = 43 => ProfiledInlinedMethod,
    ProfiledInlinedMethod = 46 => ProfiledInlinedMethod,
    MethodPointer = 47 => MethodPointer,
    ClassPointer = 48 => Pointer,
    CheckMethodExit = 49 => MethodTracingCheck,
    ValidateArbitraryClass = 50 => ValidateArbitraryClass,
    EmitClass = 51 => EmitClass,
    JniSpecialTargetAddress = 52 => ConstantPoolWithIndex,
    VirtualRamMethodConst = 53 => ConstantPoolWithIndex,
    InlinedInterfaceMethod = 54 => InlinedMethod,
    InlinedVirtualMethod = 55 => InlinedMethod,
    ArbitraryClassAddress = 58 => Pointer,
    DebugCounter = 59 => DebugCounter,
    ClassUnloadAssumption = 60 => Empty,
    J2IVirtualThunkPointer = 61 => J2IVirtualThunkPointer,
    InlinedAbstractMethodWithNopGuard = 62 => NopGuard,
    ValidateRootClass = 63 => ValidateRootClass,
    ValidateClassByName = 64 => ValidateClassByName,
    ValidateProfiledClass = 65 => ValidateProfiledClass,
    ValidateClassFromCp = 66 => ValidateClassFromCp,
    ValidateDefiningClassFromCp = 67 => ValidateDefiningClassFromCp,
    ValidateStaticClassFromCp = 68 => ValidateClassFromCp,
    ValidateClassFromMethod = 69 => ValidateClassFromMethod,
    ValidateComponentClassFromArrayClass = 70 => ValidateDerivedClass,
    ValidateArrayClassFromComponentClass = 71 => ValidateDerivedClass,
    ValidateSuperClassFromClass = 72 => ValidateDerivedClass,
    ValidateClassInstanceOfClass = 73 => ValidateClassInstanceOfClass,
    ValidateSystemClassByName = 74 => ValidateSystemClassByName,
    ValidateClassFromITableIndexCp = 75 => ValidateClassFromCp,
    ValidateDeclaringClassFromFieldOrStatic = 76 => ValidateClassFromCp,
    ValidateClassClass = 77 => ValidateDerivedClass,
    ValidateConcreteSubClassFromClass = 78 => ValidateDerivedClass,
    ValidateClassChain = 79 => ValidateClassChain,
    ValidateRomClass = 80 => ValidateRomClass,
    ValidatePrimitiveClass = 81 => ValidatePrimitiveClass,
    ValidateMethodFromInlinedSite = 82 => ValidateMethodFromInlinedSite,
    ValidateMethodByName = 83 => ValidateMethodByName,
    ValidateMethodFromClass = 84 => ValidateMethodFromClass,
    ValidateStaticMethodFromCp = 85 => ValidateMethodFromCp,
    ValidateSpecialMethodFromCp = 86 => ValidateMethodFromCp,
    ValidateVirtualMethodFromCp = 87 => ValidateMethodFromCp,
    ValidateVirtualMethodFromOffset = 88 => ValidateVirtualMethodFromOffset,
    ValidateInterfaceMethodFromCp = 89 => ValidateInterfaceMethodFromCp,
    ValidateMethodFromClassAndSig = 90 => ValidateMethodFromClassAndSig,
    ValidateStackWalkerMaySkipFrames = 91 => ValidateStackWalkerMaySkipFrames,
    ValidateArrayClassFromJavaVm = 92 => ValidateArrayClassFromJavaVm,
    ValidateClassInfoIsInitialized = 93 => ValidateClassInfoIsInitialized,
    ValidateMethodFromSingleImplementer = 94 => ValidateMethodFromSingleImplementer,
    ValidateMethodFromSingleInterfaceImplementer = 95 =>
        ValidateMethodFromSingleInterfaceImplementer,
    ValidateMethodFromSingleAbstractImplementer = 96 => ValidateMethodFromSingleAbstractImplementer,
    ValidateImproperInterfaceMethodFromCp = 97 => ValidateMethodFromCp,
    /// A class, method or opaque value bound by an earlier validation record.
    SymbolFromManager = 98 => SymbolFromManager,
    MethodCallAddress = 99 => MethodCallAddress,
    /// Like `SymbolFromManager`, materialised by an instruction sequence.
    DiscontiguousSymbolFromManager = 100 => SymbolFromManager,
    ResolvedTrampolines = 101 => ResolvedTrampolines,
    BlockFrequency = 102 => BlockFrequency,
    RecompQueuedFlag = 103 => Empty,
    CatchBlockCounter = 104 => Empty,
}

impl RecordKind {
    /// The kind byte.
    #[inline]
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Validation records check an assumption once and patch nothing, so
    /// their offset list is never consulted.
    pub const fn is_validation_record(self) -> bool {
        matches!(self as u8, 31 | 38 | 39 | 50 | 63..=97)
    }

    /// Records whose symbols are bound through the symbol validation manager.
    pub const fn uses_symbol_validation(self) -> bool {
        matches!(self as u8, 63..=98 | 100 | 101)
    }

    /// Offsets of these kinds always come in (high, low) pairs.
    #[inline]
    pub const fn is_ordered_pair_kind(self) -> bool {
        matches!(
            self,
            RecordKind::ConstantPoolOrderedPair | RecordKind::AbsoluteMethodAddressOrderedPair
        )
    }

    /// Inlined-method guards validate their own inlined site; an inactive
    /// site is a validation failure rather than a reason to skip the record.
    pub const fn is_inlined_method_guard(self) -> bool {
        matches!(
            self,
            RecordKind::InlinedStaticMethodWithNopGuard
                | RecordKind::InlinedSpecialMethodWithNopGuard
                | RecordKind::InlinedVirtualMethodWithNopGuard
                | RecordKind::InlinedInterfaceMethodWithNopGuard
                | RecordKind::InlinedAbstractMethodWithNopGuard
                | RecordKind::InlinedHcrMethod
                | RecordKind::InlinedInterfaceMethod
                | RecordKind::InlinedVirtualMethod
                | RecordKind::ProfiledMethodGuard
                | RecordKind::ProfiledClassGuard
                | RecordKind::ProfiledInlinedMethod
        )
    }

    /// Pointer records patch an all-ones value for an inactive site instead
    /// of being skipped.
    pub const fn is_pointer(self) -> bool {
        matches!(
            self,
            RecordKind::MethodPointer | RecordKind::ClassPointer | RecordKind::ArbitraryClassAddress
        )
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
