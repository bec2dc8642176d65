use alloc::borrow::Cow;
use core::fmt::Display;

/// Status codes reported for a relocation record.
///
/// Every failure surfaced by this crate maps to one of these codes, so a host
/// can log precisely why a load was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RelocationErrorCode {
    Success = 0,
    /// Malformed table, unknown kind or structural inconsistency.
    InvalidRelocation = 1,
    /// A class could not be resolved or did not match its class chain.
    ClassValidationFailure = 2,
    FieldValidationFailure = 3,
    StaticFieldResolutionFailure = 4,
    MethodResolutionFailure = 5,
    HelperNotFound = 6,
    ThunkFailure = 7,
    /// The code cache has no room left for a thunk or trampoline.
    CodeCacheFull = 8,
    TrampolineFailure = 9,
    PicTrampolineFailure = 10,
    SymbolValidationFailure = 11,
    DebugCounterFailure = 12,
    BlockFrequencyFailure = 13,
    RecompQueuedFlagFailure = 14,
    CatchBlockCounterFailure = 15,
    /// A record asked for the compilation to be abandoned.
    CompilationFailed = 16,
}

impl RelocationErrorCode {
    /// The numeric value of the code.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, RelocationErrorCode::Success)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelocationErrorCode::Success => "success",
            RelocationErrorCode::InvalidRelocation => "invalid relocation",
            RelocationErrorCode::ClassValidationFailure => "class validation failure",
            RelocationErrorCode::FieldValidationFailure => "field validation failure",
            RelocationErrorCode::StaticFieldResolutionFailure => {
                "static field resolution failure"
            }
            RelocationErrorCode::MethodResolutionFailure => "method resolution failure",
            RelocationErrorCode::HelperNotFound => "helper not found",
            RelocationErrorCode::ThunkFailure => "thunk relocation failure",
            RelocationErrorCode::CodeCacheFull => "code cache full",
            RelocationErrorCode::TrampolineFailure => "trampoline reservation failure",
            RelocationErrorCode::PicTrampolineFailure => "pic trampoline reservation failure",
            RelocationErrorCode::SymbolValidationFailure => "symbol validation failure",
            RelocationErrorCode::DebugCounterFailure => "debug counter failure",
            RelocationErrorCode::BlockFrequencyFailure => "block frequency failure",
            RelocationErrorCode::RecompQueuedFlagFailure => "recompilation queued flag failure",
            RelocationErrorCode::CatchBlockCounterFailure => "catch block counter failure",
            RelocationErrorCode::CompilationFailed => "compilation failed",
        }
    }
}

impl Display for RelocationErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types used throughout the `aot_relo` library.
#[derive(Debug)]
pub enum Error {
    /// The relocation table is malformed.
    ///
    /// This error typically indicates:
    /// * An unknown or unsupported record kind
    /// * A record size that does not span its header, payload and offsets
    /// * An odd number of ordered-pair offsets
    /// * A reference to a symbol validation ID that was never populated
    /// * A patch location outside the code body
    Format {
        /// A descriptive message about the format error.
        msg: Cow<'static, str>,
    },

    /// A record could not be applied.
    Relocation {
        /// The status code describing the failure.
        code: RelocationErrorCode,
        /// A descriptive message about the relocation error.
        msg: Cow<'static, str>,
    },

    /// An error occurred in a user-defined callback or handler.
    Custom {
        /// A descriptive message about the custom error.
        msg: Cow<'static, str>,
    },
}

impl Error {
    /// The status code a host should report for this error.
    pub fn code(&self) -> RelocationErrorCode {
        match self {
            Error::Format { .. } | Error::Custom { .. } => RelocationErrorCode::InvalidRelocation,
            Error::Relocation { code, .. } => *code,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Format { msg } => write!(f, "Relocation table format error: {msg}"),
            Error::Relocation { code, msg } => write!(f, "Relocation error ({code}): {msg}"),
            Error::Custom { msg } => write!(f, "Custom error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

/// Creates a format error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn format_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Format { msg: msg.into() }
}

/// Creates a relocation error with the specified code and message.
///
/// # Arguments
/// * `code` - The status code of the failure.
/// * `msg` - The error message.
#[cold]
#[inline(never)]
pub(crate) fn relocation_error(
    code: RelocationErrorCode,
    msg: impl Into<Cow<'static, str>>,
) -> Error {
    Error::Relocation {
        code,
        msg: msg.into(),
    }
}

/// Creates a custom error with the specified message.
///
/// This is a convenience function for hosts implementing the collaborator
/// traits.
#[cold]
#[inline(never)]
pub fn custom_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Custom { msg: msg.into() }
}
