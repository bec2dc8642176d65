//! # aot_relo
//! Decodes and applies the relocation records that make ahead-of-time
//! compiled method bodies runnable at a new address in a new process.
//! ## Usage
//! A compiled body ships with a relocation table: groups of binary records,
//! each naming a kind of runtime-dependent value and the code offsets that
//! hold it. The host implements [`RelocationRuntime`] to answer questions
//! about its classes, methods and helpers, picks a [`RelocationTarget`] for
//! the byte order and word size the code was compiled for, and runs a
//! [`Relocator`] over the table.
//! ## Example
//! ```rust,ignore
//! use aot_relo::{CodeBuffer, Relocator, X86_64Target};
//!
//! let mut code = CodeBuffer::new(&mut body, runtime.new_code_start());
//! let report = Relocator::new(&table, X86_64Target).relocate(&mut runtime, &mut code)?;
//! println!("{} records applied", report.applied);
//! ```
#![no_std]
extern crate alloc;

pub mod arch;
mod config;
mod error;
mod group;
pub mod record;
pub mod runtime;
pub mod svm;
mod target;
pub mod writer;

pub use arch::*;
pub use config::RelocationOptions;
pub use error::{Error, RelocationErrorCode, custom_error};
pub use group::{
    Groups, RecordHandler, Records, RelocationRecordGroup, RelocationReport, RelocationTable,
    Relocator,
};
pub use record::{
    PatchLocation, Payload, PrivateData, RecordAction, RecordFlags, RecordKind, RecordOutcome,
    RelocationContext, RelocationRecord,
};
pub use runtime::{AotStats, RelocationRuntime};
pub use svm::{Symbol, SymbolValidationManager};
pub use target::{CodeBuffer, Endian, PointerWidth, RelocationTarget};
pub use writer::{GroupWriter, RecordSpec, TableWriter};

pub(crate) use error::{format_error, relocation_error};

/// A type alias for `Result`s returned by `aot_relo` functions.
///
/// This is a convenience alias that eliminates the need to repeatedly specify
/// the `Error` type in function signatures.
pub type Result<T> = core::result::Result<T, Error>;
