//! Record groups, whole tables and the [`Relocator`] that drives them.
//!
//! A group starts with a size word of the target pointer width that counts
//! itself, followed by records packed back to back. Each record's `size`
//! field is the only way to reach the next one. A table is a concatenation
//! of groups.

use crate::{
    Result, format_error, relocation_error,
    record::{RecordAction, RecordOutcome, RelocationContext, RelocationRecord},
    runtime::RelocationRuntime,
    svm::SymbolValidationManager,
    target::{CodeBuffer, Endian, PointerWidth, RelocationTarget},
};
use alloc::{boxed::Box, format};

#[inline]
#[cold]
fn cold() {}

#[inline]
fn unlikely(b: bool) -> bool {
    if b {
        cold()
    }
    b
}

/// A hook that can take over a record before the built-in logic runs.
///
/// # Examples
///
/// ```rust
/// use aot_relo::{
///     RecordHandler, RecordKind, RecordOutcome, RelocationContext, RelocationRecord, Result,
/// };
///
/// /// Leaves debug counters unpatched whatever the options say.
/// struct SkipCounters;
///
/// impl RecordHandler for SkipCounters {
///     fn handle(
///         &mut self,
///         record: &RelocationRecord<'_>,
///         _ctx: &mut RelocationContext<'_, '_>,
///     ) -> Option<Result<RecordOutcome>> {
///         match record.kind() {
///             RecordKind::DebugCounter => Some(Ok(RecordOutcome::Ignored)),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait RecordHandler {
    /// Handles a record.
    ///
    /// # Returns
    /// * `Some(Ok(outcome))` - Handled; the built-in logic is skipped.
    /// * `Some(Err(e))` - Handled but failed; the group aborts with `e`.
    /// * `None` - Not handled, fall through to the built-in logic.
    fn handle(
        &mut self,
        record: &RelocationRecord<'_>,
        ctx: &mut RelocationContext<'_, '_>,
    ) -> Option<Result<RecordOutcome>>;
}

impl RecordHandler for () {
    #[inline]
    fn handle(
        &mut self,
        _record: &RelocationRecord<'_>,
        _ctx: &mut RelocationContext<'_, '_>,
    ) -> Option<Result<RecordOutcome>> {
        None
    }
}

impl<H: RecordHandler + ?Sized> RecordHandler for &mut H {
    fn handle(
        &mut self,
        record: &RelocationRecord<'_>,
        ctx: &mut RelocationContext<'_, '_>,
    ) -> Option<Result<RecordOutcome>> {
        (**self).handle(record, ctx)
    }
}

impl<H: RecordHandler + ?Sized> RecordHandler for Box<H> {
    fn handle(
        &mut self,
        record: &RelocationRecord<'_>,
        ctx: &mut RelocationContext<'_, '_>,
    ) -> Option<Result<RecordOutcome>> {
        (**self).handle(record, ctx)
    }
}

/// Per-outcome record counts of a relocation session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelocationReport {
    pub applied: usize,
    pub ignored: usize,
    /// Records that disabled a speculative fast path instead of enabling it.
    pub invalidated: usize,
    /// Records taken over by a [`RecordHandler`].
    pub handled: usize,
}

impl RelocationReport {
    /// Total number of records visited.
    #[inline]
    pub fn total(&self) -> usize {
        self.applied + self.ignored + self.invalidated + self.handled
    }

    #[inline]
    fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Applied => self.applied += 1,
            RecordOutcome::Ignored => self.ignored += 1,
            RecordOutcome::GuardInvalidated => self.invalidated += 1,
        }
    }

    pub fn merge(&mut self, other: RelocationReport) {
        self.applied += other.applied;
        self.ignored += other.ignored;
        self.invalidated += other.invalidated;
        self.handled += other.handled;
    }
}

/// One group of records, borrowed from the table.
#[derive(Debug, Clone, Copy)]
pub struct RelocationRecordGroup<'a> {
    bytes: &'a [u8],
    endian: Endian,
    width: PointerWidth,
}

impl<'a> RelocationRecordGroup<'a> {
    /// Reads the group's size word at the start of `bytes`.
    ///
    /// `bytes` may extend past the group; only `size` bytes are used.
    pub fn new<T>(bytes: &'a [u8], target: &T) -> Result<Self>
    where
        T: RelocationTarget + ?Sized,
    {
        Self::parse(bytes, target.endian(), target.pointer_width())
    }

    fn parse(bytes: &'a [u8], endian: Endian, width: PointerWidth) -> Result<Self> {
        let word = width.bytes();
        let Some(size_word) = bytes.get(..word) else {
            return Err(format_error(format!(
                "truncated group size word: {} bytes left",
                bytes.len()
            )));
        };
        let size = endian.read_uint(size_word);
        if unlikely(size < word as u64 || size > bytes.len() as u64) {
            return Err(format_error(format!(
                "group size {size} is outside [{word}, {}]",
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: &bytes[..size as usize],
            endian,
            width,
        })
    }

    /// Size in bytes of the group, size word included.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Byte offset of the first record within the group.
    #[inline]
    pub fn first_record(&self) -> usize {
        self.width.bytes()
    }

    /// Byte offset just past the last record.
    #[inline]
    pub fn past_last_record(&self) -> usize {
        self.bytes.len()
    }

    /// Decodes the records in table order.
    ///
    /// The iterator stops after the first record that fails to decode.
    pub fn records(&self) -> Records<'a> {
        Records {
            bytes: self.bytes,
            pos: self.first_record(),
            endian: self.endian,
            width: self.width,
            failed: false,
        }
    }

    /// Applies every record of the group in table order.
    ///
    /// The first failure aborts the group: no later record is prepared or
    /// applied, and the error is returned unchanged.
    pub fn apply_relocations(
        &self,
        ctx: &mut RelocationContext<'_, '_>,
        handler: &mut impl RecordHandler,
    ) -> Result<RelocationReport> {
        let mut report = RelocationReport::default();
        for record in self.records() {
            let record = record?;
            #[cfg(feature = "log")]
            log::trace!("{record}");
            if let Some(result) = handler.handle(&record, ctx) {
                result?;
                #[cfg(feature = "log")]
                log::debug!("{} handled by host", record.name());
                report.handled += 1;
                continue;
            }
            let outcome = self.handle_relocation(&record, ctx)?;
            report.count(outcome);
        }
        Ok(report)
    }

    /// Runs one record through the action decision and the two-phase
    /// protocol.
    pub fn handle_relocation(
        &self,
        record: &RelocationRecord<'_>,
        ctx: &mut RelocationContext<'_, '_>,
    ) -> Result<RecordOutcome> {
        let action = record.action(ctx)?;
        #[cfg(feature = "log")]
        log::debug!("{}: {action:?}", record.name());
        match action {
            RecordAction::Ignore => Ok(RecordOutcome::Ignored),
            RecordAction::FailCompilation(code) => {
                #[cfg(feature = "log")]
                log::debug!("{} failed the compilation: {code}", record.name());
                Err(relocation_error(
                    code,
                    format!("{} record failed the compilation", record.name()),
                ))
            }
            RecordAction::Apply => {
                let result = record
                    .prepare(ctx)
                    .and_then(|data| record.apply_at_all_offsets(ctx, &data));
                #[cfg(feature = "log")]
                match &result {
                    Ok(outcome) => log::debug!("{}: {outcome:?}", record.name()),
                    Err(err) => {
                        log::debug!("{} failed with code {}: {err}", record.name(), err.code())
                    }
                }
                result
            }
        }
    }
}

/// Iterator over the records of a group.
pub struct Records<'a> {
    bytes: &'a [u8],
    pos: usize,
    endian: Endian,
    width: PointerWidth,
    failed: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<RelocationRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.bytes.len() {
            return None;
        }
        match RelocationRecord::parse(&self.bytes[self.pos..], self.endian, self.width) {
            Ok(record) => {
                self.pos += record.size() as usize;
                Some(Ok(record))
            }
            Err(err) => {
                cold();
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// A whole relocation table: groups laid end to end.
#[derive(Debug, Clone, Copy)]
pub struct RelocationTable<'a> {
    bytes: &'a [u8],
    endian: Endian,
    width: PointerWidth,
}

impl<'a> RelocationTable<'a> {
    pub fn new<T>(bytes: &'a [u8], target: &T) -> Self
    where
        T: RelocationTarget + ?Sized,
    {
        Self {
            bytes,
            endian: target.endian(),
            width: target.pointer_width(),
        }
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Splits the table into groups. The iterator stops after the first
    /// malformed group.
    pub fn groups(&self) -> Groups<'a> {
        Groups {
            rest: self.bytes,
            endian: self.endian,
            width: self.width,
        }
    }

    /// Applies every group in order, stopping at the first failure.
    pub fn apply(
        &self,
        ctx: &mut RelocationContext<'_, '_>,
        handler: &mut impl RecordHandler,
    ) -> Result<RelocationReport> {
        let mut report = RelocationReport::default();
        for group in self.groups() {
            report.merge(group?.apply_relocations(ctx, handler)?);
        }
        Ok(report)
    }
}

/// Iterator over the groups of a table.
pub struct Groups<'a> {
    rest: &'a [u8],
    endian: Endian,
    width: PointerWidth,
}

impl<'a> Iterator for Groups<'a> {
    type Item = Result<RelocationRecordGroup<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match RelocationRecordGroup::parse(self.rest, self.endian, self.width) {
            Ok(group) => {
                self.rest = &self.rest[group.size()..];
                Some(Ok(group))
            }
            Err(err) => {
                self.rest = &[];
                Some(Err(err))
            }
        }
    }
}

/// A builder that relocates a whole table against one code body.
///
/// # Examples
///
/// ```rust,ignore
/// use aot_relo::{CodeBuffer, Relocator, X86_64Target};
///
/// let mut code = CodeBuffer::new(&mut body, runtime.new_code_start());
/// let report = Relocator::new(&table, X86_64Target)
///     .pre_handler(SkipCounters)
///     .relocate(&mut runtime, &mut code)?;
/// ```
pub struct Relocator<'a, T, PreH = ()> {
    table: &'a [u8],
    target: T,
    origin: Option<u64>,
    svm: SymbolValidationManager,
    pre_handler: PreH,
}

impl<'a, T: RelocationTarget> Relocator<'a, T, ()> {
    /// Creates a relocator for `table`, a concatenation of groups encoded for
    /// `target`.
    pub fn new(table: &'a [u8], target: T) -> Self {
        Self {
            table,
            target,
            origin: None,
            svm: SymbolValidationManager::new(),
            pre_handler: (),
        }
    }
}

impl<'a, T, PreH> Relocator<'a, T, PreH>
where
    T: RelocationTarget,
    PreH: RecordHandler,
{
    /// Sets the handler consulted before the built-in logic of every record.
    pub fn pre_handler<H2>(self, pre_handler: H2) -> Relocator<'a, T, H2>
    where
        H2: RecordHandler,
    {
        Relocator {
            table: self.table,
            target: self.target,
            origin: self.origin,
            svm: self.svm,
            pre_handler,
        }
    }

    /// Overrides the address offsets are added to. Defaults to the runtime's
    /// new code start.
    pub fn origin(mut self, origin: u64) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Starts from an already populated symbol validation manager.
    pub fn svm(mut self, svm: SymbolValidationManager) -> Self {
        self.svm = svm;
        self
    }

    /// Applies the table. The first failing record aborts the load.
    pub fn relocate(
        mut self,
        runtime: &mut dyn RelocationRuntime,
        code: &mut CodeBuffer<'_>,
    ) -> Result<RelocationReport> {
        let table = RelocationTable::new(self.table, &self.target);
        let mut ctx = RelocationContext::new(runtime, &self.target, code, &mut self.svm);
        if let Some(origin) = self.origin {
            ctx = ctx.with_origin(origin);
        }
        let report = table.apply(&mut ctx, &mut self.pre_handler)?;
        #[cfg(feature = "log")]
        log::debug!("relocated {} records: {report:?}", report.total());
        Ok(report)
    }
}
