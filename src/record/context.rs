use super::header::PatchLocation;
use crate::{
    RelocationOptions, Result, format_error,
    runtime::{AotStats, InlinedSite, OpaqueClass, RelocationRuntime, RuntimeAssumption, SiteMethod},
    svm::SymbolValidationManager,
    target::{CodeBuffer, PointerWidth, RelocationTarget},
};
use alloc::format;

/// Everything a record needs while it is prepared and applied.
///
/// One context is built per relocation session and borrowed by every record
/// of every group in the table.
pub struct RelocationContext<'a, 'code> {
    pub(crate) runtime: &'a mut dyn RelocationRuntime,
    pub(crate) target: &'a dyn RelocationTarget,
    pub(crate) code: &'a mut CodeBuffer<'code>,
    pub(crate) svm: &'a mut SymbolValidationManager,
    pub(crate) origin: u64,
}

impl<'a, 'code> RelocationContext<'a, 'code> {
    /// Offsets are taken relative to the runtime's new code start.
    pub fn new(
        runtime: &'a mut dyn RelocationRuntime,
        target: &'a dyn RelocationTarget,
        code: &'a mut CodeBuffer<'code>,
        svm: &'a mut SymbolValidationManager,
    ) -> Self {
        let origin = runtime.new_code_start();
        Self {
            runtime,
            target,
            code,
            svm,
            origin,
        }
    }

    /// Overrides the address offsets are added to.
    pub fn with_origin(mut self, origin: u64) -> Self {
        self.origin = origin;
        self
    }

    #[inline]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    #[inline]
    pub fn code(&self) -> &CodeBuffer<'code> {
        self.code
    }

    #[inline]
    pub fn svm(&self) -> &SymbolValidationManager {
        self.svm
    }

    #[inline]
    pub(crate) fn options(&self) -> &RelocationOptions {
        self.runtime.options()
    }

    #[inline]
    pub(crate) fn pointer_width(&self) -> PointerWidth {
        self.target.pointer_width()
    }

    #[inline]
    pub(crate) fn all_ones(&self) -> u64 {
        self.pointer_width().all_ones()
    }

    /// Moves an address from the compile-time code layout to the loaded one.
    #[inline]
    pub(crate) fn rebase(&self, address: u64) -> u64 {
        let value = address
            .wrapping_sub(self.runtime.old_code_start())
            .wrapping_add(self.runtime.new_code_start());
        self.pointer_width().truncate(value)
    }

    /// Decodes a raw inlined site index; all-ones stands for the outermost
    /// method.
    #[inline]
    pub(crate) fn site_index(&self, raw: u64) -> Option<usize> {
        if raw == self.all_ones() {
            None
        } else {
            Some(raw as usize)
        }
    }

    pub(crate) fn inlined_site(&self, index: usize) -> Result<InlinedSite> {
        self.runtime.inlined_site(index).ok_or_else(|| {
            format_error(format!("inlined site index {index} is outside the site table"))
        })
    }

    /// The method at an inlined site, or the method being loaded for the
    /// outermost site.
    pub(crate) fn site_method(&self, site: Option<usize>) -> Result<SiteMethod> {
        match site {
            None => Ok(SiteMethod::Method(self.runtime.method())),
            Some(index) => Ok(self.inlined_site(index)?.method),
        }
    }

    /// The method that contains the call inlined at `site`.
    pub(crate) fn caller_method(&self, site: usize) -> Result<SiteMethod> {
        let caller = self.inlined_site(site)?.caller;
        self.site_method(caller)
    }

    /// Moves a constant pool address found in code from the compile-time
    /// constant pool of the record's site to the loaded one.
    ///
    /// A site whose method is unloaded or was never validated yields 0.
    pub(crate) fn compute_new_constant_pool(
        &self,
        site: Option<usize>,
        record_cp: u64,
        old_value: u64,
    ) -> Result<u64> {
        let new_cp = match site {
            None => self.runtime.constant_pool(),
            Some(_) => match self.site_method(site)? {
                SiteMethod::Method(method) => self.runtime.constant_pool_of(method),
                SiteMethod::Inactive | SiteMethod::Unloaded => return Ok(0),
            },
        };
        let value = old_value.wrapping_sub(record_cp).wrapping_add(new_cp);
        Ok(self.pointer_width().truncate(value))
    }

    /// Whether `class` can be unloaded independently of the method being
    /// loaded.
    pub(crate) fn loaders_differ(&self, class: OpaqueClass) -> bool {
        let outer = self.runtime.class_of_method(self.runtime.method());
        self.runtime.class_loader_of(class) != self.runtime.class_loader_of(outer)
    }

    #[inline]
    pub(crate) fn stats(&mut self, update: impl FnOnce(&mut AotStats)) {
        if let Some(stats) = self.runtime.stats() {
            update(stats);
        }
    }

    #[inline]
    pub(crate) fn register(&mut self, assumption: RuntimeAssumption) -> Result<()> {
        #[cfg(feature = "log")]
        log::trace!("registering runtime assumption {assumption:?}");
        self.runtime.register_assumption(assumption)
    }

    pub(crate) fn single_location(location: PatchLocation, name: &str) -> Result<u64> {
        match location {
            PatchLocation::At(address) => Ok(address),
            PatchLocation::Pair { .. } => Err(format_error(format!(
                "{name} record does not accept ordered-pair offsets"
            ))),
            PatchLocation::None => {
                Err(format_error(format!("{name} record has no patch location")))
            }
        }
    }

    pub(crate) fn load_address(&self, location: PatchLocation, name: &str) -> Result<u64> {
        match location {
            PatchLocation::Pair { high, low } => {
                self.target.load_address_pair(self.code, high, low)
            }
            _ => {
                let address = Self::single_location(location, name)?;
                self.target.load_address(self.code, address)
            }
        }
    }

    /// Stores an address embedded in an instruction, or split across an
    /// ordered pair.
    pub(crate) fn store_address(
        &mut self,
        location: PatchLocation,
        value: u64,
        name: &str,
    ) -> Result<()> {
        match location {
            PatchLocation::Pair { high, low } => {
                self.target.store_address_pair(self.code, high, low, value)
            }
            _ => {
                let address = Self::single_location(location, name)?;
                self.target.store_address(self.code, address, value)
            }
        }
    }

    /// Stores an address materialised by an instruction sequence selected by
    /// `sequence`, or split across an ordered pair.
    pub(crate) fn store_address_sequence(
        &mut self,
        location: PatchLocation,
        value: u64,
        sequence: u8,
        name: &str,
    ) -> Result<()> {
        match location {
            PatchLocation::Pair { high, low } => {
                self.target.store_address_pair(self.code, high, low, value)
            }
            _ => {
                let address = Self::single_location(location, name)?;
                self.target
                    .store_address_sequence(self.code, address, value, sequence)
            }
        }
    }

    /// Stores a data pointer, or splits it across an ordered pair.
    pub(crate) fn store_pointer(
        &mut self,
        location: PatchLocation,
        value: u64,
        name: &str,
    ) -> Result<()> {
        match location {
            PatchLocation::Pair { high, low } => {
                self.target.store_address_pair(self.code, high, low, value)
            }
            _ => {
                let address = Self::single_location(location, name)?;
                self.target.store_pointer(self.code, address, value)
            }
        }
    }

    pub(crate) fn load_relative_target(&self, location: PatchLocation, name: &str) -> Result<u64> {
        let address = Self::single_location(location, name)?;
        self.target.load_relative_target(self.code, address)
    }

    pub(crate) fn store_relative_target(
        &mut self,
        location: PatchLocation,
        target: u64,
        name: &str,
    ) -> Result<()> {
        let address = Self::single_location(location, name)?;
        self.target.store_relative_target(self.code, address, target)
    }

    pub(crate) fn patch_virtual_guard(
        &mut self,
        location: PatchLocation,
        destination: u64,
        name: &str,
    ) -> Result<()> {
        let address = Self::single_location(location, name)?;
        self.target.patch_virtual_guard(self.code, address, destination)
    }
}
