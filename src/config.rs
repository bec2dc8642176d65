use alloc::vec::Vec;

/// Runtime options consulted while relocating.
///
/// The host builds one of these per load and exposes it through
/// [`RelocationRuntime::options`](crate::RelocationRuntime::options).
///
/// # Examples
/// ```
/// use aot_relo::RelocationOptions;
///
/// let options = RelocationOptions::new()
///     .hcr_enabled(true)
///     .disable_inline_site(3);
/// assert!(options.is_inline_site_disabled(3));
/// ```
#[derive(Debug, Clone)]
pub struct RelocationOptions {
    pub(crate) hcr_enabled: bool,
    pub(crate) disable_ch_opts: bool,
    pub(crate) stress_trampolines: bool,
    pub(crate) disabled_inline_sites: Vec<usize>,
    pub(crate) debug_counters: bool,
    pub(crate) symbol_validation: bool,
    pub(crate) method_trampolines: bool,
}

impl Default for RelocationOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RelocationOptions {
    pub const fn new() -> Self {
        Self {
            hcr_enabled: false,
            disable_ch_opts: false,
            stress_trampolines: false,
            disabled_inline_sites: Vec::new(),
            debug_counters: true,
            symbol_validation: true,
            method_trampolines: false,
        }
    }

    /// Whether classes may be redefined at runtime (hot code replace).
    /// Guards and class pointers then register redefinition assumptions.
    pub fn hcr_enabled(mut self, enabled: bool) -> Self {
        self.hcr_enabled = enabled;
        self
    }

    /// Disables class-hierarchy based optimisations; every inlined method
    /// guard is invalidated.
    pub fn disable_ch_opts(mut self, disable: bool) -> Self {
        self.disable_ch_opts = disable;
        self
    }

    /// Routes every helper call through a trampoline.
    pub fn stress_trampolines(mut self, stress: bool) -> Self {
        self.stress_trampolines = stress;
        self
    }

    /// Forces validation of the given inlined site to fail.
    pub fn disable_inline_site(mut self, index: usize) -> Self {
        if let Err(pos) = self.disabled_inline_sites.binary_search(&index) {
            self.disabled_inline_sites.insert(pos, index);
        }
        self
    }

    pub fn debug_counters(mut self, enabled: bool) -> Self {
        self.debug_counters = enabled;
        self
    }

    /// Whether the code was compiled with the symbol validation manager.
    pub fn symbol_validation(mut self, enabled: bool) -> Self {
        self.symbol_validation = enabled;
        self
    }

    /// Whether the target reaches resolved methods through trampolines.
    pub fn method_trampolines(mut self, enabled: bool) -> Self {
        self.method_trampolines = enabled;
        self
    }

    #[inline]
    pub fn is_hcr_enabled(&self) -> bool {
        self.hcr_enabled
    }

    #[inline]
    pub fn is_ch_opts_disabled(&self) -> bool {
        self.disable_ch_opts
    }

    #[inline]
    pub fn is_stress_trampolines(&self) -> bool {
        self.stress_trampolines
    }

    #[inline]
    pub fn is_inline_site_disabled(&self, index: usize) -> bool {
        self.disabled_inline_sites.binary_search(&index).is_ok()
    }

    #[inline]
    pub fn is_debug_counters_enabled(&self) -> bool {
        self.debug_counters
    }

    #[inline]
    pub fn is_symbol_validation_enabled(&self) -> bool {
        self.symbol_validation
    }

    #[inline]
    pub fn is_method_trampolines_enabled(&self) -> bool {
        self.method_trampolines
    }
}
