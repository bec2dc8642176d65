//! The symbol validation manager.
//!
//! Validation records name classes and methods by small integer IDs. The
//! first record that mentions an ID binds it to whatever the runtime resolved,
//! and every later record that mentions the same ID must resolve to the same
//! symbol. The dependency graph between records is therefore encoded purely
//! by table order.

use crate::{
    Result, format_error,
    runtime::{OpaqueClass, OpaqueMethod},
};
use alloc::format;
use foldhash::fast::FixedState;
use hashbrown::{HashMap, HashSet};

/// A class, method or opaque value bound to a validation ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Class(OpaqueClass),
    Method(OpaqueMethod),
    Opaque(u64),
}

impl Symbol {
    /// The raw value of the symbol, as it is written into code.
    #[inline]
    pub fn raw(self) -> u64 {
        match self {
            Symbol::Class(class) => class.raw(),
            Symbol::Method(method) => method.raw(),
            Symbol::Opaque(value) => value,
        }
    }
}

/// How a `SymbolFromManager` record interprets its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SymbolType {
    Opaque = 0,
    Class = 1,
    Method = 2,
}

impl SymbolType {
    pub(crate) fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(SymbolType::Opaque),
            1 => Some(SymbolType::Class),
            2 => Some(SymbolType::Method),
            _ => None,
        }
    }
}

/// Maps validation IDs to the symbols they were bound to during a load.
///
/// One manager lives for a whole relocation session and is shared by every
/// group of the table.
#[derive(Debug, Clone)]
pub struct SymbolValidationManager {
    id_to_symbol: HashMap<u16, Symbol, FixedState>,
    seen_symbols: HashSet<Symbol, FixedState>,
}

impl Default for SymbolValidationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolValidationManager {
    pub fn new() -> Self {
        Self {
            id_to_symbol: HashMap::with_hasher(FixedState::default()),
            seen_symbols: HashSet::with_hasher(FixedState::default()),
        }
    }

    /// Number of bound IDs.
    #[inline]
    pub fn len(&self) -> usize {
        self.id_to_symbol.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id_to_symbol.is_empty()
    }

    /// Checks `symbol` against `id`, binding the ID if it is still free.
    ///
    /// A missing symbol never validates. A free ID binds only if the symbol
    /// is not already bound to another ID; a bound ID validates only against
    /// the symbol it holds.
    pub fn validate_symbol(&mut self, id: u16, symbol: Option<Symbol>) -> bool {
        let Some(symbol) = symbol else {
            return false;
        };
        match self.id_to_symbol.get(&id) {
            Some(bound) => *bound == symbol,
            None => {
                if self.seen_symbols.contains(&symbol) {
                    return false;
                }
                self.id_to_symbol.insert(id, symbol);
                self.seen_symbols.insert(symbol);
                true
            }
        }
    }

    /// Gets the symbol bound to `id`, if any.
    #[inline]
    pub fn get(&self, id: u16) -> Option<Symbol> {
        self.id_to_symbol.get(&id).copied()
    }

    /// Gets the symbol bound to `id`. An unbound ID means the table
    /// references a symbol before the record that validates it.
    pub fn symbol(&self, id: u16) -> Result<Symbol> {
        self.get(id)
            .ok_or_else(|| format_error(format!("symbol validation id {id} is not populated")))
    }

    pub fn class(&self, id: u16) -> Result<OpaqueClass> {
        match self.symbol(id)? {
            Symbol::Class(class) => Ok(class),
            other => Err(format_error(format!(
                "symbol validation id {id} is bound to {other:?}, expected a class"
            ))),
        }
    }

    pub fn method(&self, id: u16) -> Result<OpaqueMethod> {
        match self.symbol(id)? {
            Symbol::Method(method) => Ok(method),
            other => Err(format_error(format!(
                "symbol validation id {id} is bound to {other:?}, expected a method"
            ))),
        }
    }

    /// Whether `symbol` is bound to some ID.
    #[inline]
    pub fn is_seen(&self, symbol: Symbol) -> bool {
        self.seen_symbols.contains(&symbol)
    }
}
