//! Symbol table.
//!
//! Symbols are keyed by native address with a secondary name index. The
//! store keeps the first symbol registered at an address; later
//! registrations at the same address are ignored.

use alloc::collections::BTreeMap;
use alloc::string::String;

use hashbrown::HashMap;

use crate::address::Address;

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolKind {
    /// Executable code
    Function,
    /// Data object
    Object,
    /// Anything else (no type information)
    #[default]
    Other,
}

bitflags::bitflags! {
    /// Symbol attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SymbolAttrs: u32 {
        /// Defined outside this binary.
        const IMPORTED = 0x0001;
        /// Weak binding.
        const WEAK = 0x0002;
        /// Address is a stub that jumps to the real definition.
        const THUNK = 0x0004;
    }
}

/// A named address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySymbol {
    pub name: String,
    pub address: Address,
    pub size: u64,
    pub kind: SymbolKind,
    pub attrs: SymbolAttrs,
}

impl BinarySymbol {
    /// Create a locally defined symbol of unknown kind.
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            size: 0,
            kind: SymbolKind::Other,
            attrs: SymbolAttrs::empty(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_kind(mut self, kind: SymbolKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attrs(mut self, attrs: SymbolAttrs) -> Self {
        self.attrs |= attrs;
        self
    }

    /// Check if the symbol is defined in another binary
    pub fn is_imported(&self) -> bool {
        self.attrs.contains(SymbolAttrs::IMPORTED)
    }

    /// Check if the symbol names a function
    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::Function
    }
}

/// Interface of the symbol table as seen by loaders and later analyses.
pub trait SymbolTable {
    /// Register a symbol. Returns `false` if a symbol already exists at its
    /// address (the existing one is kept).
    fn insert(&mut self, symbol: BinarySymbol) -> bool;

    /// Symbol at exactly `addr`.
    fn find_by_address(&self, addr: Address) -> Option<&BinarySymbol>;

    /// Symbol named `name`.
    fn find_by_name(&self, name: &str) -> Option<&BinarySymbol>;

    /// Number of symbols.
    fn len(&self) -> usize;

    /// Check if the table is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `attrs` (and optionally override the kind) on every symbol with
    /// an address in `[start, end)`. Returns how many were touched.
    fn mark_range(
        &mut self,
        start: Address,
        end: Address,
        attrs: SymbolAttrs,
        kind: Option<SymbolKind>,
    ) -> usize;

    /// Visit every symbol in address order.
    fn for_each(&self, f: &mut dyn FnMut(&BinarySymbol));

    /// Drop all symbols.
    fn clear(&mut self);
}

/// Address-ordered in-memory symbol table.
#[derive(Debug, Default)]
pub struct SymbolStore {
    by_address: BTreeMap<Address, BinarySymbol>,
    by_name: HashMap<String, Address>,
}

impl SymbolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate symbols in address order.
    pub fn iter(&self) -> impl Iterator<Item = &BinarySymbol> {
        self.by_address.values()
    }
}

impl SymbolTable for SymbolStore {
    fn insert(&mut self, symbol: BinarySymbol) -> bool {
        if self.by_address.contains_key(&symbol.address) {
            log::trace!(
                "[Symbols] Keeping existing symbol at {}, dropping {}",
                symbol.address,
                symbol.name
            );
            return false;
        }
        self.by_name
            .entry(symbol.name.clone())
            .or_insert(symbol.address);
        self.by_address.insert(symbol.address, symbol);
        true
    }

    fn find_by_address(&self, addr: Address) -> Option<&BinarySymbol> {
        self.by_address.get(&addr)
    }

    fn find_by_name(&self, name: &str) -> Option<&BinarySymbol> {
        let addr = self.by_name.get(name)?;
        self.by_address.get(addr)
    }

    fn len(&self) -> usize {
        self.by_address.len()
    }

    fn mark_range(
        &mut self,
        start: Address,
        end: Address,
        attrs: SymbolAttrs,
        kind: Option<SymbolKind>,
    ) -> usize {
        if start >= end {
            return 0;
        }
        let mut count = 0;
        for symbol in self.by_address.range_mut(start..end).map(|(_, s)| s) {
            symbol.attrs |= attrs;
            if let Some(kind) = kind {
                symbol.kind = kind;
            }
            count += 1;
        }
        count
    }

    fn for_each(&self, f: &mut dyn FnMut(&BinarySymbol)) {
        for symbol in self.by_address.values() {
            f(symbol);
        }
    }

    fn clear(&mut self) {
        self.by_address.clear();
        self.by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_first_symbol_at_an_address_wins() {
        let mut store = SymbolStore::new();
        assert!(store.insert(BinarySymbol::new("main", Address::new(0x8010))));
        assert!(!store.insert(BinarySymbol::new("alias", Address::new(0x8010))));

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.find_by_address(Address::new(0x8010)).map(|s| s.name.as_str()),
            Some("main")
        );
        assert!(store.find_by_name("alias").is_none());
    }

    #[test]
    fn test_find_by_name() {
        let mut store = SymbolStore::new();
        store.insert(
            BinarySymbol::new("printf", Address::new(0x8100))
                .with_kind(SymbolKind::Function)
                .with_attrs(SymbolAttrs::IMPORTED),
        );

        let printf = store.find_by_name("printf").unwrap();
        assert!(printf.is_imported());
        assert!(printf.is_function());
        assert_eq!(printf.address, Address::new(0x8100));
    }

    #[test]
    fn test_mark_range_is_half_open() {
        let mut store = SymbolStore::new();
        for addr in [0x100u64, 0x110, 0x120, 0x130] {
            store.insert(BinarySymbol::new(alloc::format!("s{:x}", addr), Address::new(addr)));
        }

        let touched = store.mark_range(
            Address::new(0x110),
            Address::new(0x130),
            SymbolAttrs::IMPORTED | SymbolAttrs::THUNK,
            Some(SymbolKind::Function),
        );
        assert_eq!(touched, 2);

        let mut imported = Vec::new();
        store.for_each(&mut |s| {
            if s.is_imported() {
                imported.push(s.address.value());
            }
        });
        assert_eq!(imported, [0x110, 0x120]);
        assert_eq!(
            store.mark_range(Address::new(0x200), Address::new(0x100), SymbolAttrs::WEAK, None),
            0
        );
    }

    #[test]
    fn test_clear() {
        let mut store = SymbolStore::new();
        store.insert(BinarySymbol::new("a", Address::new(1)));
        store.clear();
        assert!(store.is_empty());
        assert!(store.find_by_name("a").is_none());
    }
}
