//! Component D: the symbol table, plus the [`Symbol`] and [`LocalSymbol`]
//! records from spec §3.
//!
//! `Symbol` is a process-wide, reference-counted node: every global
//! reference to the same name shares one `Rc<RefCell<Symbol>>` (spec §8.3,
//! "symbol interning"). Its back-reference to the defining
//! [`crate::object_file::ObjectFile`] is a [`Weak`] pointer, matching spec
//! §9's "Symbols are non-owning observers of Files" — an `ObjectFile` is
//! always kept alive by `Context::objects`, so the weak reference upgrades
//! for as long as the program runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::merge::SectionFragment;
use crate::object_file::ObjectFile;

/// A globally interned name binding (spec §3's `Symbol`).
#[derive(Debug, Default)]
pub struct Symbol {
    pub name: String,
    /// The defining object, or `None` while unresolved.
    pub file: Option<Weak<RefCell<ObjectFile>>>,
    /// Index into the defining object's `sections`, when the symbol is
    /// section-relative and the section was not merged away.
    pub input_section: Option<usize>,
    /// The deduplicated fragment the symbol points into, when its section
    /// was mergeable. Mutually exclusive with `input_section`.
    pub fragment: Option<Rc<RefCell<SectionFragment>>>,
    /// Interpretation depends on binding: a plain offset into a section, an
    /// absolute value, or (once bound to a fragment) the intra-fragment
    /// offset.
    pub value: u64,
    /// The symbol's index within its defining object's symbol array.
    pub sym_idx: usize,
}

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// `true` once some live object has claimed this name (spec §4.C's
    /// `resolveSymbols`).
    pub fn is_resolved(&self) -> bool {
        self.file.as_ref().and_then(Weak::upgrade).is_some()
    }

    /// Binds this symbol to `file`'s `input_section`, replacing any earlier
    /// binding. `input_section` is `None` for absolute symbols.
    pub fn bind(&mut self, file: &Rc<RefCell<ObjectFile>>, input_section: Option<usize>) {
        self.file = Some(Rc::downgrade(file));
        self.input_section = input_section;
        self.fragment = None;
    }

    /// Redirects this symbol into a merged-section fragment, adjusting
    /// `value` to the intra-fragment offset (spec §4.E's `registerSectionPieces`).
    pub fn bind_fragment(&mut self, fragment: Rc<RefCell<SectionFragment>>, intra_offset: u64) {
        self.input_section = None;
        self.fragment = Some(fragment);
        self.value = intra_offset;
    }

    /// Resets the symbol to unresolved (spec §4.C's `clearSymbols`), so a
    /// still-live object's definition may claim it instead.
    pub fn clear(&mut self) {
        self.file = None;
        self.input_section = None;
        self.fragment = None;
        self.value = 0;
    }
}

/// A local (non-global, `Symbols[0..firstGlobal)`) symbol, owned outright by
/// its [`ObjectFile`] — no sharing, no interning.
#[derive(Debug, Default, Clone)]
pub struct LocalSymbol {
    pub name: String,
    pub value: u64,
    pub sym_idx: usize,
    pub input_section: Option<usize>,
}

/// The process-wide map from symbol name to its single canonical
/// [`Symbol`] node (spec §3/§4.D). Owned by [`crate::context::Context`].
#[derive(Debug, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, Rc<RefCell<Symbol>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the interned `Symbol` for `name`, inserting a fresh
    /// unresolved one if absent.
    pub fn intern(&mut self, name: &str) -> Rc<RefCell<Symbol>> {
        self.by_name
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(Symbol::new(name))))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Property from spec §8.3: two references to the same name intern to
    /// the pointer-equal `Symbol`.
    #[test]
    fn interning_is_pointer_equal_by_name() {
        let mut table = SymbolTable::new();
        let a = table.intern("main");
        let b = table.intern("main");
        assert!(Rc::ptr_eq(&a, &b));

        let c = table.intern("other");
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn fresh_symbol_is_unresolved() {
        let mut table = SymbolTable::new();
        let sym = table.intern("undef");
        assert!(!sym.borrow().is_resolved());
    }
}
