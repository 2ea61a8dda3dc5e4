//! Symbol table: name classification and nested block-scope lookup within
//! one translation unit.
//!
//! A name is either a constant/`let` binding, a module, a struct/trait
//! definition, a plain variable, or a `Nested` entry standing in for an
//! anonymous inner function. The enclosing-function chain is modelled one
//! level up, by [`crate::transl_unit::TranslationUnitStack`]; this type
//! only owns the block-scope stack for a single unit.

use rustc_hash::FxHashMap;

/// How a name was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    /// A `let`-style immutable binding.
    Constant,
    /// A module reference brought in by an import.
    Module,
    /// An anonymous inner function/closure, named by its `id` slot only.
    Nested,
    Struct,
    Trait,
    /// A plain mutable variable.
    Variable,
    Unknown,
}

/// One declared name.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: SymbolType,
    /// Local slot index once assigned; `-1` before allocation.
    pub id: i16,
    /// Disambiguator for anonymous `Nested` symbols declared in the same
    /// scope (closure literals get `$anon0`, `$anon1`, ...).
    pub nested: u16,
    pub declared: bool,
    /// Set once an inner unit's lookup resolves through this entry,
    /// marking it as captured into that inner unit's closure.
    pub free: bool,
}

impl Symbol {
    fn new(name: String, ty: SymbolType) -> Self {
        Self {
            name,
            ty,
            id: -1,
            nested: 0,
            declared: false,
            free: false,
        }
    }
}

/// Raised when a name is redeclared in the same scope with a different
/// classification (e.g. a `let` shadowed by a `var` of the same name
/// without an intervening nested scope).
#[derive(Debug, Clone, thiserror::Error)]
#[error("'{name}' is already declared as {existing:?}, cannot redeclare as {attempted:?}")]
pub struct RedeclarationError {
    pub name: String,
    pub existing: SymbolType,
    pub attempted: SymbolType,
}

/// The block-scope stack for one translation unit. `scopes[0]` is the
/// unit's top-level scope (function parameters and top-level `let`s);
/// later entries are nested blocks (`if`/loop/`sync` bodies).
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<FxHashMap<String, Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
        }
    }

    /// Open a new nested block scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    /// Close the innermost block scope, returning its symbols.
    ///
    /// The outermost (function-level) scope is never popped; callers only
    /// push/pop scopes for block-level nesting.
    pub fn pop_scope(&mut self) -> FxHashMap<String, Symbol> {
        assert!(self.scopes.len() > 1, "cannot pop a unit's outermost scope");
        self.scopes.pop().unwrap()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declare `name` with classification `ty` in the innermost scope.
    /// Redeclaring the same name with the same classification in the same
    /// scope is allowed (idempotent re-entry, e.g. revisiting a hoisted
    /// declaration); a different classification is a compile error.
    pub fn insert(&mut self, name: &str, ty: SymbolType) -> Result<&mut Symbol, RedeclarationError> {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if let Some(existing) = scope.get(name) {
            if existing.ty != ty {
                return Err(RedeclarationError {
                    name: name.to_string(),
                    existing: existing.ty,
                    attempted: ty,
                });
            }
        } else {
            scope.insert(name.to_string(), Symbol::new(name.to_string(), ty));
        }
        Ok(scope.get_mut(name).unwrap())
    }

    /// Look up `name`, walking the nested scope stack from innermost to
    /// outermost within this unit only (no enclosing-unit chain).
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name))
    }

    /// Whether `name` is declared in the innermost scope specifically
    /// (used for shadowing diagnostics).
    pub fn declared_in_current_scope(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|s| s.contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_inner_scopes_before_outer_ones() {
        let mut table = SymbolTable::new();
        table.insert("x", SymbolType::Variable).unwrap();
        table.push_scope();
        table.insert("x", SymbolType::Constant).unwrap();
        assert_eq!(table.lookup("x").unwrap().ty, SymbolType::Constant);
        table.pop_scope();
        assert_eq!(table.lookup("x").unwrap().ty, SymbolType::Variable);
    }

    #[test]
    fn redeclaring_with_a_different_classification_is_an_error() {
        let mut table = SymbolTable::new();
        table.insert("x", SymbolType::Variable).unwrap();
        let err = table.insert("x", SymbolType::Constant).unwrap_err();
        assert_eq!(err.existing, SymbolType::Variable);
        assert_eq!(err.attempted, SymbolType::Constant);
    }

    #[test]
    fn redeclaring_with_the_same_classification_is_fine() {
        let mut table = SymbolTable::new();
        table.insert("x", SymbolType::Variable).unwrap();
        assert!(table.insert("x", SymbolType::Variable).is_ok());
    }

    #[test]
    fn a_shadowed_name_is_not_visible_after_its_scope_closes() {
        let mut table = SymbolTable::new();
        table.push_scope();
        table.insert("y", SymbolType::Variable).unwrap();
        table.pop_scope();
        assert!(table.lookup("y").is_none());
    }
}
