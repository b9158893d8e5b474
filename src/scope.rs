//! Symbols and the scope stack.
//!
//! Symbols and scopes are stored in arenas owned by [`ScopeStack`] and
//! referenced by index, so record types and routines can point at their
//! nested scopes long after those scopes have been popped.

use std::collections::HashMap;

use tracing::trace;

use crate::ast::{Literal, Stmt};
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::Token;
use crate::ty::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// What a name lookup is required to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  Type,
  Procedure,
  Function,
  Variable,
}

/// Where a variable's value lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
  /// Static data addressed by label.
  Global { label: String },
  /// `%ebp`-relative slot inside the current routine's frame.
  Local { offset: i32 },
  /// `%ebp`-relative argument slot; by-ref slots hold an address.
  Parameter { offset: i32, by_ref: bool },
  /// Byte offset inside the enclosing record.
  Field { offset: u32 },
  Constant(Literal),
}

#[derive(Debug, Clone)]
pub struct Variable {
  pub ty: TypeId,
  pub storage: Storage,
}

impl Variable {
  pub fn is_constant(&self) -> bool {
    matches!(self.storage, Storage::Constant(_))
  }

  pub fn is_by_ref(&self) -> bool {
    matches!(self.storage, Storage::Parameter { by_ref: true, .. })
  }
}

#[derive(Debug, Clone)]
pub struct Routine {
  pub params: Vec<SymbolId>,
  pub result: Option<TypeId>,
  /// The implicit `result` variable of a function.
  pub result_var: Option<SymbolId>,
  pub scope: ScopeId,
  pub entry_label: String,
  /// Bytes of locals below `%ebp`.
  pub frame_size: u32,
  pub body: Option<Stmt>,
}

#[derive(Debug, Clone)]
pub enum SymbolKind {
  Type(TypeId),
  Variable(Variable),
  Routine(Routine),
}

#[derive(Debug, Clone)]
pub struct Symbol {
  /// Lowercased; the language is case-insensitive.
  pub name: String,
  /// Spelling at the point of declaration.
  pub display_name: String,
  pub kind: SymbolKind,
}

impl Symbol {
  pub fn new(name: &str, kind: SymbolKind) -> Self {
    Self {
      name: name.to_ascii_lowercase(),
      display_name: name.to_string(),
      kind,
    }
  }

  pub fn has(&self, capability: Capability) -> bool {
    match (&self.kind, capability) {
      (SymbolKind::Type(_), Capability::Type) => true,
      (SymbolKind::Variable(_), Capability::Variable) => true,
      (SymbolKind::Routine(routine), Capability::Function) => routine.result.is_some(),
      (SymbolKind::Routine(routine), Capability::Procedure) => routine.result.is_none(),
      _ => false,
    }
  }

  pub fn variable(&self) -> Option<&Variable> {
    match &self.kind {
      SymbolKind::Variable(var) => Some(var),
      _ => None,
    }
  }

  pub fn routine(&self) -> Option<&Routine> {
    match &self.kind {
      SymbolKind::Routine(routine) => Some(routine),
      _ => None,
    }
  }

  pub fn type_id(&self) -> Option<TypeId> {
    match self.kind {
      SymbolKind::Type(id) => Some(id),
      _ => None,
    }
  }
}

/// One namespace. Names are unique within it; declaration order is kept for listings.
#[derive(Debug, Clone, Default)]
pub struct Scope {
  names: HashMap<String, SymbolId>,
  order: Vec<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct ScopeStack {
  symbols: Vec<Symbol>,
  scopes: Vec<Scope>,
  stack: Vec<ScopeId>,
}

impl Default for ScopeStack {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopeStack {
  /// A stack holding only the global scope.
  pub fn new() -> Self {
    Self {
      symbols: Vec::new(),
      scopes: vec![Scope::default()],
      stack: vec![ScopeId(0)],
    }
  }

  pub fn global(&self) -> ScopeId {
    ScopeId(0)
  }

  pub fn top(&self) -> ScopeId {
    self.stack[self.stack.len() - 1]
  }

  /// Allocate a fresh, empty scope without entering it.
  pub fn new_scope(&mut self) -> ScopeId {
    self.scopes.push(Scope::default());
    ScopeId(self.scopes.len() - 1)
  }

  pub fn push(&mut self, scope: ScopeId) {
    self.stack.push(scope);
  }

  /// Leave the innermost scope. The global scope stays put.
  pub fn pop(&mut self) -> Option<ScopeId> {
    if self.stack.len() > 1 { self.stack.pop() } else { None }
  }

  /// Declare `symbol` in the top scope; a clash with a name already declared
  /// there is fatal, while shadowing an outer scope is allowed.
  pub fn add(&mut self, symbol: Symbol, token: &Token) -> CompileResult<SymbolId> {
    let top = self.top();
    if self.scopes[top.0].names.contains_key(&symbol.name) {
      return Err(CompileError::semantic(
        token,
        format!("duplicate declaration of '{}'", symbol.display_name),
      ));
    }
    trace!(name = %symbol.name, scope = top.0, "declare symbol");
    let id = SymbolId(self.symbols.len());
    self.scopes[top.0].names.insert(symbol.name.clone(), id);
    self.scopes[top.0].order.push(id);
    self.symbols.push(symbol);
    Ok(id)
  }

  /// Innermost-first lookup.
  pub fn find(&self, name: &str) -> Option<SymbolId> {
    let name = name.to_ascii_lowercase();
    self
      .stack
      .iter()
      .rev()
      .find_map(|scope| self.scopes[scope.0].names.get(&name).copied())
  }

  /// Lookup restricted to a single scope, e.g. a record's fields.
  pub fn find_in(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
    self.scopes[scope.0].names.get(&name.to_ascii_lowercase()).copied()
  }

  /// `find` plus a capability check; both failures report `message`.
  pub fn find_or_die(&self, token: &Token, capability: Capability, message: &str) -> CompileResult<SymbolId> {
    match self.find(&token.lexeme) {
      Some(id) if self.symbol(id).has(capability) => Ok(id),
      _ => Err(CompileError::semantic(token, message)),
    }
  }

  pub fn symbol(&self, id: SymbolId) -> &Symbol {
    &self.symbols[id.0]
  }

  pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
    &mut self.symbols[id.0]
  }

  /// Symbols of `scope` in declaration order.
  pub fn symbols_in(&self, scope: ScopeId) -> impl Iterator<Item = SymbolId> + '_ {
    self.scopes[scope.0].order.iter().copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::{TokenKind, TokenValue};
  use crate::ty::TypeTable;

  fn ident(name: &str) -> Token {
    Token::new(TokenKind::Identifier, name, TokenValue::None, 1, 1)
  }

  fn var(types: &TypeTable, name: &str, offset: i32) -> Symbol {
    Symbol::new(
      name,
      SymbolKind::Variable(Variable {
        ty: types.integer(),
        storage: Storage::Local { offset },
      }),
    )
  }

  #[test]
  fn inner_declaration_shadows_outer_until_popped() {
    let types = TypeTable::new();
    let mut scopes = ScopeStack::new();
    let outer = scopes.add(var(&types, "n", 0), &ident("n")).unwrap();

    let inner_scope = scopes.new_scope();
    scopes.push(inner_scope);
    let inner = scopes.add(var(&types, "N", -4), &ident("N")).unwrap();
    assert_eq!(scopes.find("n"), Some(inner));
    assert_eq!(scopes.find_in(inner_scope, "n"), Some(inner));

    assert_eq!(scopes.pop(), Some(inner_scope));
    assert_eq!(scopes.find("N"), Some(outer));
  }

  #[test]
  fn duplicate_in_same_scope_is_rejected() {
    let types = TypeTable::new();
    let mut scopes = ScopeStack::new();
    let first = scopes.add(var(&types, "x", 0), &ident("x")).unwrap();
    let err = scopes.add(var(&types, "X", 4), &ident("X")).unwrap_err();
    assert_eq!(err.message(), "duplicate declaration of 'X'");
    assert_eq!(scopes.find("x"), Some(first));
  }

  #[test]
  fn global_scope_is_never_popped() {
    let mut scopes = ScopeStack::new();
    assert_eq!(scopes.pop(), None);
    assert_eq!(scopes.top(), scopes.global());
  }

  #[test]
  fn find_or_die_checks_capability() {
    let types = TypeTable::new();
    let mut scopes = ScopeStack::new();
    scopes
      .add(Symbol::new("integer", SymbolKind::Type(types.integer())), &ident("integer"))
      .unwrap();
    scopes.add(var(&types, "i", 0), &ident("i")).unwrap();

    assert!(
      scopes
        .find_or_die(&ident("Integer"), Capability::Type, "type expected")
        .is_ok()
    );
    let err = scopes
      .find_or_die(&ident("i"), Capability::Type, "type expected")
      .unwrap_err();
    assert_eq!(err.message(), "type expected");
    assert!(
      scopes
        .find_or_die(&ident("missing"), Capability::Variable, "variable expected")
        .is_err()
    );
  }
}
