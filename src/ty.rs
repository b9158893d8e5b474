//! Type table: every type the program mentions lives in one arena and is
//! referred to by [`TypeId`]. Aliases are kept as distinct entries but all
//! equivalence checks go through [`TypeTable::actual`].

use crate::ast::Expr;
use crate::scope::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  /// Result "type" of a procedure call; never stored in a variable.
  Void,
  Integer,
  Real,
  Array { element: TypeId, low: i32, high: i32 },
  Record { fields: ScopeId, size: u32 },
  Alias { target: TypeId },
  Pointer { target: TypeId },
}

#[derive(Debug, Clone)]
pub struct TypeDef {
  pub name: Option<String>,
  pub kind: TypeKind,
}

const VOID: TypeId = TypeId(0);
const INTEGER: TypeId = TypeId(1);
const REAL: TypeId = TypeId(2);

/// Size in bytes of every scalar slot on the target machine.
pub const WORD_SIZE: u32 = 4;

#[derive(Debug, Clone)]
pub struct TypeTable {
  types: Vec<TypeDef>,
}

impl Default for TypeTable {
  fn default() -> Self {
    Self::new()
  }
}

impl TypeTable {
  pub fn new() -> Self {
    let builtin = |name: &str, kind| TypeDef {
      name: Some(name.to_string()),
      kind,
    };
    Self {
      types: vec![
        builtin("untyped", TypeKind::Void),
        builtin("integer", TypeKind::Integer),
        builtin("real", TypeKind::Real),
      ],
    }
  }

  pub fn void(&self) -> TypeId {
    VOID
  }

  pub fn integer(&self) -> TypeId {
    INTEGER
  }

  pub fn real(&self) -> TypeId {
    REAL
  }

  pub fn get(&self, id: TypeId) -> &TypeDef {
    &self.types[id.0]
  }

  /// Kind of the actual (alias-free) type.
  pub fn kind(&self, id: TypeId) -> &TypeKind {
    &self.get(self.actual(id)).kind
  }

  fn add(&mut self, kind: TypeKind) -> TypeId {
    self.types.push(TypeDef { name: None, kind });
    TypeId(self.types.len() - 1)
  }

  pub fn array(&mut self, element: TypeId, low: i32, high: i32) -> TypeId {
    self.add(TypeKind::Array { element, low, high })
  }

  pub fn record(&mut self, fields: ScopeId, size: u32) -> TypeId {
    self.add(TypeKind::Record { fields, size })
  }

  /// Pointer types are interned per actual target so that `@x` and a declared
  /// `^integer` compare equal.
  pub fn pointer_to(&mut self, target: TypeId) -> TypeId {
    let target = self.actual(target);
    let existing = self.types.iter().position(|def| match def.kind {
      TypeKind::Pointer { target: t } => self.actual(t) == target,
      _ => false,
    });
    match existing {
      Some(index) => TypeId(index),
      None => self.add(TypeKind::Pointer { target }),
    }
  }

  /// Bind `name` to `target` for a `type name = ...` declaration.
  ///
  /// A freshly constructed anonymous type simply takes the name; anything that
  /// already has one (a built-in, another declared type, an interned pointer)
  /// gets a new alias entry instead.
  pub fn declare(&mut self, name: &str, target: TypeId) -> TypeId {
    if self.types[target.0].name.is_none() {
      self.types[target.0].name = Some(name.to_string());
      return target;
    }
    let id = self.add(TypeKind::Alias { target });
    self.types[id.0].name = Some(name.to_string());
    id
  }

  /// Follow the alias chain to its terminal type.
  pub fn actual(&self, mut id: TypeId) -> TypeId {
    while let TypeKind::Alias { target } = self.types[id.0].kind {
      id = target;
    }
    id
  }

  pub fn equal(&self, a: TypeId, b: TypeId) -> bool {
    self.actual(a) == self.actual(b)
  }

  pub fn is_integer(&self, id: TypeId) -> bool {
    self.actual(id) == INTEGER
  }

  pub fn is_real(&self, id: TypeId) -> bool {
    self.actual(id) == REAL
  }

  pub fn is_numeric(&self, id: TypeId) -> bool {
    self.is_integer(id) || self.is_real(id)
  }

  pub fn size(&self, id: TypeId) -> u32 {
    match *self.kind(id) {
      TypeKind::Void => 0,
      TypeKind::Integer | TypeKind::Real | TypeKind::Pointer { .. } => WORD_SIZE,
      TypeKind::Array { element, low, high } => {
        let count = i64::from(high) - i64::from(low) + 1;
        (i64::from(self.size(element)) * count) as u32
      }
      TypeKind::Record { size, .. } => size,
      TypeKind::Alias { .. } => unreachable!("actual type is never an alias"),
    }
  }

  /// Name of the type if it has one, otherwise its structure.
  pub fn describe(&self, id: TypeId) -> String {
    let def = self.get(id);
    if let Some(name) = &def.name {
      return name.clone();
    }
    match def.kind {
      TypeKind::Array { element, low, high } => format!("array[{low}..{high}] of {}", self.describe(element)),
      TypeKind::Pointer { target } => format!("^{}", self.describe(target)),
      TypeKind::Record { .. } => "record".to_string(),
      TypeKind::Alias { target } => self.describe(target),
      TypeKind::Void | TypeKind::Integer | TypeKind::Real => unreachable!("built-in types are named"),
    }
  }

  /// The language's only implicit conversion: Integer widens to Real.
  ///
  /// Returns the (possibly wrapped) expression when it fits `target`, or hands
  /// the expression back untouched when no coercion exists.
  pub fn try_coerce(&self, expr: Expr, target: TypeId) -> Result<Expr, Expr> {
    if self.equal(expr.result_type(), target) {
      return Ok(expr);
    }
    if self.is_integer(expr.result_type()) && self.is_real(target) {
      return Ok(Expr::int_to_real(expr, REAL));
    }
    Err(expr)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{ExprKind, Literal};

  #[test]
  fn alias_chains_resolve_to_terminal_type() {
    let mut types = TypeTable::new();
    let a = types.declare("a", types.integer());
    let b = types.declare("b", a);
    assert_ne!(a, types.integer());
    assert_eq!(types.actual(b), types.integer());
    assert!(types.equal(b, types.integer()));
    assert_eq!(types.describe(b), "b");
  }

  #[test]
  fn anonymous_types_take_the_declared_name() {
    let mut types = TypeTable::new();
    let arr = types.array(types.integer(), 1, 10);
    assert_eq!(types.describe(arr), "array[1..10] of integer");
    let named = types.declare("vec", arr);
    assert_eq!(named, arr);
    assert_eq!(types.describe(arr), "vec");
    assert_eq!(types.size(arr), 40);
  }

  #[test]
  fn structurally_equal_arrays_are_distinct() {
    let mut types = TypeTable::new();
    let a = types.array(types.integer(), 0, 9);
    let b = types.array(types.integer(), 0, 9);
    assert!(!types.equal(a, b));
  }

  #[test]
  fn pointers_are_interned() {
    let mut types = TypeTable::new();
    let myint = types.declare("myint", types.integer());
    let p = types.pointer_to(types.integer());
    let q = types.pointer_to(myint);
    assert_eq!(p, q);
    assert_eq!(types.describe(p), "^integer");
  }

  #[test]
  fn integer_coerces_to_real_only() {
    let types = TypeTable::new();
    let one = Expr::literal(Literal::Int(1), types.integer());
    let widened = types.try_coerce(one, types.real()).unwrap();
    assert!(matches!(widened.kind(), ExprKind::IntToReal(_)));
    assert!(types.is_real(widened.result_type()));

    let half = Expr::literal(Literal::Real(0.5), types.real());
    let rejected = types.try_coerce(half, types.integer()).unwrap_err();
    assert!(matches!(rejected.kind(), ExprKind::Literal(Literal::Real(_))));

    let same = Expr::literal(Literal::Int(2), types.integer());
    let kept = types.try_coerce(same, types.integer()).unwrap();
    assert!(matches!(kept.kind(), ExprKind::Literal(Literal::Int(2))));
  }
}
