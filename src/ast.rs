//! Syntax tree produced by the parser and consumed by code generation.
//!
//! Expression nodes are fully typed: result type and lvalue-ness are decided
//! by the parser when a node is built and never change afterwards. Loops are
//! tagged with a [`LoopId`] so `break`/`continue` refer to their target
//! without any parent links.

use std::fmt::Write as _;

use strum_macros::Display;

use crate::scope::{ScopeId, ScopeStack, Storage, SymbolId, SymbolKind};
use crate::ty::{TypeId, TypeKind, TypeTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
  Int(i32),
  Real(f32),
}

impl std::fmt::Display for Literal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Literal::Int(value) => write!(f, "{value}"),
      Literal::Real(value) => write!(f, "{value:?}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
  #[strum(serialize = "-")]
  Neg,
  #[strum(serialize = "+")]
  Plus,
  #[strum(serialize = "not")]
  Not,
  #[strum(serialize = "@")]
  AddressOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
  #[strum(serialize = "+")]
  Add,
  #[strum(serialize = "-")]
  Sub,
  #[strum(serialize = "*")]
  Mul,
  #[strum(serialize = "/")]
  RealDiv,
  #[strum(serialize = "div")]
  Div,
  #[strum(serialize = "mod")]
  Mod,
  #[strum(serialize = "and")]
  And,
  #[strum(serialize = "or")]
  Or,
  #[strum(serialize = "xor")]
  Xor,
  #[strum(serialize = "shl")]
  Shl,
  #[strum(serialize = "shr")]
  Shr,
  #[strum(serialize = "=")]
  Eq,
  #[strum(serialize = "<>")]
  Ne,
  #[strum(serialize = "<")]
  Lt,
  #[strum(serialize = "<=")]
  Le,
  #[strum(serialize = ">")]
  Gt,
  #[strum(serialize = ">=")]
  Ge,
}

impl BinaryOp {
  pub fn is_relational(self) -> bool {
    matches!(
      self,
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
    )
  }

  /// Operators defined on Integer operands only.
  pub fn is_integer_only(self) -> bool {
    matches!(
      self,
      BinaryOp::Div | BinaryOp::Mod | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Shl | BinaryOp::Shr
    )
  }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
  Literal(Literal),
  VarRef(SymbolId),
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  ArrayAccess {
    array: Box<Expr>,
    index: Box<Expr>,
  },
  RecordAccess {
    record: Box<Expr>,
    field: SymbolId,
  },
  Call {
    callee: SymbolId,
    args: Vec<Expr>,
  },
  IntToReal(Box<Expr>),
}

/// A typed expression. Fields are private so nothing can retype a node after
/// the parser has checked it.
#[derive(Debug, Clone)]
pub struct Expr {
  kind: ExprKind,
  ty: TypeId,
  lvalue: bool,
}

impl Expr {
  pub fn literal(value: Literal, ty: TypeId) -> Self {
    Self {
      kind: ExprKind::Literal(value),
      ty,
      lvalue: false,
    }
  }

  pub fn var_ref(symbol: SymbolId, ty: TypeId, lvalue: bool) -> Self {
    Self {
      kind: ExprKind::VarRef(symbol),
      ty,
      lvalue,
    }
  }

  pub fn unary(op: UnaryOp, operand: Expr, ty: TypeId) -> Self {
    Self {
      kind: ExprKind::Unary {
        op,
        operand: Box::new(operand),
      },
      ty,
      lvalue: false,
    }
  }

  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: TypeId) -> Self {
    Self {
      kind: ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      ty,
      lvalue: false,
    }
  }

  pub fn array_access(array: Expr, index: Expr, element: TypeId) -> Self {
    Self {
      kind: ExprKind::ArrayAccess {
        array: Box::new(array),
        index: Box::new(index),
      },
      ty: element,
      lvalue: true,
    }
  }

  pub fn record_access(record: Expr, field: SymbolId, ty: TypeId) -> Self {
    Self {
      kind: ExprKind::RecordAccess {
        record: Box::new(record),
        field,
      },
      ty,
      lvalue: true,
    }
  }

  pub fn call(callee: SymbolId, args: Vec<Expr>, ty: TypeId) -> Self {
    Self {
      kind: ExprKind::Call { callee, args },
      ty,
      lvalue: false,
    }
  }

  pub fn int_to_real(operand: Expr, real: TypeId) -> Self {
    Self {
      kind: ExprKind::IntToReal(Box::new(operand)),
      ty: real,
      lvalue: false,
    }
  }

  pub fn kind(&self) -> &ExprKind {
    &self.kind
  }

  pub fn result_type(&self) -> TypeId {
    self.ty
  }

  pub fn is_lvalue(&self) -> bool {
    self.lvalue
  }

  /// Value of the expression if it is known at compile time.
  ///
  /// Integer arithmetic wraps like the target machine; division by zero is
  /// left for run time.
  pub fn const_value(&self, scopes: &ScopeStack) -> Option<Literal> {
    match &self.kind {
      ExprKind::Literal(value) => Some(*value),
      ExprKind::VarRef(id) => match scopes.symbol(*id).variable()?.storage {
        Storage::Constant(value) => Some(value),
        _ => None,
      },
      ExprKind::IntToReal(operand) => match operand.const_value(scopes)? {
        Literal::Int(value) => Some(Literal::Real(value as f32)),
        real => Some(real),
      },
      ExprKind::Unary { op, operand } => {
        let value = operand.const_value(scopes)?;
        match (op, value) {
          (UnaryOp::Plus, value) => Some(value),
          (UnaryOp::Neg, Literal::Int(v)) => Some(Literal::Int(v.wrapping_neg())),
          (UnaryOp::Neg, Literal::Real(v)) => Some(Literal::Real(-v)),
          (UnaryOp::Not, Literal::Int(v)) => Some(Literal::Int((v == 0) as i32)),
          _ => None,
        }
      }
      ExprKind::Binary { op, lhs, rhs } => {
        let lhs = lhs.const_value(scopes)?;
        let rhs = rhs.const_value(scopes)?;
        match (lhs, rhs) {
          (Literal::Int(a), Literal::Int(b)) => fold_int(*op, a, b),
          (Literal::Real(a), Literal::Real(b)) => fold_real(*op, a, b),
          _ => None,
        }
      }
      ExprKind::ArrayAccess { .. } | ExprKind::RecordAccess { .. } | ExprKind::Call { .. } => None,
    }
  }
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> Option<Literal> {
  let result = match op {
    BinaryOp::Eq => a == b,
    BinaryOp::Ne => a != b,
    BinaryOp::Lt => a < b,
    BinaryOp::Le => a <= b,
    BinaryOp::Gt => a > b,
    BinaryOp::Ge => a >= b,
    _ => return None,
  };
  Some(Literal::Int(result as i32))
}

fn fold_int(op: BinaryOp, a: i32, b: i32) -> Option<Literal> {
  let value = match op {
    BinaryOp::Add => a.wrapping_add(b),
    BinaryOp::Sub => a.wrapping_sub(b),
    BinaryOp::Mul => a.wrapping_mul(b),
    BinaryOp::Div if b != 0 => a.wrapping_div(b),
    BinaryOp::Mod if b != 0 => a.wrapping_rem(b),
    BinaryOp::And => a & b,
    BinaryOp::Or => a | b,
    BinaryOp::Xor => a ^ b,
    BinaryOp::Shl => a.wrapping_shl(b as u32),
    BinaryOp::Shr => ((a as u32).wrapping_shr(b as u32)) as i32,
    op if op.is_relational() => return compare(op, a, b),
    _ => return None,
  };
  Some(Literal::Int(value))
}

fn fold_real(op: BinaryOp, a: f32, b: f32) -> Option<Literal> {
  let value = match op {
    BinaryOp::Add => a + b,
    BinaryOp::Sub => a - b,
    BinaryOp::Mul => a * b,
    BinaryOp::RealDiv => a / b,
    op if op.is_relational() => return compare(op, a, b),
    _ => return None,
  };
  Some(Literal::Real(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  To,
  Downto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
  Break,
  Continue,
}

#[derive(Debug, Clone)]
pub enum WriteArg {
  Value(Expr),
  Text(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
  Assign {
    lhs: Expr,
    rhs: Expr,
  },
  Block(Vec<Stmt>),
  /// Routine call whose result, if any, is discarded.
  Call(Expr),
  Write {
    args: Vec<WriteArg>,
    newline: bool,
  },
  For {
    id: LoopId,
    index: Expr,
    low: Expr,
    high: Expr,
    direction: Direction,
    body: Box<Stmt>,
  },
  While {
    id: LoopId,
    cond: Expr,
    body: Box<Stmt>,
  },
  /// `repeat body until cond`: the body runs at least once.
  Until {
    id: LoopId,
    cond: Expr,
    body: Box<Stmt>,
  },
  If {
    cond: Expr,
    then_branch: Box<Stmt>,
    else_branch: Option<Box<Stmt>>,
  },
  Jump {
    kind: JumpKind,
    target: LoopId,
  },
  Exit,
}

/// Everything the parser produces for one compilation unit.
#[derive(Debug)]
pub struct Program {
  pub name: Option<String>,
  pub types: TypeTable,
  pub scopes: ScopeStack,
  /// Routine symbols in declaration order.
  pub routines: Vec<SymbolId>,
  pub body: Stmt,
}

/// Indented dump of the syntax tree: each routine body, then the main block.
pub fn print_tree(program: &Program) -> String {
  let mut printer = TreePrinter::new(program);
  for &id in &program.routines {
    let symbol = program.scopes.symbol(id);
    if let Some(body) = symbol.routine().and_then(|routine| routine.body.as_ref()) {
      printer.line(&format!("Routine {}", symbol.display_name));
      printer.indented(|p| p.print_stmt(body));
    }
  }
  printer.line("Main");
  printer.indented(|p| p.print_stmt(&program.body));
  printer.out
}

struct TreePrinter<'a> {
  program: &'a Program,
  indent: usize,
  out: String,
}

impl<'a> TreePrinter<'a> {
  fn new(program: &'a Program) -> Self {
    Self {
      program,
      indent: 0,
      out: String::new(),
    }
  }

  fn line(&mut self, text: &str) {
    let _ = writeln!(self.out, "{}{}", "  ".repeat(self.indent), text);
  }

  fn indented<F>(&mut self, f: F)
  where
    F: FnOnce(&mut Self),
  {
    self.indent += 1;
    f(self);
    self.indent -= 1;
  }

  fn name(&self, id: SymbolId) -> &'a str {
    &self.program.scopes.symbol(id).display_name
  }

  fn print_stmt(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Assign { lhs, rhs } => {
        self.line("Assign");
        self.indented(|p| {
          p.print_expr(lhs);
          p.print_expr(rhs);
        });
      }
      Stmt::Block(stmts) => {
        self.line("Block");
        self.indented(|p| stmts.iter().for_each(|s| p.print_stmt(s)));
      }
      Stmt::Call(call) => {
        self.line("CallStmt");
        self.indented(|p| p.print_expr(call));
      }
      Stmt::Write { args, newline } => {
        self.line(if *newline { "Writeln" } else { "Write" });
        self.indented(|p| {
          for arg in args {
            match arg {
              WriteArg::Value(expr) => p.print_expr(expr),
              WriteArg::Text(text) => p.line(&format!("Text {:?}", String::from_utf8_lossy(text))),
            }
          }
        });
      }
      Stmt::For {
        id,
        index,
        low,
        high,
        direction,
        body,
      } => {
        let dir = match direction {
          Direction::To => "to",
          Direction::Downto => "downto",
        };
        self.line(&format!("For #{} {dir}", id.0));
        self.indented(|p| {
          p.print_expr(index);
          p.print_expr(low);
          p.print_expr(high);
          p.print_stmt(body);
        });
      }
      Stmt::While { id, cond, body } => {
        self.line(&format!("While #{}", id.0));
        self.indented(|p| {
          p.print_expr(cond);
          p.print_stmt(body);
        });
      }
      Stmt::Until { id, cond, body } => {
        self.line(&format!("Until #{}", id.0));
        self.indented(|p| {
          p.print_stmt(body);
          p.print_expr(cond);
        });
      }
      Stmt::If {
        cond,
        then_branch,
        else_branch,
      } => {
        self.line("If");
        self.indented(|p| {
          p.print_expr(cond);
          p.print_stmt(then_branch);
          if let Some(else_branch) = else_branch {
            p.line("Else");
            p.indented(|p| p.print_stmt(else_branch));
          }
        });
      }
      Stmt::Jump { kind, target } => {
        let word = match kind {
          JumpKind::Break => "Break",
          JumpKind::Continue => "Continue",
        };
        self.line(&format!("{word} #{}", target.0));
      }
      Stmt::Exit => self.line("Exit"),
    }
  }

  fn print_expr(&mut self, expr: &Expr) {
    let ty = self.program.types.describe(expr.result_type());
    match expr.kind() {
      ExprKind::Literal(value) => self.line(&format!("Literal {value} : {ty}")),
      ExprKind::VarRef(id) => self.line(&format!("VarRef {} : {ty}", self.name(*id))),
      ExprKind::Unary { op, operand } => {
        self.line(&format!("Unary {op} : {ty}"));
        self.indented(|p| p.print_expr(operand));
      }
      ExprKind::Binary { op, lhs, rhs } => {
        self.line(&format!("Binary {op} : {ty}"));
        self.indented(|p| {
          p.print_expr(lhs);
          p.print_expr(rhs);
        });
      }
      ExprKind::ArrayAccess { array, index } => {
        self.line(&format!("ArrayAccess : {ty}"));
        self.indented(|p| {
          p.print_expr(array);
          p.print_expr(index);
        });
      }
      ExprKind::RecordAccess { record, field } => {
        self.line(&format!("RecordAccess .{} : {ty}", self.name(*field)));
        self.indented(|p| p.print_expr(record));
      }
      ExprKind::Call { callee, args } => {
        self.line(&format!("Call {} : {ty}", self.name(*callee)));
        self.indented(|p| args.iter().for_each(|arg| p.print_expr(arg)));
      }
      ExprKind::IntToReal(operand) => {
        self.line(&format!("IntToReal : {ty}"));
        self.indented(|p| p.print_expr(operand));
      }
    }
  }
}

/// Listing of every global declaration, with record fields and routine
/// parameters nested underneath.
pub fn print_declarations(program: &Program) -> String {
  let mut out = String::new();
  print_scope(program, program.scopes.global(), 0, &mut out);
  out
}

fn print_scope(program: &Program, scope: ScopeId, depth: usize, out: &mut String) {
  let pad = "  ".repeat(depth);
  let types = &program.types;
  for id in program.scopes.symbols_in(scope) {
    let symbol = program.scopes.symbol(id);
    let name = &symbol.display_name;
    match &symbol.kind {
      SymbolKind::Type(ty) => {
        let _ = writeln!(out, "{pad}type {name} = {}", describe_structure(types, *ty));
        if let TypeKind::Record { fields, .. } = types.kind(*ty) {
          print_scope(program, *fields, depth + 1, out);
        }
      }
      SymbolKind::Variable(var) => {
        let ty = types.describe(var.ty);
        let line = match &var.storage {
          Storage::Constant(value) => format!("const {name} = {value} : {ty}"),
          Storage::Global { label } => format!("var {name} : {ty} @ {label}"),
          Storage::Local { offset } => format!("var {name} : {ty} @ {offset}(%ebp)"),
          Storage::Parameter { offset, by_ref: true } => format!("var param {name} : {ty} @ {offset}(%ebp)"),
          Storage::Parameter { offset, by_ref: false } => format!("param {name} : {ty} @ {offset}(%ebp)"),
          Storage::Field { offset } => format!("field {name} : {ty} + {offset}"),
        };
        let _ = writeln!(out, "{pad}{line}");
      }
      SymbolKind::Routine(routine) => {
        let head = match routine.result {
          Some(result) => format!("function {name} : {}", types.describe(result)),
          None => format!("procedure {name}"),
        };
        let _ = writeln!(out, "{pad}{head} @ {}", routine.entry_label);
        print_scope(program, routine.scope, depth + 1, out);
      }
    }
  }
}

/// Built-in names and aliases are shown by what they stand for.
fn describe_structure(types: &TypeTable, ty: TypeId) -> String {
  match types.get(ty).kind {
    TypeKind::Alias { target } => types.describe(target),
    TypeKind::Array { element, low, high } => format!("array[{low}..{high}] of {}", types.describe(element)),
    TypeKind::Pointer { target } => format!("^{}", types.describe(target)),
    TypeKind::Record { size, .. } => format!("record ({size} bytes)"),
    TypeKind::Void | TypeKind::Integer | TypeKind::Real => types.describe(ty),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn int(value: i32) -> Expr {
    Expr::literal(Literal::Int(value), TypeTable::new().integer())
  }

  #[test]
  fn folds_integer_arithmetic_and_comparisons() {
    let scopes = ScopeStack::new();
    let types = TypeTable::new();
    let sum = Expr::binary(BinaryOp::Add, int(2), int(3), types.integer());
    assert_eq!(sum.const_value(&scopes), Some(Literal::Int(5)));

    let eq = Expr::binary(BinaryOp::Eq, sum, int(5), types.integer());
    assert_eq!(eq.const_value(&scopes), Some(Literal::Int(1)));

    let not = Expr::unary(UnaryOp::Not, eq, types.integer());
    assert_eq!(not.const_value(&scopes), Some(Literal::Int(0)));

    let overflow = Expr::binary(BinaryOp::Mul, int(i32::MAX), int(2), types.integer());
    assert_eq!(overflow.const_value(&scopes), Some(Literal::Int(-2)));
  }

  #[test]
  fn division_by_zero_is_not_folded() {
    let scopes = ScopeStack::new();
    let types = TypeTable::new();
    let div = Expr::binary(BinaryOp::Div, int(1), int(0), types.integer());
    assert_eq!(div.const_value(&scopes), None);
  }

  #[test]
  fn widening_folds_to_real() {
    let scopes = ScopeStack::new();
    let types = TypeTable::new();
    let widened = Expr::int_to_real(int(3), types.real());
    let half = Expr::literal(Literal::Real(0.5), types.real());
    let product = Expr::binary(BinaryOp::Mul, widened, half, types.real());
    assert_eq!(product.const_value(&scopes), Some(Literal::Real(1.5)));
  }

  #[test]
  fn operators_display_as_source_spelling() {
    assert_eq!(BinaryOp::Ne.to_string(), "<>");
    assert_eq!(BinaryOp::Shl.to_string(), "shl");
    assert_eq!(UnaryOp::AddressOf.to_string(), "@");
    assert!(BinaryOp::Ge.is_relational());
    assert!(BinaryOp::Mod.is_integer_only());
    assert!(!BinaryOp::RealDiv.is_integer_only());
  }
}
