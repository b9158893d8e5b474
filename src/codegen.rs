//! Code generation: lower the checked syntax tree into 32-bit AT&T assembly.
//!
//! The emitter is a stack machine: every expression leaves exactly one value
//! of its own type on the stack (a 4-byte slot for scalars, the full width for
//! records and arrays), and every lvalue can push its address instead. Real
//! arithmetic round-trips the same stack slots through the x87 register
//! stack. Variables are addressed through their label or relative to `%ebp`.

pub mod asm;

use std::collections::HashMap;

use tracing::{debug, trace};

pub use asm::AsmCode;
use asm::{Condition, DataValue, Memory, Mnemonic, Operand, Register, Size};

use crate::ast::{BinaryOp, Direction, Expr, ExprKind, JumpKind, Literal, LoopId, Program, Stmt, UnaryOp, WriteArg};
use crate::scope::{Storage, SymbolId, SymbolKind};
use crate::ty::{TypeId, TypeKind, WORD_SIZE};

const FORMAT_INT: (&str, &str) = ("format_int", "%d");
const FORMAT_REAL: (&str, &str) = ("format_real", "%f");
const FORMAT_STR: (&str, &str) = ("format_str", "%s");
const FORMAT_NEWLINE: (&str, &str) = ("format_newline", "\n");

/// Emit the whole program: globals, every routine, then `main`.
pub fn generate(program: &Program) -> AsmCode {
  let mut codegen = Codegen::new(program);
  codegen.emit_globals();
  for &routine in &program.routines {
    codegen.emit_routine(routine);
  }
  codegen.emit_main();
  debug!(lines = codegen.asm.lines().len(), data = codegen.asm.data().len(), "generated assembly");
  codegen.asm
}

struct LoopLabels {
  continue_label: String,
  break_label: String,
}

struct Codegen<'a> {
  program: &'a Program,
  asm: AsmCode,
  loops: HashMap<LoopId, LoopLabels>,
  /// Epilogue label of the routine (or main block) being emitted.
  exit_label: String,
}

impl<'a> Codegen<'a> {
  fn new(program: &'a Program) -> Self {
    Self {
      program,
      asm: AsmCode::new(),
      loops: HashMap::new(),
      exit_label: String::new(),
    }
  }

  fn size_of(&self, ty: TypeId) -> u32 {
    self.program.types.size(ty)
  }

  fn is_real(&self, expr: &Expr) -> bool {
    self.program.types.is_real(expr.result_type())
  }

  fn storage(&self, id: SymbolId) -> &'a Storage {
    match &self.program.scopes.symbol(id).kind {
      SymbolKind::Variable(var) => &var.storage,
      _ => panic!("symbol is not a variable"),
    }
  }

  // --- Instruction shorthands ---

  fn push(&mut self, operand: impl Into<Operand>) {
    self.asm.op1(Mnemonic::Push, Size::Long, operand);
  }

  fn pop(&mut self, reg: Register) {
    self.asm.op1(Mnemonic::Pop, Size::Long, reg);
  }

  fn mov(&mut self, src: impl Into<Operand>, dst: impl Into<Operand>) {
    self.asm.op2(Mnemonic::Mov, Size::Long, src, dst);
  }

  fn grow_stack(&mut self, bytes: u32) {
    if bytes > 0 {
      self
        .asm
        .op2(Mnemonic::Sub, Size::Long, Operand::Imm(bytes as i32), Register::Esp);
    }
  }

  fn shrink_stack(&mut self, bytes: u32) {
    if bytes > 0 {
      self
        .asm
        .op2(Mnemonic::Add, Size::Long, Operand::Imm(bytes as i32), Register::Esp);
    }
  }

  fn jump(&mut self, mnemonic: Mnemonic, label: &str) {
    self.asm.op1(mnemonic, Size::None, Operand::Label(label.to_string()));
  }

  /// Pop a condition value and jump to `label` when it is zero.
  fn jump_if_false(&mut self, label: &str) {
    self.pop(Register::Eax);
    self
      .asm
      .op2(Mnemonic::Test, Size::Long, Register::Eax, Register::Eax);
    self.jump(Mnemonic::J(Condition::Z), label);
  }

  fn call(&mut self, label: &str) {
    self.jump(Mnemonic::Call, label);
  }

  // --- Units ---

  fn emit_globals(&mut self) {
    let program = self.program;
    let scopes = &program.scopes;
    for id in scopes.symbols_in(scopes.global()) {
      if let SymbolKind::Variable(var) = &scopes.symbol(id).kind
        && let Storage::Global { label } = &var.storage
      {
        let size = self.size_of(var.ty);
        self.asm.add_data(label.as_str(), DataValue::Space(size));
      }
    }
  }

  fn prologue(&mut self, frame_size: u32) {
    self.push(Register::Ebp);
    self.mov(Register::Esp, Register::Ebp);
    self.grow_stack(frame_size);
  }

  fn epilogue(&mut self) {
    self.asm.label(self.exit_label.clone());
    self.mov(Register::Ebp, Register::Esp);
    self.pop(Register::Ebp);
  }

  fn emit_routine(&mut self, id: SymbolId) {
    let program = self.program;
    let symbol = program.scopes.symbol(id);
    let Some(routine) = symbol.routine() else {
      return;
    };
    trace!(routine = %symbol.name, label = %routine.entry_label, "emit routine");
    self.exit_label = self.asm.gen_label("exit");
    self.asm.label(routine.entry_label.as_str());
    self.prologue(routine.frame_size);
    if let Some(body) = &routine.body {
      self.emit_stmt(body);
    }
    self.epilogue();
    self.asm.op0(Mnemonic::Ret, Size::None);
  }

  fn emit_main(&mut self) {
    self.exit_label = self.asm.gen_label("exit");
    self.asm.directive(".globl main");
    self.asm.label("main");
    self.prologue(0);
    let program = self.program;
    self.emit_stmt(&program.body);
    self.epilogue();
    self
      .asm
      .op2(Mnemonic::Xor, Size::Long, Register::Eax, Register::Eax);
    self.asm.op0(Mnemonic::Ret, Size::None);
  }

  // --- Statements ---

  fn emit_stmt(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Assign { lhs, rhs } => {
        self.emit_value(rhs);
        self.emit_address(lhs);
        self.store(self.size_of(lhs.result_type()));
      }
      Stmt::Block(stmts) => {
        for stmt in stmts {
          self.emit_stmt(stmt);
        }
      }
      Stmt::Call(call) => {
        self.emit_value(call);
        self.shrink_stack(self.size_of(call.result_type()));
      }
      Stmt::Write { args, newline } => self.emit_write(args, *newline),
      Stmt::For {
        id,
        index,
        low,
        high,
        direction,
        body,
      } => self.emit_for(*id, index, low, high, *direction, body),
      Stmt::While { id, cond, body } => {
        let labels = self.open_loop(*id);
        self.asm.label(labels.continue_label.as_str());
        self.emit_value(cond);
        self.jump_if_false(&labels.break_label);
        self.emit_stmt(body);
        self.jump(Mnemonic::Jmp, &labels.continue_label);
        self.asm.label(labels.break_label);
      }
      Stmt::Until { id, cond, body } => {
        let start = self.asm.gen_label("repeat");
        let labels = self.open_loop(*id);
        self.asm.label(start.as_str());
        self.emit_stmt(body);
        self.asm.label(labels.continue_label);
        self.emit_value(cond);
        self.jump_if_false(&start);
        self.asm.label(labels.break_label);
      }
      Stmt::If {
        cond,
        then_branch,
        else_branch,
      } => self.emit_if(cond, then_branch, else_branch.as_deref()),
      Stmt::Jump { kind, target } => {
        let labels = &self.loops[target];
        let label = match kind {
          JumpKind::Break => labels.break_label.clone(),
          JumpKind::Continue => labels.continue_label.clone(),
        };
        self.jump(Mnemonic::Jmp, &label);
      }
      Stmt::Exit => {
        let label = self.exit_label.clone();
        self.jump(Mnemonic::Jmp, &label);
      }
    }
  }

  /// Allocate and record the labels of a loop; returns a copy for the caller.
  fn open_loop(&mut self, id: LoopId) -> LoopLabels {
    let continue_label = self.asm.gen_label("continue");
    let break_label = self.asm.gen_label("break");
    self.loops.insert(
      id,
      LoopLabels {
        continue_label: continue_label.clone(),
        break_label: break_label.clone(),
      },
    );
    LoopLabels {
      continue_label,
      break_label,
    }
  }

  /// The upper bound is evaluated once and kept on the stack while the loop runs.
  fn emit_for(&mut self, id: LoopId, index: &Expr, low: &Expr, high: &Expr, direction: Direction, body: &Stmt) {
    let check = self.asm.gen_label("for");
    let labels = self.open_loop(id);

    self.emit_value(low);
    self.emit_address(index);
    self.store(WORD_SIZE);
    self.emit_value(high);

    self.asm.label(check.as_str());
    self.emit_value(index);
    self.pop(Register::Eax);
    self
      .asm
      .op2(Mnemonic::Cmp, Size::Long, Memory::base(Register::Esp), Register::Eax);
    let exit_when = match direction {
      Direction::To => Condition::G,
      Direction::Downto => Condition::L,
    };
    self.jump(Mnemonic::J(exit_when), &labels.break_label);

    self.emit_stmt(body);

    self.asm.label(labels.continue_label);
    self.emit_address(index);
    self.pop(Register::Eax);
    let step = match direction {
      Direction::To => Mnemonic::Add,
      Direction::Downto => Mnemonic::Sub,
    };
    self
      .asm
      .op2(step, Size::Long, Operand::Imm(1), Memory::base(Register::Eax));
    self.jump(Mnemonic::Jmp, &check);
    self.asm.label(labels.break_label);
    self.shrink_stack(WORD_SIZE);
  }

  /// A condition known at compile time emits only the live branch.
  fn emit_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) {
    if let Some(Literal::Int(value)) = cond.const_value(&self.program.scopes) {
      if value != 0 {
        self.emit_stmt(then_branch);
      } else if let Some(else_branch) = else_branch {
        self.emit_stmt(else_branch);
      }
      return;
    }

    let fin = self.asm.gen_label("fin");
    self.emit_value(cond);
    match else_branch {
      Some(else_branch) => {
        let otherwise = self.asm.gen_label("else");
        self.jump_if_false(&otherwise);
        self.emit_stmt(then_branch);
        self.jump(Mnemonic::Jmp, &fin);
        self.asm.label(otherwise);
        self.emit_stmt(else_branch);
      }
      None => {
        self.jump_if_false(&fin);
        self.emit_stmt(then_branch);
      }
    }
    self.asm.label(fin);
  }

  fn format_string(&mut self, (label, text): (&str, &str)) -> Operand {
    if !self.asm.has_data(label) {
      self.asm.add_data(label, DataValue::Str(text.as_bytes().to_vec()));
    }
    Operand::ImmLabel(label.to_string())
  }

  /// One `printf` call per argument; reals are widened to double for varargs.
  fn emit_write(&mut self, args: &[WriteArg], newline: bool) {
    for arg in args {
      let pushed = match arg {
        WriteArg::Text(text) => {
          let label = self.asm.gen_label("string");
          self.asm.add_data(label.as_str(), DataValue::Str(text.clone()));
          self.push(Operand::ImmLabel(label));
          let format = self.format_string(FORMAT_STR);
          self.push(format);
          2 * WORD_SIZE
        }
        WriteArg::Value(value) if self.is_real(value) => {
          self.emit_value(value);
          self
            .asm
            .op1(Mnemonic::Fld, Size::Single, Memory::base(Register::Esp));
          self.grow_stack(WORD_SIZE);
          self
            .asm
            .op1(Mnemonic::Fstp, Size::Double, Memory::base(Register::Esp));
          let format = self.format_string(FORMAT_REAL);
          self.push(format);
          3 * WORD_SIZE
        }
        WriteArg::Value(value) => {
          self.emit_value(value);
          let format = self.format_string(FORMAT_INT);
          self.push(format);
          2 * WORD_SIZE
        }
      };
      self.call("printf");
      self.shrink_stack(pushed);
    }
    if newline {
      let format = self.format_string(FORMAT_NEWLINE);
      self.push(format);
      self.call("printf");
      self.shrink_stack(WORD_SIZE);
    }
  }

  /// Pop an address, then move `size` bytes from the top of the stack there
  /// and release them.
  fn store(&mut self, size: u32) {
    self.pop(Register::Eax);
    for offset in (0..size).step_by(WORD_SIZE as usize) {
      let offset = offset as i32;
      self.mov(Memory::offset(offset, Register::Esp), Register::Ebx);
      self.mov(Register::Ebx, Memory::offset(offset, Register::Eax));
    }
    self.shrink_stack(size);
  }

  /// Replace the address on top of the stack with the `size` bytes it points to.
  fn load(&mut self, size: u32) {
    self.pop(Register::Eax);
    if size == WORD_SIZE {
      self.push(Memory::base(Register::Eax));
      return;
    }
    self.grow_stack(size);
    for offset in (0..size).step_by(WORD_SIZE as usize) {
      let offset = offset as i32;
      self.mov(Memory::offset(offset, Register::Eax), Register::Ebx);
      self.mov(Register::Ebx, Memory::offset(offset, Register::Esp));
    }
  }

  // --- Expressions ---

  fn emit_literal(&mut self, value: Literal) {
    match value {
      Literal::Int(value) => self.push(Operand::Imm(value)),
      Literal::Real(value) => {
        let label = self.asm.gen_label("real");
        self.asm.add_data(label.as_str(), DataValue::Float(value));
        self.push(Memory::symbol(label));
      }
    }
  }

  /// Directly addressable home of a scalar variable.
  fn direct_operand(storage: &Storage) -> Option<Memory> {
    match storage {
      Storage::Global { label } => Some(Memory::symbol(label.as_str())),
      Storage::Local { offset } | Storage::Parameter { offset, by_ref: false } => {
        Some(Memory::offset(*offset, Register::Ebp))
      }
      _ => None,
    }
  }

  fn emit_value(&mut self, expr: &Expr) {
    match expr.kind() {
      ExprKind::Literal(value) => self.emit_literal(*value),
      ExprKind::VarRef(id) => {
        let storage = self.storage(*id);
        let size = self.size_of(expr.result_type());
        if let Storage::Constant(value) = storage {
          self.emit_literal(*value);
        } else if let Some(home) = Self::direct_operand(storage)
          && size == WORD_SIZE
        {
          self.push(home);
        } else {
          self.emit_address(expr);
          self.load(size);
        }
      }
      ExprKind::ArrayAccess { .. } | ExprKind::RecordAccess { .. } => {
        self.emit_address(expr);
        self.load(self.size_of(expr.result_type()));
      }
      ExprKind::Unary { op, operand } => self.emit_unary(*op, operand),
      ExprKind::Binary { op, lhs, rhs } => {
        self.emit_value(lhs);
        self.emit_value(rhs);
        if self.is_real(lhs) {
          self.emit_real_binary(*op);
        } else {
          self.emit_int_binary(*op);
        }
      }
      ExprKind::Call { callee, args } => self.emit_call(*callee, args),
      ExprKind::IntToReal(operand) => {
        self.emit_value(operand);
        self
          .asm
          .op1(Mnemonic::Fild, Size::Long, Memory::base(Register::Esp));
        self
          .asm
          .op1(Mnemonic::Fstp, Size::Single, Memory::base(Register::Esp));
      }
    }
  }

  fn emit_unary(&mut self, op: UnaryOp, operand: &Expr) {
    match op {
      UnaryOp::AddressOf => self.emit_address(operand),
      UnaryOp::Plus => self.emit_value(operand),
      UnaryOp::Neg if self.is_real(operand) => {
        self.emit_value(operand);
        let top = Memory::base(Register::Esp);
        self.asm.op1(Mnemonic::Fld, Size::Single, top.clone());
        self.asm.op0(Mnemonic::Fchs, Size::None);
        self.asm.op1(Mnemonic::Fstp, Size::Single, top);
      }
      UnaryOp::Neg => {
        self.emit_value(operand);
        self
          .asm
          .op1(Mnemonic::Neg, Size::Long, Memory::base(Register::Esp));
      }
      UnaryOp::Not => {
        self.emit_value(operand);
        self.pop(Register::Eax);
        self
          .asm
          .op2(Mnemonic::Test, Size::Long, Register::Eax, Register::Eax);
        self.set_flag(Condition::E);
        self.push(Register::Eax);
      }
    }
  }

  /// `%eax` = 1 if `cond` holds, else 0.
  fn set_flag(&mut self, cond: Condition) {
    self.asm.op1(Mnemonic::Set(cond), Size::None, Register::Al);
    self
      .asm
      .op2(Mnemonic::Movzb, Size::Long, Register::Al, Register::Eax);
  }

  /// `cond` merged with the parity flag, which is set for unordered compares.
  fn set_flag_ordered(&mut self, cond: Condition, parity: Condition, merge: Mnemonic) {
    self.asm.op1(Mnemonic::Set(cond), Size::None, Register::Al);
    self.asm.op1(Mnemonic::Set(parity), Size::None, Register::Cl);
    self.asm.op2(merge, Size::Byte, Register::Cl, Register::Al);
    self
      .asm
      .op2(Mnemonic::Movzb, Size::Long, Register::Al, Register::Eax);
  }

  /// Stack holds `lhs, rhs`; replaces them with the result.
  fn emit_int_binary(&mut self, op: BinaryOp) {
    self.pop(Register::Ebx);
    self.pop(Register::Eax);
    let simple = match op {
      BinaryOp::Add => Some(Mnemonic::Add),
      BinaryOp::Sub => Some(Mnemonic::Sub),
      BinaryOp::Mul => Some(Mnemonic::Imul),
      BinaryOp::And => Some(Mnemonic::And),
      BinaryOp::Or => Some(Mnemonic::Or),
      BinaryOp::Xor => Some(Mnemonic::Xor),
      _ => None,
    };
    match (simple, op) {
      (Some(mnemonic), _) => self.asm.op2(mnemonic, Size::Long, Register::Ebx, Register::Eax),
      (None, BinaryOp::Div | BinaryOp::Mod) => {
        self.asm.op0(Mnemonic::Cltd, Size::None);
        self.asm.op1(Mnemonic::Idiv, Size::Long, Register::Ebx);
        if op == BinaryOp::Mod {
          self.mov(Register::Edx, Register::Eax);
        }
      }
      (None, BinaryOp::Shl | BinaryOp::Shr) => {
        let shift = if op == BinaryOp::Shl { Mnemonic::Shl } else { Mnemonic::Shr };
        self.mov(Register::Ebx, Register::Ecx);
        self.asm.op2(shift, Size::Long, Register::Cl, Register::Eax);
      }
      (None, op) => {
        let cond = match op {
          BinaryOp::Eq => Condition::E,
          BinaryOp::Ne => Condition::Ne,
          BinaryOp::Lt => Condition::L,
          BinaryOp::Le => Condition::Le,
          BinaryOp::Gt => Condition::G,
          BinaryOp::Ge => Condition::Ge,
          other => unreachable!("'{other}' has no integer lowering"),
        };
        self
          .asm
          .op2(Mnemonic::Cmp, Size::Long, Register::Ebx, Register::Eax);
        self.set_flag(cond);
      }
    }
    self.push(Register::Eax);
  }

  /// Stack holds `lhs, rhs` as single-precision values. The FPU sees the
  /// right operand first, hence the reversed forms of `-` and `/`.
  fn emit_real_binary(&mut self, op: BinaryOp) {
    let top = Memory::base(Register::Esp);
    if op.is_relational() {
      // An unordered compare sets ZF, PF and CF, so every test below is
      // false for NaN except `<>`. `<` and `<=` load the operands swapped.
      let (fpu_below, fpu_top) = match op {
        BinaryOp::Lt | BinaryOp::Le => (4, 0),
        _ => (0, 4),
      };
      for disp in [fpu_below, fpu_top] {
        self
          .asm
          .op1(Mnemonic::Fld, Size::Single, Memory::offset(disp, Register::Esp));
      }
      self
        .asm
        .op2(Mnemonic::Fucomip, Size::None, Register::St1, Register::St);
      self.asm.op1(Mnemonic::Fstp, Size::None, Register::St);
      match op {
        BinaryOp::Eq => self.set_flag_ordered(Condition::E, Condition::Np, Mnemonic::And),
        BinaryOp::Ne => self.set_flag_ordered(Condition::Ne, Condition::P, Mnemonic::Or),
        BinaryOp::Lt | BinaryOp::Gt => self.set_flag(Condition::A),
        _ => self.set_flag(Condition::Ae),
      }
      self.shrink_stack(WORD_SIZE);
      self.mov(Register::Eax, top);
      return;
    }

    let mnemonic = match op {
      BinaryOp::Add => Mnemonic::Fadd,
      BinaryOp::Sub => Mnemonic::Fsubr,
      BinaryOp::Mul => Mnemonic::Fmul,
      BinaryOp::RealDiv => Mnemonic::Fdivr,
      other => unreachable!("'{other}' has no real lowering"),
    };
    self.asm.op1(Mnemonic::Fld, Size::Single, top.clone());
    self.shrink_stack(WORD_SIZE);
    self.asm.op1(mnemonic, Size::Single, top.clone());
    self.asm.op1(Mnemonic::Fstp, Size::Single, top);
  }

  /// Result slot first, then arguments right to left; the caller pops the
  /// arguments and leaves the result on the stack.
  fn emit_call(&mut self, callee: SymbolId, args: &[Expr]) {
    let program = self.program;
    let Some(routine) = program.scopes.symbol(callee).routine() else {
      panic!("call target is not a routine");
    };
    let result_size = routine.result.map_or(0, |ty| self.size_of(ty));
    self.grow_stack(result_size);

    let mut args_size = 0;
    for (arg, &param) in args.iter().zip(&routine.params).rev() {
      if matches!(self.storage(param), Storage::Parameter { by_ref: true, .. }) {
        self.emit_address(arg);
        args_size += WORD_SIZE;
      } else {
        self.emit_value(arg);
        args_size += self.size_of(arg.result_type());
      }
    }
    self.call(&routine.entry_label);
    self.shrink_stack(args_size);
  }

  fn emit_address(&mut self, expr: &Expr) {
    match expr.kind() {
      ExprKind::VarRef(id) => match self.storage(*id) {
        Storage::Global { label } => self.push(Operand::ImmLabel(label.clone())),
        Storage::Local { offset } | Storage::Parameter { offset, by_ref: false } => {
          self.asm.op2(
            Mnemonic::Lea,
            Size::Long,
            Memory::offset(*offset, Register::Ebp),
            Register::Eax,
          );
          self.push(Register::Eax);
        }
        Storage::Parameter { offset, by_ref: true } => self.push(Memory::offset(*offset, Register::Ebp)),
        Storage::Field { .. } | Storage::Constant(_) => panic!("not an lvalue"),
      },
      ExprKind::ArrayAccess { array, index } => {
        let &TypeKind::Array { element, low, .. } = self.program.types.kind(array.result_type()) else {
          panic!("indexed expression is not an array");
        };
        self.emit_address(array);
        self.emit_value(index);
        self.pop(Register::Eax);
        if low != 0 {
          self
            .asm
            .op2(Mnemonic::Sub, Size::Long, Operand::Imm(low), Register::Eax);
        }
        self.mov(Operand::Imm(self.size_of(element) as i32), Register::Ecx);
        self.asm.op1(Mnemonic::Mul, Size::Long, Register::Ecx);
        self
          .asm
          .op2(Mnemonic::Add, Size::Long, Register::Eax, Memory::base(Register::Esp));
      }
      ExprKind::RecordAccess { record, field } => {
        self.emit_address(record);
        if let Storage::Field { offset } = self.storage(*field)
          && *offset != 0
        {
          self.asm.op2(
            Mnemonic::Add,
            Size::Long,
            Operand::Imm(*offset as i32),
            Memory::base(Register::Esp),
          );
        }
      }
      _ => panic!("not an lvalue"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;

  fn compile(source: &str) -> String {
    generate(&parse(source).unwrap()).to_string()
  }

  fn has_line(asm: &str, line: &str) -> bool {
    asm.lines().any(|l| l == line)
  }

  #[test]
  fn one_based_arrays_subtract_the_low_bound() {
    let asm = compile("var a: array[1..10] of integer; i: integer; begin a[i] := 7 end.");
    assert!(has_line(&asm, "\tsubl $1, %eax"), "{asm}");
    assert!(has_line(&asm, "\tmovl $4, %ecx"));
    assert!(has_line(&asm, "\tmull %ecx"));
    assert!(has_line(&asm, "\taddl %eax, (%esp)"));
    assert!(has_line(&asm, "global_a:"));
    assert!(has_line(&asm, "\t.space 40"));
  }

  #[test]
  fn zero_based_arrays_skip_the_subtraction() {
    let asm = compile("var a: array[0..9] of integer; i: integer; begin a[i] := 7 end.");
    assert!(!asm.lines().any(|l| l.starts_with("\tsubl") && l.ends_with("%eax")), "{asm}");
    assert!(has_line(&asm, "\tmovl $4, %ecx"));
  }

  #[test]
  fn for_loops_step_in_their_direction() {
    let up = compile("var i: integer; begin for i := 1 to 5 do end.");
    assert!(up.contains("\tjg break_"), "{up}");
    assert!(has_line(&up, "\taddl $1, (%eax)"));
    assert!(has_line(&up, "\tcmpl (%esp), %eax"));

    let down = compile("var i: integer; begin for i := 5 downto 1 do end.");
    assert!(down.contains("\tjl break_"), "{down}");
    assert!(has_line(&down, "\tsubl $1, (%eax)"));
  }

  #[test]
  fn constant_conditions_emit_only_the_live_branch() {
    let taken = compile("var x: integer; begin if 1 = 1 then x := 10 else x := 20 end.");
    assert!(has_line(&taken, "\tpushl $10"), "{taken}");
    assert!(!has_line(&taken, "\tpushl $20"));
    for absent in ["cmpl", "jz", "jmp", "sete"] {
      assert!(!taken.contains(absent), "{absent} in {taken}");
    }

    let skipped = compile("var x: integer; begin if 1 = 2 then x := 10 else x := 20 end.");
    assert!(has_line(&skipped, "\tpushl $20"));
    assert!(!has_line(&skipped, "\tpushl $10"));
    assert!(!skipped.contains("jz"));
  }

  #[test]
  fn dynamic_conditions_branch() {
    let asm = compile("var x: integer; begin if x = 1 then x := 10 else x := 20 end.");
    assert!(has_line(&asm, "\tcmpl %ebx, %eax"));
    assert!(has_line(&asm, "\tsete %al"));
    assert!(asm.contains("\tjz else_"));
    assert!(asm.contains("\tjmp fin_"));
  }

  #[test]
  fn mixed_arithmetic_widens_then_uses_the_fpu() {
    let asm = compile("var x: real; begin x := 1 + 2.0 end.");
    assert!(has_line(&asm, "\tfildl (%esp)"), "{asm}");
    assert!(has_line(&asm, "\tfadds (%esp)"));
    assert!(has_line(&asm, "\t.float 2.0"));
  }

  #[test]
  fn non_commutative_real_ops_use_reversed_forms() {
    let asm = compile("var x, y: real; begin x := x - y; y := x / y end.");
    assert!(has_line(&asm, "\tfsubrs (%esp)"));
    assert!(has_line(&asm, "\tfdivrs (%esp)"));
  }

  #[test]
  fn real_comparisons_are_false_when_unordered() {
    let lt = compile("var x: real; b: integer; begin b := x < 1.5 end.");
    let lines: Vec<&str> = lt.lines().collect();
    let cmp = lines.iter().position(|l| *l == "\tfucomip %st(1), %st").unwrap();
    assert_eq!(lines[cmp - 2], "\tflds 4(%esp)", "{lt}");
    assert_eq!(lines[cmp - 1], "\tflds (%esp)");
    assert!(has_line(&lt, "\tseta %al"));
    assert!(!lt.contains("setb"));

    let gt = compile("var x: real; b: integer; begin b := x >= 1.5 end.");
    let lines: Vec<&str> = gt.lines().collect();
    let cmp = lines.iter().position(|l| *l == "\tfucomip %st(1), %st").unwrap();
    assert_eq!(lines[cmp - 2], "\tflds (%esp)", "{gt}");
    assert_eq!(lines[cmp - 1], "\tflds 4(%esp)");
    assert!(has_line(&gt, "\tsetae %al"));

    let eq = compile("var x, y: real; b: integer; begin b := x = y end.");
    for line in ["\tsete %al", "\tsetnp %cl", "\tandb %cl, %al", "\tmovzbl %al, %eax"] {
      assert!(has_line(&eq, line), "{line} missing in {eq}");
    }

    let ne = compile("var x, y: real; b: integer; begin b := x <> y end.");
    for line in ["\tsetne %al", "\tsetp %cl", "\torb %cl, %al"] {
      assert!(has_line(&ne, line), "{line} missing in {ne}");
    }
  }

  #[test]
  fn integer_division_and_shifts() {
    let asm = compile("var a, b: integer; begin a := a mod b; b := a shl 2 end.");
    assert!(has_line(&asm, "\tcltd"));
    assert!(has_line(&asm, "\tidivl %ebx"));
    assert!(has_line(&asm, "\tmovl %edx, %eax"));
    assert!(has_line(&asm, "\tshll %cl, %eax"));
  }

  #[test]
  fn function_calls_reserve_the_result_slot() {
    let asm = compile(
      "function twice(n: integer): integer;
       begin result := n * 2 end;
       var y: integer;
       begin y := twice(21) end.",
    );
    let lines: Vec<&str> = asm.lines().collect();
    let call = lines.iter().position(|l| *l == "\tcall routine_twice").unwrap();
    assert_eq!(lines[call - 2], "\tsubl $4, %esp");
    assert_eq!(lines[call - 1], "\tpushl $21");
    assert_eq!(lines[call + 1], "\taddl $4, %esp");
    assert!(has_line(&asm, "routine_twice:"));
    assert!(has_line(&asm, "\tpushl 8(%ebp)"));
    assert!(has_line(&asm, "\tleal 12(%ebp), %eax"));
  }

  #[test]
  fn var_parameters_pass_addresses() {
    let asm = compile(
      "procedure bump(var a: integer);
       begin a := a + 1 end;
       var x: integer;
       begin bump(x) end.",
    );
    let lines: Vec<&str> = asm.lines().collect();
    let call = lines.iter().position(|l| *l == "\tcall routine_bump").unwrap();
    assert_eq!(lines[call - 1], "\tpushl $global_x");
    assert!(has_line(&asm, "\tpushl 8(%ebp)"));
    assert!(has_line(&asm, "\tpushl (%eax)"));
  }

  #[test]
  fn records_offset_their_fields() {
    let asm = compile(
      "type point = record x, y: integer end;
       var p, q: point;
       begin p.y := 1; q := p end.",
    );
    assert!(has_line(&asm, "\taddl $4, (%esp)"), "{asm}");
    assert!(has_line(&asm, "\tsubl $8, %esp"));
    assert!(has_line(&asm, "\tmovl 4(%esp), %ebx"));
    assert!(has_line(&asm, "\taddl $8, %esp"));
  }

  #[test]
  fn writeln_calls_printf_with_formats() {
    let asm = compile("var r: real; begin writeln('r = ', r, 3) end.");
    for line in ["format_str:", "format_real:", "format_int:", "format_newline:"] {
      assert!(has_line(&asm, line), "{line} missing in {asm}");
    }
    assert!(has_line(&asm, "\tfstpl (%esp)"));
    assert_eq!(asm.matches("\tcall printf").count(), 4);
    assert_eq!(asm.matches("format_int:").count(), 1);
  }

  #[test]
  fn loops_jump_to_their_own_labels() {
    let asm = compile(
      "var i: integer;
       begin
         while i < 10 do begin
           i := i + 1;
           if i = 5 then continue;
           if i = 8 then break
         end;
         repeat i := i - 1 until i = 0
       end.",
    );
    assert!(asm.contains("\tjmp continue_1"), "{asm}");
    assert!(asm.contains("\tjmp break_2"));
    assert!(has_line(&asm, "break_2:"));

    let mut labels: Vec<&str> = asm.lines().filter(|l| l.ends_with(':')).collect();
    let total = labels.len();
    labels.sort_unstable();
    labels.dedup();
    assert_eq!(labels.len(), total);
  }

  fn following<'a>(asm: &'a str, label: &str, count: usize) -> Vec<&'a str> {
    let lines: Vec<&str> = asm.lines().collect();
    let at = lines.iter().position(|l| *l == label).unwrap();
    lines[at + 1..at + 1 + count].to_vec()
  }

  #[test]
  fn continue_in_for_runs_the_increment() {
    let asm = compile(
      "var i, s: integer;
       begin for i := 1 to 10 do begin if i = 3 then continue; s := s + i end end.",
    );
    let jump = asm.find("\tjmp continue_2").unwrap();
    let label = asm.find("continue_2:").unwrap();
    assert!(jump < label, "{asm}");
    assert_eq!(
      following(&asm, "continue_2:", 4),
      ["\tpushl $global_i", "\tpopl %eax", "\taddl $1, (%eax)", "\tjmp for_1"]
    );
  }

  #[test]
  fn continue_in_repeat_checks_the_condition() {
    let asm = compile(
      "var i: integer;
       begin repeat i := i + 1; if i = 2 then continue until i > 5 end.",
    );
    let jump = asm.find("\tjmp continue_2").unwrap();
    let label = asm.find("continue_2:").unwrap();
    assert!(jump < label, "{asm}");
    let lines: Vec<&str> = asm.lines().collect();
    let end = lines.iter().position(|l| *l == "break_3:").unwrap();
    assert_eq!(lines[end - 1], "\tjz repeat_1");
  }

  #[test]
  fn real_negation_uses_fchs() {
    let asm = compile("var x: real; begin x := -x end.");
    let lines: Vec<&str> = asm.lines().collect();
    let at = lines.iter().position(|l| *l == "\tfchs").unwrap();
    assert_eq!(lines[at - 1], "\tflds (%esp)", "{asm}");
    assert_eq!(lines[at + 1], "\tfstps (%esp)");
  }

  #[test]
  fn not_is_logical() {
    let asm = compile("var a, b: integer; begin a := not b end.");
    let lines: Vec<&str> = asm.lines().collect();
    let at = lines.iter().position(|l| *l == "\ttestl %eax, %eax").unwrap();
    assert_eq!(
      lines[at - 1..at + 4],
      ["\tpopl %eax", "\ttestl %eax, %eax", "\tsete %al", "\tmovzbl %al, %eax", "\tpushl %eax"],
      "{asm}"
    );
  }

  #[test]
  fn exit_leaves_the_enclosing_routine() {
    let asm = compile("procedure p; begin while 1 do exit end; begin p end.");
    let routine = asm.find("routine_p:").unwrap();
    let main = asm.find("\nmain:").unwrap();
    let body = &asm[routine..main];
    assert!(body.contains("\tjmp exit_0\n"), "{asm}");
    assert_eq!(following(&asm, "exit_0:", 3), ["\tmovl %ebp, %esp", "\tpopl %ebp", "\tret"]);
    assert!(asm[main..].contains("exit_3:"));
  }

  #[test]
  fn char_codes_are_emitted_as_single_bytes() {
    let asm = compile("begin write('a'#200) end.");
    assert!(has_line(&asm, "\t.string \"a\\310\""), "{asm}");
  }

  #[test]
  fn exit_jumps_to_the_epilogue() {
    let asm = compile("begin exit end.");
    assert!(asm.contains("\tjmp exit_0"));
    assert!(has_line(&asm, "exit_0:"));
    assert!(asm.ends_with("\txorl %eax, %eax\n\tret\n"));
  }
}
