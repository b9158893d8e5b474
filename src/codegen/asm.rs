//! In-memory model of the emitted assembly: a data section of labelled items
//! and a text section of labels, directives and instructions, printed in
//! AT&T syntax for a 32-bit target with an x87 FPU.

use std::fmt;

use strum_macros::{Display, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Register {
  Eax,
  Ebx,
  Ecx,
  Edx,
  Ebp,
  Esp,
  Al,
  Cl,
  /// Top of the FPU register stack.
  St,
  #[strum(serialize = "st(1)")]
  St1,
}

impl fmt::Display for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name: &'static str = self.into();
    write!(f, "%{name}")
  }
}

/// Condition codes for `set<cc>` and `j<cc>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Condition {
  E,
  Ne,
  G,
  Ge,
  L,
  Le,
  A,
  Ae,
  P,
  Np,
  Z,
}

/// Operand-size suffix appended to the mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
  None,
  Byte,
  Long,
  /// 32-bit float memory operand.
  Single,
  /// 64-bit float memory operand.
  Double,
}

impl Size {
  fn suffix(self) -> &'static str {
    match self {
      Size::None => "",
      Size::Byte => "b",
      Size::Long | Size::Double => "l",
      Size::Single => "s",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Mnemonic {
  Mov,
  Movzb,
  Lea,
  Push,
  Pop,
  Add,
  Sub,
  Imul,
  Mul,
  Idiv,
  Cltd,
  Neg,
  And,
  Or,
  Xor,
  Shl,
  Shr,
  Cmp,
  Test,
  Set(Condition),
  Jmp,
  #[strum(serialize = "j")]
  J(Condition),
  Call,
  Ret,
  Fld,
  Fild,
  Fstp,
  Fadd,
  Fsubr,
  Fmul,
  Fdivr,
  Fchs,
  Fucomip,
}

impl fmt::Display for Mnemonic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name: &'static str = self.into();
    f.write_str(name)?;
    match self {
      Mnemonic::Set(cond) | Mnemonic::J(cond) => write!(f, "{cond}"),
      _ => Ok(()),
    }
  }
}

/// `symbol+disp(base)` with every part optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
  pub symbol: Option<String>,
  pub disp: i32,
  pub base: Option<Register>,
}

impl Memory {
  pub fn base(base: Register) -> Self {
    Self::offset(0, base)
  }

  pub fn offset(disp: i32, base: Register) -> Self {
    Self {
      symbol: None,
      disp,
      base: Some(base),
    }
  }

  pub fn symbol(symbol: impl Into<String>) -> Self {
    Self {
      symbol: Some(symbol.into()),
      disp: 0,
      base: None,
    }
  }
}

impl fmt::Display for Memory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.symbol {
      Some(symbol) => {
        f.write_str(symbol)?;
        if self.disp != 0 {
          write!(f, "{:+}", self.disp)?;
        }
      }
      None if self.disp != 0 => write!(f, "{}", self.disp)?,
      None => {}
    }
    match self.base {
      Some(base) => write!(f, "({base})"),
      None => Ok(()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  Reg(Register),
  Imm(i32),
  /// Address of a label as an immediate, `$label`.
  ImmLabel(String),
  Mem(Memory),
  /// Jump or call target.
  Label(String),
}

impl From<Register> for Operand {
  fn from(reg: Register) -> Self {
    Operand::Reg(reg)
  }
}

impl From<Memory> for Operand {
  fn from(mem: Memory) -> Self {
    Operand::Mem(mem)
  }
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Reg(reg) => write!(f, "{reg}"),
      Operand::Imm(value) => write!(f, "${value}"),
      Operand::ImmLabel(label) => write!(f, "${label}"),
      Operand::Mem(mem) => write!(f, "{mem}"),
      Operand::Label(label) => f.write_str(label),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
  pub mnemonic: Mnemonic,
  pub size: Size,
  pub operands: Vec<Operand>,
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.mnemonic, self.size.suffix())?;
    for (i, operand) in self.operands.iter().enumerate() {
      let sep = if i == 0 { " " } else { ", " };
      write!(f, "{sep}{operand}")?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
  Label(String),
  Directive(String),
  Instruction(Instruction),
}

impl fmt::Display for Line {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Line::Label(label) => write!(f, "{label}:"),
      Line::Directive(text) => f.write_str(text),
      Line::Instruction(instr) => write!(f, "\t{instr}"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
  /// Zero-filled reservation of `n` bytes.
  Space(u32),
  Float(f32),
  /// Bytes of a NUL-terminated `.string`.
  Str(Vec<u8>),
}

impl fmt::Display for DataValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DataValue::Space(size) => write!(f, ".space {size}"),
      DataValue::Float(value) => write!(f, ".float {value:?}"),
      DataValue::Str(text) => {
        f.write_str(".string \"")?;
        for &byte in text {
          match byte {
            b'"' => f.write_str("\\\"")?,
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\t' => f.write_str("\\t")?,
            0x20..=0x7e => write!(f, "{}", char::from(byte))?,
            _ => write!(f, "\\{byte:03o}")?,
          }
        }
        f.write_str("\"")
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
  pub label: String,
  pub value: DataValue,
}

/// A complete translation unit, ready to be printed.
#[derive(Debug, Default)]
pub struct AsmCode {
  data: Vec<DataItem>,
  text: Vec<Line>,
  label_count: usize,
}

impl AsmCode {
  pub fn new() -> Self {
    Self::default()
  }

  /// A label unique within this unit, `prefix_N`.
  pub fn gen_label(&mut self, prefix: &str) -> String {
    let label = format!("{prefix}_{}", self.label_count);
    self.label_count += 1;
    label
  }

  pub fn add_data(&mut self, label: impl Into<String>, value: DataValue) {
    self.data.push(DataItem {
      label: label.into(),
      value,
    });
  }

  pub fn has_data(&self, label: &str) -> bool {
    self.data.iter().any(|item| item.label == label)
  }

  pub fn label(&mut self, label: impl Into<String>) {
    self.text.push(Line::Label(label.into()));
  }

  pub fn directive(&mut self, text: impl Into<String>) {
    self.text.push(Line::Directive(text.into()));
  }

  pub fn emit(&mut self, mnemonic: Mnemonic, size: Size, operands: Vec<Operand>) {
    self.text.push(Line::Instruction(Instruction {
      mnemonic,
      size,
      operands,
    }));
  }

  pub fn op0(&mut self, mnemonic: Mnemonic, size: Size) {
    self.emit(mnemonic, size, Vec::new());
  }

  pub fn op1(&mut self, mnemonic: Mnemonic, size: Size, operand: impl Into<Operand>) {
    self.emit(mnemonic, size, vec![operand.into()]);
  }

  pub fn op2(&mut self, mnemonic: Mnemonic, size: Size, src: impl Into<Operand>, dst: impl Into<Operand>) {
    self.emit(mnemonic, size, vec![src.into(), dst.into()]);
  }

  pub fn lines(&self) -> &[Line] {
    &self.text
  }

  pub fn data(&self) -> &[DataItem] {
    &self.data
  }
}

impl fmt::Display for AsmCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, ".data")?;
    for item in &self.data {
      writeln!(f, "{}:", item.label)?;
      writeln!(f, "\t{}", item.value)?;
    }
    writeln!(f, ".text")?;
    for line in &self.text {
      writeln!(f, "{line}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registers_and_conditions_print_in_att_syntax() {
    assert_eq!(Register::Eax.to_string(), "%eax");
    assert_eq!(Register::St1.to_string(), "%st(1)");
    assert_eq!(Mnemonic::Set(Condition::Ge).to_string(), "setge");
    assert_eq!(Mnemonic::J(Condition::Z).to_string(), "jz");
    assert_eq!(Mnemonic::Fucomip.to_string(), "fucomip");
  }

  #[test]
  fn memory_operands() {
    assert_eq!(Memory::offset(-8, Register::Ebp).to_string(), "-8(%ebp)");
    assert_eq!(Memory::base(Register::Esp).to_string(), "(%esp)");
    assert_eq!(Memory::symbol("global_x").to_string(), "global_x");
    let shifted = Memory {
      disp: 4,
      ..Memory::symbol("global_p")
    };
    assert_eq!(shifted.to_string(), "global_p+4");
  }

  #[test]
  fn instructions_carry_size_suffixes() {
    let mut asm = AsmCode::new();
    asm.op2(Mnemonic::Mov, Size::Long, Operand::Imm(1), Register::Eax);
    asm.op1(Mnemonic::Fstp, Size::Double, Memory::base(Register::Esp));
    asm.op2(Mnemonic::Movzb, Size::Long, Register::Al, Register::Eax);
    asm.op1(Mnemonic::Push, Size::Long, Operand::ImmLabel("format_int".into()));
    let text: Vec<String> = asm.lines().iter().map(ToString::to_string).collect();
    assert_eq!(
      text,
      [
        "\tmovl $1, %eax",
        "\tfstpl (%esp)",
        "\tmovzbl %al, %eax",
        "\tpushl $format_int"
      ]
    );
  }

  #[test]
  fn labels_are_unique() {
    let mut asm = AsmCode::new();
    let a = asm.gen_label("loop");
    let b = asm.gen_label("loop");
    assert_ne!(a, b);
    assert_eq!(a, "loop_0");
  }

  #[test]
  fn listing_has_data_then_text() {
    let mut asm = AsmCode::new();
    asm.add_data("global_x", DataValue::Space(4));
    asm.add_data("real_0", DataValue::Float(2.5));
    asm.add_data("string_1", DataValue::Str(b"say \"hi\"\n".to_vec()));
    asm.directive(".globl main");
    asm.label("main");
    asm.op0(Mnemonic::Ret, Size::None);
    assert_eq!(
      asm.to_string(),
      ".data\nglobal_x:\n\t.space 4\nreal_0:\n\t.float 2.5\nstring_1:\n\t.string \"say \\\"hi\\\"\\n\"\n\
       .text\n.globl main\nmain:\n\tret\n"
    );
    assert!(asm.has_data("real_0"));
    assert_eq!(DataValue::Str(vec![b'a', 200, 0]).to_string(), ".string \"a\\310\\000\"");
    assert_eq!(asm.data().len(), 3);
  }
}
