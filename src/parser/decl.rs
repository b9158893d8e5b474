//! Declaration sections: `const`, `type`, `var` and routine headers.
//!
//! Each declaration is entered into the scope on top of the stack as soon as
//! it is read, so later declarations (and the routine's own body) can use it.

use tracing::trace;

use super::{Frame, Parser};
use crate::ast::Literal;
use crate::error::{CompileError, CompileResult};
use crate::scope::{Capability, Routine, Storage, Symbol, SymbolId, SymbolKind, Variable};
use crate::tokenizer::{Keyword, Token, TokenKind, TokenValue};
use crate::ty::{TypeId, WORD_SIZE};

/// Offset of the first parameter above the saved `%ebp` and return address.
const FIRST_PARAM_OFFSET: i32 = 8;

/// Largest object, record or frame that `%ebp`-relative and `.space` layout can address.
const MAX_OBJECT_SIZE: i64 = i32::MAX as i64;

fn fit_size(token: &Token, bytes: i64, what: &str) -> CompileResult<u32> {
  if bytes > MAX_OBJECT_SIZE {
    return Err(CompileError::semantic(token, format!("{what} too large")));
  }
  Ok(bytes as u32)
}

impl Parser {
  pub(super) fn parse_declarations(&mut self) -> CompileResult<()> {
    loop {
      let token = self.stream.peek().clone();
      match token.kind {
        TokenKind::ReservedWord(Keyword::Const) => {
          self.stream.advance()?;
          self.parse_const_section()?;
        }
        TokenKind::ReservedWord(Keyword::Type) => {
          self.stream.advance()?;
          self.parse_type_section()?;
        }
        TokenKind::ReservedWord(Keyword::Var) => {
          self.stream.advance()?;
          self.parse_var_section()?;
        }
        TokenKind::ReservedWord(keyword @ (Keyword::Procedure | Keyword::Function)) => {
          if self.frame.is_some() {
            return Err(CompileError::syntax(&token, "nested routines are not supported"));
          }
          self.stream.advance()?;
          self.parse_routine(keyword == Keyword::Function)?;
        }
        _ => return Ok(()),
      }
    }
  }

  fn parse_ident_list(&mut self) -> CompileResult<Vec<Token>> {
    let mut names = vec![self.stream.ident()?];
    while self.stream.equal(",")? {
      names.push(self.stream.ident()?);
    }
    Ok(names)
  }

  fn at_identifier(&self) -> bool {
    self.stream.peek().kind == TokenKind::Identifier
  }

  fn parse_const_section(&mut self) -> CompileResult<()> {
    loop {
      let name = self.stream.ident()?;
      self.stream.skip("=")?;
      let token = self.stream.peek().clone();
      let expr = self.parse_expression()?;
      let value = expr
        .const_value(&self.scopes)
        .ok_or_else(|| CompileError::semantic(&token, "constant expression expected"))?;
      self.stream.skip(";")?;

      let var = Variable {
        ty: expr.result_type(),
        storage: Storage::Constant(value),
      };
      self
        .scopes
        .add(Symbol::new(&name.lexeme, SymbolKind::Variable(var)), &name)?;
      if !self.at_identifier() {
        return Ok(());
      }
    }
  }

  fn parse_type_section(&mut self) -> CompileResult<()> {
    loop {
      let name = self.stream.ident()?;
      self.stream.skip("=")?;
      let ty = self.parse_type()?;
      self.stream.skip(";")?;

      let ty = self.types.declare(&name.lexeme, ty);
      self.scopes.add(Symbol::new(&name.lexeme, SymbolKind::Type(ty)), &name)?;
      if !self.at_identifier() {
        return Ok(());
      }
    }
  }

  fn parse_var_section(&mut self) -> CompileResult<()> {
    loop {
      let names = self.parse_ident_list()?;
      self.stream.skip(":")?;
      let ty = self.parse_type()?;
      self.stream.skip(";")?;

      for name in &names {
        self.declare_variable(name, ty)?;
      }
      if !self.at_identifier() {
        return Ok(());
      }
    }
  }

  /// Globals get a data label; inside a routine the variable takes the next
  /// slot below `%ebp`.
  fn declare_variable(&mut self, name: &Token, ty: TypeId) -> CompileResult<SymbolId> {
    let size = i64::from(self.types.size(ty));
    let storage = match self.frame.as_mut() {
      Some(frame) => {
        frame.locals_size = fit_size(name, i64::from(frame.locals_size) + size, "stack frame")?;
        Storage::Local {
          offset: -(frame.locals_size as i32),
        }
      }
      None => Storage::Global {
        label: format!("global_{}", name.lexeme.to_ascii_lowercase()),
      },
    };
    self
      .scopes
      .add(Symbol::new(&name.lexeme, SymbolKind::Variable(Variable { ty, storage })), name)
  }

  fn lookup_type(&self, name: &Token) -> CompileResult<TypeId> {
    let message = format!("type identifier expected, found '{}'", name.lexeme);
    let id = self.scopes.find_or_die(name, Capability::Type, &message)?;
    self
      .scopes
      .symbol(id)
      .type_id()
      .ok_or_else(|| CompileError::semantic(name, message))
  }

  fn parse_type_name(&mut self) -> CompileResult<TypeId> {
    let name = self.stream.ident()?;
    self.lookup_type(&name)
  }

  fn parse_type(&mut self) -> CompileResult<TypeId> {
    if self.stream.equal_keyword(Keyword::Array)? {
      return self.parse_array_type();
    }
    if self.stream.equal_keyword(Keyword::Record)? {
      return self.parse_record_type();
    }
    if self.stream.equal("^")? {
      let target = self.parse_type_name()?;
      return Ok(self.types.pointer_to(target));
    }
    self.parse_type_name()
  }

  /// `array[l1..h1, l2..h2] of T` is shorthand for nested arrays.
  fn parse_array_type(&mut self) -> CompileResult<TypeId> {
    let bracket = self.stream.skip("[")?;
    let mut dims = Vec::new();
    loop {
      let token = self.stream.peek().clone();
      let low = self.parse_bound()?;
      self.stream.skip("..")?;
      let high = self.parse_bound()?;
      if high < low {
        return Err(CompileError::semantic(
          &token,
          format!("invalid array bounds {low}..{high}"),
        ));
      }
      dims.push((low, high));
      if !self.stream.equal(",")? {
        break;
      }
    }
    self.stream.skip("]")?;
    self.stream.skip_keyword(Keyword::Of)?;

    let mut ty = self.parse_type()?;
    for (low, high) in dims.into_iter().rev() {
      let count = i64::from(high) - i64::from(low) + 1;
      fit_size(&bracket, i64::from(self.types.size(ty)) * count, "array")?;
      ty = self.types.array(ty, low, high);
    }
    Ok(ty)
  }

  /// Optionally signed integer literal or integer constant.
  fn parse_bound(&mut self) -> CompileResult<i32> {
    let negative = if self.stream.equal("-")? {
      true
    } else {
      self.stream.equal("+")?;
      false
    };
    let token = self.stream.advance()?;
    let value = match (token.kind, &token.value) {
      (TokenKind::IntLiteral | TokenKind::HexLiteral, &TokenValue::Int(value)) => value,
      (TokenKind::Identifier, _) => self
        .scopes
        .find(&token.lexeme)
        .and_then(|id| match self.scopes.symbol(id).variable()?.storage {
          Storage::Constant(Literal::Int(value)) => Some(value),
          _ => None,
        })
        .ok_or_else(|| CompileError::semantic(&token, "integer constant expected"))?,
      _ => return Err(CompileError::syntax(&token, "integer constant expected")),
    };
    Ok(if negative { value.wrapping_neg() } else { value })
  }

  /// Fields live in a scope of their own, laid out in declaration order.
  fn parse_record_type(&mut self) -> CompileResult<TypeId> {
    let fields = self.scopes.new_scope();
    self.scopes.push(fields);
    let mut size: u32 = 0;
    while !self.stream.peek().is_keyword(Keyword::End) {
      let names = self.parse_ident_list()?;
      self.stream.skip(":")?;
      let ty = self.parse_type()?;
      for name in &names {
        let field = Variable {
          ty,
          storage: Storage::Field { offset: size },
        };
        self
          .scopes
          .add(Symbol::new(&name.lexeme, SymbolKind::Variable(field)), name)?;
        size = fit_size(name, i64::from(size) + i64::from(self.types.size(ty)), "record")?;
      }
      if !self.stream.equal(";")? {
        break;
      }
    }
    self.stream.skip_keyword(Keyword::End)?;
    self.scopes.pop();
    Ok(self.types.record(fields, size))
  }

  /// Routine header, local declarations and body. The routine symbol goes
  /// into the enclosing scope before the body is read so it can recurse.
  fn parse_routine(&mut self, is_function: bool) -> CompileResult<()> {
    let name = self.stream.ident()?;
    let scope = self.scopes.new_scope();
    self.scopes.push(scope);

    let mut params = Vec::new();
    let mut offset = FIRST_PARAM_OFFSET;
    if self.stream.equal("(")? && !self.stream.equal(")")? {
      loop {
        let by_ref = self.stream.equal_keyword(Keyword::Var)?;
        let names = self.parse_ident_list()?;
        self.stream.skip(":")?;
        let ty = self.parse_type_name()?;
        let slot = if by_ref { WORD_SIZE } else { self.types.size(ty) };
        for param in &names {
          let var = Variable {
            ty,
            storage: Storage::Parameter { offset, by_ref },
          };
          params.push(
            self
              .scopes
              .add(Symbol::new(&param.lexeme, SymbolKind::Variable(var)), param)?,
          );
          offset = fit_size(param, i64::from(offset) + i64::from(slot), "parameter list")? as i32;
        }
        if !self.stream.equal(";")? {
          self.stream.skip(")")?;
          break;
        }
      }
    }

    let result = if is_function {
      self.stream.skip(":")?;
      Some(self.parse_type_name()?)
    } else {
      None
    };
    self.stream.skip(";")?;

    let result_var = match result {
      Some(ty) => {
        fit_size(&name, i64::from(offset) + i64::from(self.types.size(ty)), "parameter list")?;
        let var = Variable {
          ty,
          storage: Storage::Local { offset },
        };
        Some(self.scopes.add(Symbol::new("Result", SymbolKind::Variable(var)), &name)?)
      }
      None => None,
    };

    self.scopes.pop();
    let routine = Routine {
      params,
      result,
      result_var,
      scope,
      entry_label: format!("routine_{}", name.lexeme.to_ascii_lowercase()),
      frame_size: 0,
      body: None,
    };
    let id = self
      .scopes
      .add(Symbol::new(&name.lexeme, SymbolKind::Routine(routine)), &name)?;
    self.routines.push(id);

    self.scopes.push(scope);
    self.frame = Some(Frame::default());
    self.parse_declarations()?;
    let body = self.parse_block()?;
    self.stream.skip(";")?;
    let frame = self.frame.take().unwrap_or_default();
    self.scopes.pop();

    trace!(routine = %name.lexeme, frame = frame.locals_size, "parsed routine");
    if let SymbolKind::Routine(routine) = &mut self.scopes.symbol_mut(id).kind {
      routine.body = Some(body);
      routine.frame_size = frame.locals_size;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use crate::parser::parse;
  use crate::scope::Storage;
  use crate::ty::TypeKind;

  #[test]
  fn locals_are_laid_out_below_the_frame_pointer() {
    let program = parse(
      "procedure p(a: integer; var b: real);
       var x: integer; v: array[0..3] of real;
       begin end;
       begin end.",
    )
    .unwrap();
    let routine = program.scopes.symbol(program.routines[0]).routine().unwrap();
    assert_eq!(routine.frame_size, 20);
    assert_eq!(routine.entry_label, "routine_p");

    let storage: Vec<_> = program
      .scopes
      .symbols_in(routine.scope)
      .filter_map(|id| program.scopes.symbol(id).variable())
      .map(|var| var.storage.clone())
      .collect();
    assert_eq!(
      storage,
      vec![
        Storage::Parameter {
          offset: 8,
          by_ref: false
        },
        Storage::Parameter {
          offset: 12,
          by_ref: true
        },
        Storage::Local { offset: -4 },
        Storage::Local { offset: -20 },
      ]
    );
  }

  #[test]
  fn constants_fold_into_array_bounds() {
    let program = parse(
      "const n = 2 * 5; lo = -1;
       var a: array[lo..n] of integer;
       begin end.",
    )
    .unwrap();
    let a = program.scopes.find("a").unwrap();
    let ty = program.scopes.symbol(a).variable().unwrap().ty;
    assert_eq!(
      *program.types.kind(ty),
      TypeKind::Array {
        element: program.types.integer(),
        low: -1,
        high: 10
      }
    );
    assert_eq!(program.types.size(ty), 48);
  }

  #[test]
  fn reversed_bounds_are_rejected() {
    let err = parse("var a: array[5..1] of integer; begin end.").unwrap_err();
    assert_eq!(err.message(), "invalid array bounds 5..1");
  }

  #[test]
  fn oversized_arrays_are_rejected() {
    for src in [
      "var a: array[0..2000000000] of integer; begin end.",
      "var a: array[-2147483647..2147483647] of integer; begin end.",
      "var a: array[1..2, 0..1000000000] of real; begin end.",
    ] {
      let err = parse(src).unwrap_err();
      assert_eq!(err.message(), "array too large", "{src}");
    }
    assert!(parse("var a: array[1..500000000] of integer; begin end.").is_ok());
  }

  #[test]
  fn oversized_records_and_frames_are_rejected() {
    let err = parse(
      "type big = array[1..500000000] of integer;
       r = record a: big; b: big end;
       begin end.",
    )
    .unwrap_err();
    assert_eq!(err.message(), "record too large");
    assert_eq!(err.position(), (2, 27));

    let err = parse(
      "type big = array[1..500000000] of integer;
       procedure p; var a, b: big; begin end;
       begin end.",
    )
    .unwrap_err();
    assert_eq!(err.message(), "stack frame too large");

    let err = parse(
      "type big = array[1..500000000] of integer;
       procedure p(a, b: big); begin end;
       begin end.",
    )
    .unwrap_err();
    assert_eq!(err.message(), "parameter list too large");
  }

  #[test]
  fn type_section_declares_aliases() {
    let program = parse(
      "type int = integer; vec = array[1..3] of int; pint = ^int;
       var v: vec; p: pint;
       begin p := @v[1] end.",
    )
    .unwrap();
    let int = program.scopes.find("int").unwrap();
    let int = program.scopes.symbol(int).type_id().unwrap();
    assert!(program.types.equal(int, program.types.integer()));
    assert_eq!(program.types.describe(int), "int");
  }

  #[test]
  fn variables_cannot_be_used_as_types() {
    let err = parse("var a: integer; b: a; begin end.").unwrap_err();
    assert_eq!(err.message(), "type identifier expected, found 'a'");
  }

  #[test]
  fn constant_sections_need_constant_values() {
    let err = parse("var x: integer; const c = x + 1; begin end.").unwrap_err();
    assert_eq!(err.message(), "constant expression expected");
  }
}
