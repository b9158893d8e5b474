//! Recursive-descent parser and semantic analyzer.
//!
//! Parsing and checking happen in one pass: names are resolved against the
//! scope stack as they are read and every expression node is typed the moment
//! it is built. Expressions use precedence climbing over four binary levels
//! (relational, adding, multiplying, unary) above the term level.
//! Declarations live in [`decl`].

mod decl;

use tracing::debug;

use crate::ast::{BinaryOp, Direction, Expr, ExprKind, JumpKind, Literal, LoopId, Program, Stmt, UnaryOp, WriteArg};
use crate::error::{CompileError, CompileResult};
use crate::scope::{Capability, ScopeStack, Symbol, SymbolId, SymbolKind};
use crate::tokenizer::{Keyword, Lexer, Token, TokenKind, TokenValue};
use crate::ty::{TypeId, TypeKind, TypeTable};

/// Parse and check a whole program.
pub fn parse(source: &str) -> CompileResult<Program> {
  let mut parser = Parser::new(source)?;
  let (name, body) = parser.parse_program()?;
  let Parser {
    types,
    scopes,
    routines,
    ..
  } = parser;
  debug!(routines = routines.len(), "parsed program");
  Ok(Program {
    name,
    types,
    scopes,
    routines,
    body,
  })
}

/// One-token lookahead cursor that pulls from the lexer on demand.
struct TokenStream {
  lexer: Lexer,
  current: Token,
}

impl TokenStream {
  fn new(source: &str) -> CompileResult<Self> {
    let mut lexer = Lexer::new(source);
    let current = lexer.next_token()?;
    Ok(Self { lexer, current })
  }

  fn peek(&self) -> &Token {
    &self.current
  }

  /// Lowercased spelling of the current token if it is an operator.
  fn peek_operator(&self) -> Option<String> {
    (self.current.kind == TokenKind::Operator).then(|| self.current.lexeme.to_ascii_lowercase())
  }

  /// Move to the next token, returning the one just consumed.
  fn advance(&mut self) -> CompileResult<Token> {
    let next = self.lexer.next_token()?;
    Ok(std::mem::replace(&mut self.current, next))
  }

  /// Consume the current token if it is the operator or delimiter `op`.
  fn equal(&mut self, op: &str) -> CompileResult<bool> {
    if self.current.is_op(op) {
      self.advance()?;
      return Ok(true);
    }
    Ok(false)
  }

  fn equal_keyword(&mut self, keyword: Keyword) -> CompileResult<bool> {
    if self.current.is_keyword(keyword) {
      self.advance()?;
      return Ok(true);
    }
    Ok(false)
  }

  fn skip(&mut self, op: &str) -> CompileResult<Token> {
    if self.current.is_op(op) {
      return self.advance();
    }
    Err(CompileError::syntax(&self.current, format!("'{op}' expected")))
  }

  fn skip_keyword(&mut self, keyword: Keyword) -> CompileResult<Token> {
    if self.current.is_keyword(keyword) {
      return self.advance();
    }
    Err(CompileError::syntax(
      &self.current,
      format!("'{}' expected", keyword.as_str()),
    ))
  }

  fn ident(&mut self) -> CompileResult<Token> {
    if self.current.kind == TokenKind::Identifier {
      return self.advance();
    }
    Err(CompileError::syntax(&self.current, "identifier expected"))
  }
}

/// Running size of the locals of the routine being parsed.
#[derive(Debug, Default)]
struct Frame {
  locals_size: u32,
}

struct Parser {
  stream: TokenStream,
  types: TypeTable,
  scopes: ScopeStack,
  /// Loops enclosing the statement being parsed, innermost last.
  loops: Vec<LoopId>,
  loop_count: usize,
  /// `None` while parsing global declarations and the main block.
  frame: Option<Frame>,
  routines: Vec<SymbolId>,
}

impl Parser {
  fn new(source: &str) -> CompileResult<Self> {
    let stream = TokenStream::new(source)?;
    let types = TypeTable::new();
    let mut scopes = ScopeStack::new();
    for (name, ty) in [("integer", types.integer()), ("real", types.real())] {
      let token = Token::new(TokenKind::Identifier, name, TokenValue::None, 0, 0);
      scopes.add(Symbol::new(name, SymbolKind::Type(ty)), &token)?;
    }
    Ok(Self {
      stream,
      types,
      scopes,
      loops: Vec::new(),
      loop_count: 0,
      frame: None,
      routines: Vec::new(),
    })
  }

  fn parse_program(&mut self) -> CompileResult<(Option<String>, Stmt)> {
    let name = if self.stream.equal_keyword(Keyword::Program)? {
      let name = self.stream.ident()?;
      self.stream.skip(";")?;
      Some(name.lexeme)
    } else {
      None
    };

    self.parse_declarations()?;
    let body = self.parse_block()?;
    self.stream.skip(".")?;

    let token = self.stream.peek();
    if !token.is_eof() {
      return Err(CompileError::syntax(token, "end of file expected"));
    }
    Ok((name, body))
  }

  fn semantic(&self, token: &Token, message: impl Into<String>) -> CompileError {
    CompileError::semantic(token, message)
  }

  fn describe(&self, ty: TypeId) -> String {
    self.types.describe(ty)
  }

  fn open_loop(&mut self) -> LoopId {
    let id = LoopId(self.loop_count);
    self.loop_count += 1;
    self.loops.push(id);
    id
  }

  // --- Statements ---

  fn parse_block(&mut self) -> CompileResult<Stmt> {
    self.stream.skip_keyword(Keyword::Begin)?;
    let stmts = self.parse_statement_list()?;
    self.stream.skip_keyword(Keyword::End)?;
    Ok(Stmt::Block(stmts))
  }

  /// `;`-separated statements; empty statements are dropped.
  fn parse_statement_list(&mut self) -> CompileResult<Vec<Stmt>> {
    let mut stmts = Vec::new();
    loop {
      match self.parse_statement()? {
        Stmt::Block(inner) if inner.is_empty() => {}
        stmt => stmts.push(stmt),
      }
      if !self.stream.equal(";")? {
        return Ok(stmts);
      }
    }
  }

  fn parse_statement(&mut self) -> CompileResult<Stmt> {
    let token = self.stream.peek().clone();
    match token.kind {
      TokenKind::ReservedWord(Keyword::Begin) => self.parse_block(),
      TokenKind::ReservedWord(Keyword::If) => self.parse_if(),
      TokenKind::ReservedWord(Keyword::While) => self.parse_while(),
      TokenKind::ReservedWord(Keyword::Repeat) => self.parse_repeat(),
      TokenKind::ReservedWord(Keyword::For) => self.parse_for(),
      TokenKind::ReservedWord(keyword @ (Keyword::Break | Keyword::Continue)) => {
        self.stream.advance()?;
        let kind = if keyword == Keyword::Break {
          JumpKind::Break
        } else {
          JumpKind::Continue
        };
        match self.loops.last() {
          Some(&target) => Ok(Stmt::Jump { kind, target }),
          None => Err(self.semantic(&token, format!("'{}' outside of loop", keyword.as_str()))),
        }
      }
      TokenKind::ReservedWord(Keyword::Exit) => {
        self.stream.advance()?;
        Ok(Stmt::Exit)
      }
      TokenKind::ReservedWord(keyword @ (Keyword::Write | Keyword::Writeln)) => {
        self.stream.advance()?;
        self.parse_write(keyword == Keyword::Writeln)
      }
      TokenKind::Identifier => self.parse_designator_statement(),
      TokenKind::ReservedWord(Keyword::End | Keyword::Until | Keyword::Else) => Ok(Stmt::Block(Vec::new())),
      TokenKind::Delimiter if token.is_op(";") => Ok(Stmt::Block(Vec::new())),
      _ => Err(CompileError::syntax(&token, "statement expected")),
    }
  }

  /// Integer-valued condition of `if`, `while` and `until`.
  fn parse_condition(&mut self) -> CompileResult<Expr> {
    let token = self.stream.peek().clone();
    let cond = self.parse_expression()?;
    if !self.types.is_integer(cond.result_type()) {
      return Err(self.semantic(
        &token,
        format!("integer condition expected, found {}", self.describe(cond.result_type())),
      ));
    }
    Ok(cond)
  }

  fn parse_if(&mut self) -> CompileResult<Stmt> {
    self.stream.skip_keyword(Keyword::If)?;
    let cond = self.parse_condition()?;
    self.stream.skip_keyword(Keyword::Then)?;
    let then_branch = Box::new(self.parse_statement()?);
    let else_branch = if self.stream.equal_keyword(Keyword::Else)? {
      Some(Box::new(self.parse_statement()?))
    } else {
      None
    };
    Ok(Stmt::If {
      cond,
      then_branch,
      else_branch,
    })
  }

  fn parse_while(&mut self) -> CompileResult<Stmt> {
    self.stream.skip_keyword(Keyword::While)?;
    let cond = self.parse_condition()?;
    self.stream.skip_keyword(Keyword::Do)?;
    let id = self.open_loop();
    let body = self.parse_statement()?;
    self.loops.pop();
    Ok(Stmt::While {
      id,
      cond,
      body: Box::new(body),
    })
  }

  fn parse_repeat(&mut self) -> CompileResult<Stmt> {
    self.stream.skip_keyword(Keyword::Repeat)?;
    let id = self.open_loop();
    let body = self.parse_statement_list()?;
    self.loops.pop();
    self.stream.skip_keyword(Keyword::Until)?;
    let cond = self.parse_condition()?;
    Ok(Stmt::Until {
      id,
      cond,
      body: Box::new(Stmt::Block(body)),
    })
  }

  fn parse_for(&mut self) -> CompileResult<Stmt> {
    self.stream.skip_keyword(Keyword::For)?;
    let token = self.stream.peek().clone();
    self
      .scopes
      .find_or_die(&token, Capability::Variable, "integer variable expected")?;
    let index = self.parse_designator()?;
    let is_variable = matches!(index.kind(), ExprKind::VarRef(_)) && index.is_lvalue();
    if !is_variable || !self.types.is_integer(index.result_type()) {
      return Err(self.semantic(&token, "integer variable expected"));
    }
    self.stream.skip(":=")?;
    let low = self.parse_integer_expression()?;
    let direction = if self.stream.equal_keyword(Keyword::To)? {
      Direction::To
    } else if self.stream.equal_keyword(Keyword::Downto)? {
      Direction::Downto
    } else {
      return Err(CompileError::syntax(self.stream.peek(), "'to' or 'downto' expected"));
    };
    let high = self.parse_integer_expression()?;
    self.stream.skip_keyword(Keyword::Do)?;
    let id = self.open_loop();
    let body = self.parse_statement()?;
    self.loops.pop();
    Ok(Stmt::For {
      id,
      index,
      low,
      high,
      direction,
      body: Box::new(body),
    })
  }

  fn parse_integer_expression(&mut self) -> CompileResult<Expr> {
    let token = self.stream.peek().clone();
    let expr = self.parse_expression()?;
    let ty = self.types.integer();
    self.coerce(expr, ty, &token)
  }

  fn parse_write(&mut self, newline: bool) -> CompileResult<Stmt> {
    let mut args = Vec::new();
    if self.stream.equal("(")? && !self.stream.equal(")")? {
      loop {
        let token = self.stream.peek().clone();
        if let TokenValue::Str(text) = &token.value {
          self.stream.advance()?;
          args.push(WriteArg::Text(text.clone()));
        } else {
          let value = self.parse_expression()?;
          if !self.types.is_numeric(value.result_type()) {
            return Err(self.semantic(
              &token,
              format!("cannot write a value of type {}", self.describe(value.result_type())),
            ));
          }
          args.push(WriteArg::Value(value));
        }
        if !self.stream.equal(",")? {
          self.stream.skip(")")?;
          break;
        }
      }
    }
    Ok(Stmt::Write { args, newline })
  }

  /// Assignment or routine call, both of which start with an identifier.
  fn parse_designator_statement(&mut self) -> CompileResult<Stmt> {
    let token = self.stream.peek().clone();
    if let Some(id) = self.scopes.find(&token.lexeme)
      && [Capability::Procedure, Capability::Function]
        .into_iter()
        .any(|capability| self.scopes.symbol(id).has(capability))
    {
      self.stream.advance()?;
      let call = self.parse_call(id, &token)?;
      return Ok(Stmt::Call(call));
    }

    let lhs = self.parse_designator()?;
    let assign = self.stream.skip(":=")?;
    if !lhs.is_lvalue() {
      return Err(self.semantic(&token, "l-value expected"));
    }
    let rhs = self.parse_expression()?;
    let rhs = self.coerce(rhs, lhs.result_type(), &assign)?;
    Ok(Stmt::Assign { lhs, rhs })
  }

  // --- Expressions ---

  /// The single implicit conversion, or a type error naming both types.
  fn coerce(&self, expr: Expr, target: TypeId, token: &Token) -> CompileResult<Expr> {
    self.types.try_coerce(expr, target).map_err(|expr| {
      self.semantic(
        token,
        format!(
          "incompatible types: {} and {}",
          self.describe(target),
          self.describe(expr.result_type())
        ),
      )
    })
  }

  /// Bring both operands to one type by widening whichever side allows it.
  fn unify(&self, lhs: Expr, rhs: Expr, token: &Token) -> CompileResult<(Expr, Expr)> {
    let rhs = match self.types.try_coerce(rhs, lhs.result_type()) {
      Ok(rhs) => return Ok((lhs, rhs)),
      Err(rhs) => rhs,
    };
    match self.types.try_coerce(lhs, rhs.result_type()) {
      Ok(lhs) => Ok((lhs, rhs)),
      Err(lhs) => Err(self.semantic(
        token,
        format!(
          "incompatible types: {} and {}",
          self.describe(lhs.result_type()),
          self.describe(rhs.result_type())
        ),
      )),
    }
  }

  fn make_binary(&self, op: BinaryOp, lhs: Expr, rhs: Expr, token: &Token) -> CompileResult<Expr> {
    if op.is_integer_only() {
      if !self.types.is_integer(lhs.result_type()) || !self.types.is_integer(rhs.result_type()) {
        return Err(self.semantic(
          token,
          format!(
            "operator '{op}' expects integer operands, found {} and {}",
            self.describe(lhs.result_type()),
            self.describe(rhs.result_type())
          ),
        ));
      }
      return Ok(Expr::binary(op, lhs, rhs, self.types.integer()));
    }

    if op == BinaryOp::RealDiv {
      let real = self.types.real();
      let lhs = self.coerce(lhs, real, token)?;
      let rhs = self.coerce(rhs, real, token)?;
      return Ok(Expr::binary(op, lhs, rhs, real));
    }

    let (lhs, rhs) = self.unify(lhs, rhs, token)?;
    if !self.types.is_numeric(lhs.result_type()) {
      return Err(self.semantic(
        token,
        format!("operator '{op}' is not defined for {}", self.describe(lhs.result_type())),
      ));
    }
    let ty = if op.is_relational() {
      self.types.integer()
    } else {
      lhs.result_type()
    };
    Ok(Expr::binary(op, lhs, rhs, ty))
  }

  fn parse_expression(&mut self) -> CompileResult<Expr> {
    self.parse_relational()
  }

  /// Lowest precedence level; comparisons do not chain.
  fn parse_relational(&mut self) -> CompileResult<Expr> {
    let lhs = self.parse_adding()?;

    let op = match self.stream.peek_operator().as_deref() {
      Some("=") => BinaryOp::Eq,
      Some("<>") => BinaryOp::Ne,
      Some("<") => BinaryOp::Lt,
      Some("<=") => BinaryOp::Le,
      Some(">") => BinaryOp::Gt,
      Some(">=") => BinaryOp::Ge,
      _ => return Ok(lhs),
    };

    let token = self.stream.advance()?;
    let rhs = self.parse_adding()?;
    self.make_binary(op, lhs, rhs, &token)
  }

  fn parse_adding(&mut self) -> CompileResult<Expr> {
    let mut node = self.parse_multiplying()?;

    loop {
      let op = match self.stream.peek_operator().as_deref() {
        Some("+") => BinaryOp::Add,
        Some("-") => BinaryOp::Sub,
        Some("or") => BinaryOp::Or,
        Some("xor") => BinaryOp::Xor,
        _ => break,
      };

      let token = self.stream.advance()?;
      let rhs = self.parse_multiplying()?;
      node = self.make_binary(op, node, rhs, &token)?;
    }

    Ok(node)
  }

  fn parse_multiplying(&mut self) -> CompileResult<Expr> {
    let mut node = self.parse_unary()?;

    loop {
      let op = match self.stream.peek_operator().as_deref() {
        Some("*") => BinaryOp::Mul,
        Some("/") => BinaryOp::RealDiv,
        Some("div") => BinaryOp::Div,
        Some("mod") => BinaryOp::Mod,
        Some("and") => BinaryOp::And,
        Some("shl") => BinaryOp::Shl,
        Some("shr") => BinaryOp::Shr,
        _ => break,
      };

      let token = self.stream.advance()?;
      let rhs = self.parse_unary()?;
      node = self.make_binary(op, node, rhs, &token)?;
    }

    Ok(node)
  }

  fn parse_unary(&mut self) -> CompileResult<Expr> {
    let op = match self.stream.peek_operator().as_deref() {
      Some("-") => UnaryOp::Neg,
      Some("+") => UnaryOp::Plus,
      Some("not") => UnaryOp::Not,
      Some("@") => UnaryOp::AddressOf,
      _ => return self.parse_term(),
    };

    let token = self.stream.advance()?;
    let operand = self.parse_unary()?;
    let ty = operand.result_type();
    let result = match op {
      UnaryOp::Neg | UnaryOp::Plus if self.types.is_numeric(ty) => ty,
      UnaryOp::Not if self.types.is_integer(ty) => ty,
      UnaryOp::AddressOf if operand.is_lvalue() => self.types.pointer_to(ty),
      UnaryOp::AddressOf => return Err(self.semantic(&token, "l-value expected")),
      _ => {
        return Err(self.semantic(
          &token,
          format!("operator '{op}' is not defined for {}", self.describe(ty)),
        ));
      }
    };
    Ok(Expr::unary(op, operand, result))
  }

  fn parse_term(&mut self) -> CompileResult<Expr> {
    let token = self.stream.peek().clone();
    match (token.kind, &token.value) {
      (TokenKind::IntLiteral | TokenKind::HexLiteral, &TokenValue::Int(value)) => {
        self.stream.advance()?;
        Ok(Expr::literal(Literal::Int(value), self.types.integer()))
      }
      (TokenKind::RealLiteral, &TokenValue::Real(value)) => {
        self.stream.advance()?;
        Ok(Expr::literal(Literal::Real(value), self.types.real()))
      }
      (TokenKind::Operator, _) if token.is_op("(") => {
        self.stream.advance()?;
        let expr = self.parse_expression()?;
        self.stream.skip(")")?;
        Ok(expr)
      }
      (TokenKind::Identifier, _) => {
        if let Some(id) = self.scopes.find(&token.lexeme)
          && self.scopes.symbol(id).has(Capability::Procedure)
        {
          return Err(self.semantic(&token, format!("procedure '{}' does not return a value", token.lexeme)));
        }
        self.parse_designator()
      }
      (TokenKind::StringLiteral, _) => Err(self.semantic(&token, "string literals are only allowed in write")),
      _ => Err(CompileError::syntax(&token, "expression expected")),
    }
  }

  /// Identifier followed by any chain of `[...]` and `.field` selectors.
  fn parse_designator(&mut self) -> CompileResult<Expr> {
    let token = self.stream.ident()?;
    let id = self
      .scopes
      .find(&token.lexeme)
      .ok_or_else(|| self.semantic(&token, format!("undeclared identifier '{}'", token.lexeme)))?;

    let mut expr = match &self.scopes.symbol(id).kind {
      SymbolKind::Variable(var) => Expr::var_ref(id, var.ty, !var.is_constant()),
      SymbolKind::Routine(_) => self.parse_call(id, &token)?,
      SymbolKind::Type(_) => return Err(self.semantic(&token, "variable expected")),
    };

    loop {
      let token = self.stream.peek().clone();
      if token.is_op("[") {
        self.stream.advance()?;
        loop {
          expr = self.parse_index(expr, &token)?;
          if !self.stream.equal(",")? {
            break;
          }
        }
        self.stream.skip("]")?;
      } else if token.is_op(".") {
        self.stream.advance()?;
        expr = self.parse_field(expr, &token)?;
      } else {
        return Ok(expr);
      }
    }
  }

  fn parse_index(&mut self, array: Expr, bracket: &Token) -> CompileResult<Expr> {
    let &TypeKind::Array { element, .. } = self.types.kind(array.result_type()) else {
      return Err(self.semantic(
        bracket,
        format!("array expected, found {}", self.describe(array.result_type())),
      ));
    };
    if !array.is_lvalue() {
      return Err(self.semantic(bracket, "l-value expected"));
    }
    let token = self.stream.peek().clone();
    let index = self.parse_expression()?;
    if !self.types.is_integer(index.result_type()) {
      return Err(self.semantic(
        &token,
        format!("integer index expected, found {}", self.describe(index.result_type())),
      ));
    }
    Ok(Expr::array_access(array, index, element))
  }

  fn parse_field(&mut self, record: Expr, dot: &Token) -> CompileResult<Expr> {
    let name = self.stream.ident()?;
    let &TypeKind::Record { fields, .. } = self.types.kind(record.result_type()) else {
      return Err(self.semantic(
        dot,
        format!("record expected, found {}", self.describe(record.result_type())),
      ));
    };
    if !record.is_lvalue() {
      return Err(self.semantic(dot, "l-value expected"));
    }
    let field = self
      .scopes
      .find_in(fields, &name.lexeme)
      .ok_or_else(|| self.semantic(&name, format!("unknown field '{}'", name.lexeme)))?;
    let ty = self
      .scopes
      .symbol(field)
      .variable()
      .map(|var| var.ty)
      .ok_or_else(|| self.semantic(&name, "field expected"))?;
    Ok(Expr::record_access(record, field, ty))
  }

  /// Arguments of a call to `callee`; the routine name has been consumed.
  fn parse_call(&mut self, callee: SymbolId, name: &Token) -> CompileResult<Expr> {
    let Some(routine) = self.scopes.symbol(callee).routine() else {
      return Err(self.semantic(name, "routine expected"));
    };
    let result = routine.result.unwrap_or(self.types.void());
    let params: Vec<(TypeId, bool)> = routine
      .params
      .iter()
      .filter_map(|&param| self.scopes.symbol(param).variable())
      .map(|var| (var.ty, var.is_by_ref()))
      .collect();

    let mut args = Vec::new();
    if self.stream.equal("(")? && !self.stream.equal(")")? {
      loop {
        let token = self.stream.peek().clone();
        args.push((token, self.parse_expression()?));
        if !self.stream.equal(",")? {
          self.stream.skip(")")?;
          break;
        }
      }
    }

    if args.len() != params.len() {
      return Err(self.semantic(
        name,
        format!(
          "'{}' expects {} argument(s), found {}",
          name.lexeme,
          params.len(),
          args.len()
        ),
      ));
    }

    let mut checked = Vec::with_capacity(args.len());
    for ((ty, by_ref), (token, arg)) in params.into_iter().zip(args) {
      if by_ref {
        if !arg.is_lvalue() || !self.types.equal(arg.result_type(), ty) {
          return Err(self.semantic(
            &token,
            format!("variable of type {} expected for var parameter", self.describe(ty)),
          ));
        }
        checked.push(arg);
      } else {
        checked.push(self.coerce(arg, ty, &token)?);
      }
    }
    Ok(Expr::call(callee, checked, result))
  }
}
