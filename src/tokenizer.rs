//! Lexical analysis: turns the raw source text into classified tokens.
//!
//! The parser pulls tokens one at a time through [`Lexer::next_token`]; the
//! whole-stream [`tokenize`] helper exists for the `--emit tokens` listing.
//! Keywords and identifiers are matched case-insensitively, multi-character
//! operators are matched before single-character ones.

use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::error::{CompileError, CompileResult};

/// Reserved words of the language. Parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Keyword {
  And,
  Array,
  Begin,
  Break,
  Const,
  Continue,
  Div,
  Do,
  Downto,
  Else,
  End,
  Exit,
  For,
  Function,
  If,
  Mod,
  Not,
  Of,
  Or,
  Procedure,
  Program,
  Record,
  Repeat,
  Shl,
  Shr,
  Then,
  To,
  Type,
  Until,
  Var,
  While,
  Write,
  Writeln,
  Xor,
}

impl Keyword {
  /// Word operators are reserved but classified as operators.
  fn is_operator(self) -> bool {
    matches!(
      self,
      Keyword::And
        | Keyword::Div
        | Keyword::Mod
        | Keyword::Not
        | Keyword::Or
        | Keyword::Shl
        | Keyword::Shr
        | Keyword::Xor
    )
  }

  pub fn as_str(self) -> &'static str {
    self.into()
  }
}

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
  Identifier,
  ReservedWord(Keyword),
  IntLiteral,
  RealLiteral,
  HexLiteral,
  StringLiteral,
  Operator,
  Delimiter,
  EndOfFile,
}

/// Decoded literal payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
  None,
  Int(i32),
  Real(f32),
  /// Raw bytes; `#nn` codes are single bytes, quoted text keeps its UTF-8 encoding.
  Str(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  /// Source spelling, as written.
  pub lexeme: String,
  pub value: TokenValue,
  pub line: usize,
  pub column: usize,
}

impl Token {
  pub fn new(kind: TokenKind, lexeme: impl Into<String>, value: TokenValue, line: usize, column: usize) -> Self {
    Self {
      kind,
      lexeme: lexeme.into(),
      value,
      line,
      column,
    }
  }

  /// Human-friendly description used in diagnostics.
  pub fn describe(&self) -> String {
    match self.kind {
      TokenKind::EndOfFile => "EOF".to_string(),
      _ => self.lexeme.clone(),
    }
  }

  /// True for an operator or delimiter spelled `op` (word operators compare case-insensitively).
  pub fn is_op(&self, op: &str) -> bool {
    matches!(self.kind, TokenKind::Operator | TokenKind::Delimiter) && self.lexeme.eq_ignore_ascii_case(op)
  }

  pub fn is_keyword(&self, keyword: Keyword) -> bool {
    self.kind == TokenKind::ReservedWord(keyword)
  }

  pub fn is_eof(&self) -> bool {
    self.kind == TokenKind::EndOfFile
  }
}

impl std::fmt::Display for Token {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{} {} {}", self.line, self.column, self.kind, self.describe())
  }
}

const TWO_CHAR_OPERATORS: [&str; 5] = [":=", "..", "<=", ">=", "<>"];

/// Pull-based scanner over a source string.
pub struct Lexer {
  chars: Vec<char>,
  pos: usize,
  line: usize,
  column: usize,
}

impl Lexer {
  pub fn new(source: &str) -> Self {
    Self {
      chars: source.chars().collect(),
      pos: 0,
      line: 1,
      column: 1,
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<char> {
    self.chars.get(self.pos + offset).copied()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += 1;
    if c == '\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(c)
  }

  fn text_from(&self, start: usize) -> String {
    self.chars[start..self.pos].iter().collect()
  }

  fn starts_with(&self, s: &str) -> bool {
    s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
  }

  /// Skip whitespace and all three comment forms.
  fn skip_trivia(&mut self) -> CompileResult<()> {
    loop {
      match self.peek() {
        Some(c) if c.is_whitespace() => {
          self.bump();
        }
        Some('/') if self.peek_at(1) == Some('/') => {
          while let Some(c) = self.peek()
            && c != '\n'
          {
            self.bump();
          }
        }
        Some('{') => self.skip_block_comment("}")?,
        Some('(') if self.peek_at(1) == Some('*') => self.skip_block_comment("*)")?,
        _ => return Ok(()),
      }
    }
  }

  fn skip_block_comment(&mut self, close: &str) -> CompileResult<()> {
    let (line, column) = (self.line, self.column);
    let open_len = if close == "}" { 1 } else { 2 };
    for _ in 0..open_len {
      self.bump();
    }
    loop {
      if self.starts_with(close) {
        for _ in 0..close.len() {
          self.bump();
        }
        return Ok(());
      }
      if self.bump().is_none() {
        return Err(CompileError::lexical(line, column, "", "end of file in comment"));
      }
    }
  }

  /// Produce the next token; keeps returning `EndOfFile` once the input is exhausted.
  pub fn next_token(&mut self) -> CompileResult<Token> {
    self.skip_trivia()?;
    let (line, column) = (self.line, self.column);
    let start = self.pos;

    let Some(c) = self.peek() else {
      return Ok(Token::new(TokenKind::EndOfFile, "", TokenValue::None, line, column));
    };

    if c.is_ascii_alphabetic() || c == '_' {
      while let Some(c) = self.peek()
        && (c.is_ascii_alphanumeric() || c == '_')
      {
        self.bump();
      }
      let text = self.text_from(start);
      let kind = match text.parse::<Keyword>() {
        Ok(keyword) if keyword.is_operator() => TokenKind::Operator,
        Ok(keyword) => TokenKind::ReservedWord(keyword),
        Err(_) => TokenKind::Identifier,
      };
      return Ok(Token::new(kind, text, TokenValue::None, line, column));
    }

    if c.is_ascii_digit() {
      return self.number(start, line, column);
    }

    if c == '$' {
      return self.hex(start, line, column);
    }

    if c == '\'' || c == '#' {
      return self.string(start, line, column);
    }

    if let Some(op) = TWO_CHAR_OPERATORS.into_iter().find(|op| self.starts_with(op)) {
      self.bump();
      self.bump();
      return Ok(Token::new(TokenKind::Operator, op, TokenValue::None, line, column));
    }

    let kind = match c {
      ';' | ':' | ',' => TokenKind::Delimiter,
      '+' | '-' | '*' | '/' | '=' | '<' | '>' | '[' | ']' | '(' | ')' | '.' | '^' | '@' => TokenKind::Operator,
      _ => {
        return Err(CompileError::lexical(line, column, c.to_string(), "illegal character"));
      }
    };
    self.bump();
    Ok(Token::new(kind, c.to_string(), TokenValue::None, line, column))
  }

  fn eat_digits(&mut self) -> usize {
    let mut count = 0;
    while let Some(c) = self.peek()
      && c.is_ascii_digit()
    {
      self.bump();
      count += 1;
    }
    count
  }

  fn number(&mut self, start: usize, line: usize, column: usize) -> CompileResult<Token> {
    self.eat_digits();
    let mut is_real = false;

    // `1..5` is a range, not a real literal.
    if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
      is_real = true;
      self.bump();
      self.eat_digits();
    }

    if matches!(self.peek(), Some('e' | 'E')) {
      is_real = true;
      self.bump();
      if matches!(self.peek(), Some('+' | '-')) {
        self.bump();
      }
      if self.eat_digits() == 0 {
        let text = self.text_from(start);
        return Err(CompileError::lexical(line, column, text, "malformed numeric literal: exponent expected"));
      }
    }

    let text = self.text_from(start);
    if is_real {
      let value = text
        .parse::<f32>()
        .map_err(|err| CompileError::lexical(line, column, &text, format!("malformed numeric literal: {err}")))?;
      if !value.is_finite() {
        return Err(CompileError::lexical(line, column, text, "real literal out of range"));
      }
      return Ok(Token::new(TokenKind::RealLiteral, text, TokenValue::Real(value), line, column));
    }

    let value = text
      .parse::<i32>()
      .map_err(|_| CompileError::lexical(line, column, &text, "integer literal out of range"))?;
    Ok(Token::new(TokenKind::IntLiteral, text, TokenValue::Int(value), line, column))
  }

  fn hex(&mut self, start: usize, line: usize, column: usize) -> CompileResult<Token> {
    self.bump();
    let digits_start = self.pos;
    while let Some(c) = self.peek()
      && c.is_ascii_hexdigit()
    {
      self.bump();
    }
    let text = self.text_from(start);
    let digits = self.text_from(digits_start);
    if digits.is_empty() {
      return Err(CompileError::lexical(line, column, text, "malformed hex literal"));
    }
    let value = u32::from_str_radix(&digits, 16)
      .map_err(|_| CompileError::lexical(line, column, &text, "hex literal out of range"))?;
    Ok(Token::new(TokenKind::HexLiteral, text, TokenValue::Int(value as i32), line, column))
  }

  /// Quoted pieces and `#nn` character codes concatenate into one literal.
  fn string(&mut self, start: usize, line: usize, column: usize) -> CompileResult<Token> {
    let mut value = Vec::new();
    loop {
      match self.peek() {
        Some('\'') => {
          self.bump();
          loop {
            match self.bump() {
              Some('\'') if self.peek() == Some('\'') => {
                self.bump();
                value.push(b'\'');
              }
              Some('\'') => break,
              Some('\n') | None => {
                return Err(CompileError::lexical(line, column, self.text_from(start), "unterminated string"));
              }
              Some(c) => value.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes()),
            }
          }
        }
        Some('#') => {
          self.bump();
          let digits_start = self.pos;
          self.eat_digits();
          let code = self
            .text_from(digits_start)
            .parse::<u8>()
            .map_err(|_| CompileError::lexical(line, column, self.text_from(start), "malformed character code"))?;
          value.push(code);
        }
        _ => break,
      }
    }
    Ok(Token::new(
      TokenKind::StringLiteral,
      self.text_from(start),
      TokenValue::Str(value),
      line,
      column,
    ))
  }
}

/// Lex the whole input into a vector terminated by an `EndOfFile` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut lexer = Lexer::new(input);
  let mut tokens = Vec::new();
  loop {
    let token = lexer.next_token()?;
    let done = token.is_eof();
    tokens.push(token);
    if done {
      return Ok(tokens);
    }
  }
}
