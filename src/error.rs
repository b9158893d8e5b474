//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage fails fast: the first lexical, syntactic or semantic problem
//! becomes a `CompileError` that unwinds straight to the driver. Diagnostics
//! carry the position and spelling of the offending token.

use snafu::Snafu;

use crate::tokenizer::Token;

pub type CompileResult<T> = Result<T, CompileError>;

/// Which stage rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Lexical,
  Syntax,
  Semantic,
}

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("{line}:{column} lexical error at '{lexeme}': {message}"))]
  Lexical {
    line: usize,
    column: usize,
    lexeme: String,
    message: String,
  },
  #[snafu(display("{line}:{column} syntax error at '{lexeme}': {message}"))]
  Syntax {
    line: usize,
    column: usize,
    lexeme: String,
    message: String,
  },
  #[snafu(display("{line}:{column} semantic error at '{lexeme}': {message}"))]
  Semantic {
    line: usize,
    column: usize,
    lexeme: String,
    message: String,
  },
}

impl CompileError {
  /// Lexical errors are raised before a token exists, so they take a raw position.
  pub fn lexical(line: usize, column: usize, lexeme: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Lexical {
      line,
      column,
      lexeme: lexeme.into(),
      message: message.into(),
    }
  }

  /// Construct a syntax error anchored at a token.
  pub fn syntax(token: &Token, message: impl Into<String>) -> Self {
    Self::Syntax {
      line: token.line,
      column: token.column,
      lexeme: token.describe(),
      message: message.into(),
    }
  }

  /// Construct a semantic error anchored at a token.
  pub fn semantic(token: &Token, message: impl Into<String>) -> Self {
    Self::Semantic {
      line: token.line,
      column: token.column,
      lexeme: token.describe(),
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Lexical { .. } => ErrorKind::Lexical,
      Self::Syntax { .. } => ErrorKind::Syntax,
      Self::Semantic { .. } => ErrorKind::Semantic,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Lexical { message, .. } | Self::Syntax { message, .. } | Self::Semantic { message, .. } => message,
    }
  }

  /// 1-based `(line, column)` of the offending token.
  pub fn position(&self) -> (usize, usize) {
    match self {
      Self::Lexical { line, column, .. }
      | Self::Syntax { line, column, .. }
      | Self::Semantic { line, column, .. } => (*line, *column),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_names_position_kind_and_lexeme() {
    let err = CompileError::lexical(3, 7, "?", "illegal character");
    assert_eq!(err.to_string(), "3:7 lexical error at '?': illegal character");
    assert_eq!(err.kind(), ErrorKind::Lexical);
    assert_eq!(err.position(), (3, 7));
    assert_eq!(err.message(), "illegal character");
  }
}
