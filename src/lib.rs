//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` performs lexical analysis, one token at a time.
//! - `parser` resolves names and types while it builds the syntax tree.
//! - `ty` and `scope` hold the type table and the scope stack it fills in.
//! - `codegen` lowers the tree into 32-bit AT&T assembly.
//! - `error` is the single failure path shared by every stage.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod parser;
pub mod scope;
pub mod tokenizer;
pub mod ty;

use std::fmt::Write as _;

use tracing::debug;

pub use error::{CompileError, CompileResult, ErrorKind};

/// Compile a source program into an assembly listing.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let program = parser::parse(source)?;
  let asm = codegen::generate(&program).to_string();
  debug!(bytes = asm.len(), "assembly listing ready");
  Ok(asm)
}

/// One line per token: `line:column CLASS lexeme`.
pub fn dump_tokens(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  debug!(tokens = tokens.len(), "tokenized");
  let mut out = String::new();
  for token in &tokens {
    let _ = writeln!(out, "{token}");
  }
  Ok(out)
}

/// Indented syntax tree of every routine and of the main block.
pub fn dump_tree(source: &str) -> CompileResult<String> {
  let program = parser::parse(source)?;
  Ok(ast::print_tree(&program))
}

/// Global declarations with their types and storage.
pub fn dump_declarations(source: &str) -> CompileResult<String> {
  let program = parser::parse(source)?;
  Ok(ast::print_declarations(&program))
}
