use std::fs;
use std::path::{Path, PathBuf};

use rpasc::{ErrorKind, dump_declarations, dump_tokens, dump_tree, generate_assembly};

const PROGRAMS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/programs");

fn programs() -> Vec<PathBuf> {
  let mut paths: Vec<PathBuf> = fs::read_dir(Path::new(PROGRAMS_DIR))
    .expect("failed to open the program directory")
    .map(|entry| entry.expect("failed to read a directory entry").path())
    .filter(|path| path.extension().is_some_and(|ext| ext == "pas"))
    .collect();
  paths.sort();
  paths
}

#[test]
fn every_sample_program_compiles() {
  let paths = programs();
  assert!(!paths.is_empty());
  let failures: Vec<String> = paths
    .iter()
    .filter_map(|path| {
      let source = fs::read_to_string(path).expect("failed to read a program");
      generate_assembly(&source)
        .err()
        .map(|err| format!("{}: {err}", path.display()))
    })
    .collect();
  assert!(failures.is_empty(), "failed to compile:\n{}", failures.join("\n"));
}

#[test]
fn listing_has_data_text_and_entry_point() {
  let source = fs::read_to_string(Path::new(PROGRAMS_DIR).join("factorial.pas")).unwrap();
  let asm = generate_assembly(&source).unwrap();
  let data = asm.find(".data").unwrap();
  let text = asm.find(".text").unwrap();
  assert!(data < text);
  assert!(asm.contains("global_n:"));
  assert!(asm.contains("routine_fact:"));
  assert!(asm.contains(".globl main"));
  assert!(asm.contains("\tcall routine_fact"));
  assert!(asm.contains("\tcall printf"));
}

#[test]
fn mixed_arithmetic_is_widened_in_the_tree() {
  let tree = dump_tree("var x: real; begin x := 1 + 2.0 end.").unwrap();
  let expected = "\
Main
  Block
    Assign
      VarRef x : real
      Binary + : real
        IntToReal : real
          Literal 1 : integer
        Literal 2.0 : real
";
  assert_eq!(tree, expected);
}

#[test]
fn declarations_list_storage() {
  let decls = dump_declarations(
    "const limit = 4;
     type vec = array[1..limit] of integer;
     var v: vec; r: real;
     function f(a: integer): integer; begin Result := a end;
     begin end.",
  )
  .unwrap();
  assert!(decls.contains("var v : vec @ global_v"));
  assert!(decls.contains("var r : real @ global_r"));
  assert!(decls.contains("const limit = 4 : integer"));
  assert!(decls.contains("function f : integer @ routine_f"));
}

#[test]
fn tokens_are_listed_with_positions() {
  let tokens = dump_tokens("begin x := $1F end.").unwrap();
  let lines: Vec<&str> = tokens.lines().collect();
  assert_eq!(lines[0], "1:1 RESERVED_WORD begin");
  assert_eq!(lines[1], "1:7 IDENTIFIER x");
  assert_eq!(lines[2], "1:9 OPERATOR :=");
  assert_eq!(lines[3], "1:12 HEX_LITERAL $1F");
  assert_eq!(lines.last(), Some(&"1:20 END_OF_FILE EOF"));
}

#[test]
fn break_outside_of_loop_is_rejected() {
  let err = generate_assembly("begin break end.").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Semantic);
  assert_eq!(err.position(), (1, 7));
}

#[test]
fn errors_stop_at_the_first_problem() {
  let err = generate_assembly("var a: integer;\nbegin\n  a := b;\n  c := 1\nend.").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Semantic);
  assert_eq!(err.position(), (3, 8));
  assert!(err.to_string().contains("undeclared identifier 'b'"));

  let err = generate_assembly("var x: integer; begin x := 'unterminated end.").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Lexical);

  let err = generate_assembly("begin end").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn out_of_range_declarations_and_literals_are_errors() {
  let err = generate_assembly("var a: array[0..2000000000] of integer; begin end.").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Semantic);
  assert_eq!(err.message(), "array too large");

  let err = generate_assembly("var a: array[-2147483647..2147483647] of integer; begin end.").unwrap_err();
  assert_eq!(err.message(), "array too large");

  let err = generate_assembly("var x: real; begin x := 1e40 end.").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Lexical);
  assert_eq!(err.message(), "real literal out of range");
}
