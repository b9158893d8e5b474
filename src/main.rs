use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use snafu::{ResultExt, Snafu};
use tracing::{Level, info};

use rpasc::CompileError;

/// Single-pass compiler from a small Pascal dialect to 32-bit AT&T assembly.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
  /// Source file to compile.
  source: PathBuf,

  /// What to print.
  #[arg(long, value_enum, default_value_t = Emit::Asm)]
  emit: Emit,

  /// Write the output here instead of stdout.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Increase log verbosity (-v debug, -vv trace).
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
  /// Assembly listing.
  Asm,
  /// Lexeme stream.
  Tokens,
  /// Syntax tree.
  Tree,
  /// Global declarations.
  Decls,
}

#[derive(Debug, Snafu)]
enum DriverError {
  #[snafu(display("cannot read {}: {source}", path.display()))]
  ReadSource { path: PathBuf, source: io::Error },
  #[snafu(display("cannot write {}: {source}", path.display()))]
  WriteOutput { path: PathBuf, source: io::Error },
  #[snafu(display("{source}"))]
  Compile { source: CompileError },
}

fn run(args: &Args) -> Result<(), DriverError> {
  let source = fs::read_to_string(&args.source).context(ReadSourceSnafu { path: &args.source })?;
  info!(path = %args.source.display(), emit = ?args.emit, "compiling");

  let output = match args.emit {
    Emit::Asm => rpasc::generate_assembly(&source),
    Emit::Tokens => rpasc::dump_tokens(&source),
    Emit::Tree => rpasc::dump_tree(&source),
    Emit::Decls => rpasc::dump_declarations(&source),
  }
  .context(CompileSnafu)?;

  match &args.output {
    Some(path) => fs::write(path, output).context(WriteOutputSnafu { path }),
    None => {
      print!("{output}");
      Ok(())
    }
  }
}

fn main() {
  let args = Args::parse();

  let level = match args.verbose {
    0 => Level::WARN,
    1 => Level::DEBUG,
    _ => Level::TRACE,
  };
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_writer(io::stderr)
    .init();

  if let Err(err) = run(&args) {
    eprintln!("{err}");
    process::exit(1);
  }
}
