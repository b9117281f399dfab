//! Crate root: wires together the Tinka to 2003lk pipeline.
//!
//! The stages are small and composable:
//! - `tokenizer` splits a file into words and drops `--` comments.
//! - `parser` validates the word stream and produces the expression list.
//! - `codegen` lowers the expressions into 2003lk instructions.
//! - `driver` runs the first two per file and the last once per program.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod ast;
pub mod codegen;
pub mod driver;
pub mod error;
pub mod parser;
pub mod tokenizer;

pub use driver::{Compilation, build, compile, compile_sources, write_output};
pub use error::{CompileError, CompileResult};

/// Compile a single in-memory source into final 2003lk text.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let compilation = compile_sources(&[("<input>", source)])?;
  Ok(compilation.assembly())
}
