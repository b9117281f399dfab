//! Multi-file orchestration: read, analyze, link and emit.
//!
//! Each file is lexed and analyzed on its own, in the order given. The
//! expression lists are then concatenated and generated in one pass so label
//! numbering and `kue`/`xok` resolution cover the whole program.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};
use snafu::ResultExt;

use crate::ast::{ENTRY_POINT, LabelTable};
use crate::codegen;
use crate::error::{CompileResult, NotTinkaFileSnafu, ReadSourceSnafu, WriteOutputSnafu};
use crate::parser::{self, Unit};
use crate::tokenizer;

/// Required extension of every input file.
pub const SOURCE_EXTENSION: &str = "tinka";

/// Generated program plus what the driver needs to finish it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilation {
  /// Generated instructions, without the entry jump.
  pub body: String,
  pub labels: LabelTable,
  /// Some unit defines `_fasal`; the program must start by jumping there.
  pub has_entry_point: bool,
}

impl Compilation {
  /// Final program text, starting with the entry jump when there is one.
  pub fn assembly(&self) -> String {
    if self.has_entry_point {
      format!("krz {ENTRY_POINT} xx\n{}", self.body)
    } else {
      self.body.clone()
    }
  }
}

/// Lex and analyze one in-memory source file.
pub fn analyze_source(file: &str, source: &str) -> CompileResult<Unit> {
  let words = tokenizer::tokenize(source);
  debug!("{file}: {} words", words.len());
  trace!(
    "{file}: {:?}",
    words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>()
  );
  parser::parse(words, file, source)
}

/// Compile in-memory `(file name, source)` pairs as one program.
pub fn compile_sources<N, S>(sources: &[(N, S)]) -> CompileResult<Compilation>
where
  N: AsRef<str>,
  S: AsRef<str>,
{
  let mut units = Vec::with_capacity(sources.len());
  for (file, source) in sources {
    units.push(analyze_source(file.as_ref(), source.as_ref())?);
  }
  link(units)
}

/// Compile `.tinka` files as one program.
///
/// Every path is checked for the extension before any of them is read.
pub fn compile<P: AsRef<Path>>(inputs: &[P]) -> CompileResult<Compilation> {
  for input in inputs {
    let path = input.as_ref();
    if path.extension().and_then(|ext| ext.to_str()) != Some(SOURCE_EXTENSION) {
      return NotTinkaFileSnafu { path }.fail();
    }
  }

  let mut units = Vec::with_capacity(inputs.len());
  for input in inputs {
    let path = input.as_ref();
    let source = fs::read_to_string(path).context(ReadSourceSnafu { path })?;
    units.push(analyze_source(&path.display().to_string(), &source)?);
  }
  link(units)
}

/// Concatenate units and generate the program. Units defining the entry
/// point go first; the rest keep their order.
fn link(units: Vec<Unit>) -> CompileResult<Compilation> {
  let mut labels = LabelTable::default();
  let mut has_entry_point = false;
  for unit in &units {
    labels.merge(&unit.labels);
    has_entry_point |= unit.has_entry_point;
  }
  for label in labels.unresolved() {
    debug!("'{label}' is imported but not exported by any input");
  }

  let (entry, rest): (Vec<Unit>, Vec<Unit>) =
    units.into_iter().partition(|unit| unit.has_entry_point);
  let expressions: Vec<_> = entry
    .into_iter()
    .chain(rest)
    .flat_map(|unit| unit.expressions)
    .collect();

  let body = codegen::generate(&expressions)?;
  Ok(Compilation {
    body,
    labels,
    has_entry_point,
  })
}

/// Write the finished program. The text goes to a sibling temporary file
/// first and is renamed into place, so a failed write never leaves a
/// truncated output behind.
pub fn write_output(compilation: &Compilation, output: &Path) -> CompileResult<()> {
  let staging = staging_path(output);
  let text = compilation.assembly();
  let written = fs::write(&staging, text).and_then(|()| fs::rename(&staging, output));
  if let Err(source) = written {
    discard_staging(&staging);
    return Err(source).context(WriteOutputSnafu { path: output });
  }
  Ok(())
}

fn discard_staging(staging: &Path) {
  if let Err(err) = fs::remove_file(staging)
    && err.kind() != io::ErrorKind::NotFound
  {
    warn!("could not remove {}: {err}", staging.display());
  }
}

/// Compile `inputs` and write the result to `output`. Nothing is written
/// unless compilation succeeds.
pub fn build<P: AsRef<Path>>(inputs: &[P], output: &Path) -> CompileResult<Compilation> {
  let compilation = compile(inputs)?;
  write_output(&compilation, output)?;
  debug!("wrote {}", output.display());
  Ok(compilation)
}

fn staging_path(output: &Path) -> PathBuf {
  let mut name = output
    .file_name()
    .map(|name| name.to_os_string())
    .unwrap_or_default();
  name.push(".partial");
  output.with_file_name(name)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::Visibility;
  use crate::error::CompileError;

  #[test]
  fn entry_point_unit_goes_first() {
    let compilation = compile_sources(&[
      ("lib.tinka", "kue g cersva g rinyv dosnud 1 situv"),
      ("main.tinka", "kue _fasal xok g cersva _fasal rinyv fenxeo g el niv situv"),
    ])
    .unwrap();
    assert!(compilation.has_entry_point);
    assert!(compilation.body.starts_with("kue _fasal\nxok g\nnll _fasal\n"));
    assert!(compilation.assembly().starts_with("krz _fasal xx\nkue _fasal\n"));
    assert_eq!(compilation.labels.get("g"), Some(Visibility::Exported));
  }

  #[test]
  fn no_entry_jump_without_fasal() {
    let compilation = compile_sources(&[("a.tinka", "kue f cersva f rinyv situv")]).unwrap();
    assert!(!compilation.has_entry_point);
    assert_eq!(compilation.assembly(), compilation.body);
  }

  #[test]
  fn first_error_aborts() {
    let err = compile_sources(&[("a.tinka", "situv"), ("b.tinka", "anax x")]).unwrap_err();
    let CompileError::Analyze { at, .. } = err else {
      panic!("expected an analyzer error");
    };
    assert_eq!(at.file, "a.tinka");
  }

  #[test]
  fn rejects_other_extensions_before_reading() {
    let err = compile(&["missing.tinka", "notes.txt"]).unwrap_err();
    assert!(matches!(err, CompileError::NotTinkaFile { ref path } if path == Path::new("notes.txt")));
  }

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tinka-driver-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
  }

  fn tiny_compilation() -> Compilation {
    compile_sources(&[("a.tinka", "kue f cersva f rinyv situv")]).unwrap()
  }

  #[test]
  fn write_into_missing_directory_fails() {
    let dir = scratch_dir("no-parent");
    let output = dir.join("missing").join("a.out");
    let err = write_output(&tiny_compilation(), &output).unwrap_err();
    assert!(matches!(err, CompileError::WriteOutput { ref path, .. } if path == &output));
    assert!(!output.exists());
  }

  #[test]
  fn failed_rename_discards_staging_file() {
    let dir = scratch_dir("rename");
    let output = dir.join("a.out");
    fs::create_dir_all(output.join("occupied")).unwrap();
    let err = write_output(&tiny_compilation(), &output).unwrap_err();
    assert!(matches!(err, CompileError::WriteOutput { .. }));
    assert!(!staging_path(&output).exists());
    assert!(output.is_dir());
  }

  #[test]
  fn staging_path_is_a_sibling() {
    assert_eq!(
      staging_path(Path::new("out/a.s")),
      Path::new("out/a.s.partial")
    );
  }
}
