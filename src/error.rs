//! Shared error utilities used across the compilation pipeline.
//!
//! Every problem is fatal: the first violation stops compilation. Analyzer
//! errors are anchored at the offending word and printed with the source
//! line and a caret underneath, generator errors name the operand or block
//! that could not be lowered.

use std::fmt;
use std::io;
use std::path::PathBuf;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{kind}\n{at}"))]
  Analyze { kind: AnalyzeErrorKind, at: SourcePos },

  #[snafu(display("code generation failed: {kind}"))]
  Generate { kind: GenerateErrorKind },

  #[snafu(display("'{}' is not a .tinka file", path.display()))]
  NotTinkaFile { path: PathBuf },

  #[snafu(display("cannot read '{}': {source}", path.display()))]
  ReadSource { path: PathBuf, source: io::Error },

  #[snafu(display("cannot write '{}': {source}", path.display()))]
  WriteOutput { path: PathBuf, source: io::Error },
}

impl CompileError {
  /// Construct an analyzer error anchored at a byte offset in `source`.
  pub fn at(file: &str, source: &str, loc: usize, kind: AnalyzeErrorKind) -> Self {
    Self::Analyze {
      kind,
      at: SourcePos::new(file, source, loc),
    }
  }

  pub fn generate(kind: GenerateErrorKind) -> Self {
    Self::Generate { kind }
  }
}

/// Structural, scope and semantic violations found while analyzing words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeErrorKind {
  OutsideFunction { keyword: String },
  InsideFunction { keyword: String },
  UnexpectedEnd { keyword: String },
  MissingTerminator { keyword: String, terminator: String },
  BadFunctionName { name: String },
  ReservedName { name: String },
  UnknownComparison {
    keyword: String,
    left: String,
    compare: String,
    right: String,
  },
  NotAVariable { word: String },
  InvalidOperand { word: String },
  InvalidLength { word: String },
  InvalidParameter { word: String },
  UnknownWord { word: String },
  MissingBlockOpener { keyword: String, found: String },
  UnexpectedBlockOpener,
  UnmatchedCloser,
  UnbalancedBlocks { open: usize },
}

impl fmt::Display for AnalyzeErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::OutsideFunction { keyword } => {
        write!(f, "can't use '{keyword}' outside of a cersva")
      }
      Self::InsideFunction { keyword } => write!(f, "can't use '{keyword}' inside a cersva"),
      Self::UnexpectedEnd { keyword } => {
        write!(f, "unexpected end of input after '{keyword}'")
      }
      Self::MissingTerminator {
        keyword,
        terminator,
      } => write!(f, "'{keyword}' is not terminated: '{terminator}' not found"),
      Self::BadFunctionName { name } => {
        write!(f, "bad cersva name '{name}': must not start with a digit")
      }
      Self::ReservedName { name } => write!(f, "'{name}' is reserved and can't be defined"),
      Self::UnknownComparison {
        keyword,
        left,
        compare,
        right,
      } => write!(f, "unknown comparison '{compare}' in '{keyword} {left} {compare} {right}'"),
      Self::NotAVariable { word } => {
        write!(f, "call result must be stored in a variable, got '{word}'")
      }
      Self::InvalidOperand { word } => write!(f, "invalid operand '{word}'"),
      Self::InvalidLength { word } => write!(f, "invalid anax length in '{word}'"),
      Self::InvalidParameter { word } => write!(f, "invalid cersva parameter '{word}'"),
      Self::UnknownWord { word } => write!(f, "unknown word '{word}'"),
      Self::MissingBlockOpener { keyword, found } => {
        write!(f, "expected 'rinyv' after '{keyword}', but got '{found}'")
      }
      Self::UnexpectedBlockOpener => {
        write!(f, "'rinyv' must follow a cersva, fi or fal header")
      }
      Self::UnmatchedCloser => write!(f, "'situv' without a matching 'rinyv'"),
      Self::UnbalancedBlocks { open } => write!(
        f,
        "'rinyv' count does not equal 'situv' count ({open} block(s) left open)"
      ),
    }
  }
}

/// Problems detected while lowering an already validated AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateErrorKind {
  UndefinedVariable { name: String },
  NotAddressable { operand: String },
  InvalidPosition { operand: String },
  UnmatchedBlock,
  UnclosedBlocks { open: usize },
}

impl fmt::Display for GenerateErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UndefinedVariable { name } => write!(f, "undefined variable '{name}'"),
      Self::NotAddressable { operand } => write!(f, "invalid arguments: '{operand}'"),
      Self::InvalidPosition { operand } => {
        write!(f, "element offset out of range in '{operand}'")
      }
      Self::UnmatchedBlock => write!(f, "block delimiter without an open block"),
      Self::UnclosedBlocks { open } => write!(f, "{open} block(s) never closed"),
    }
  }
}

/// A location inside a source file, rendered chibicc-style with a caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
  pub file: String,
  pub line: usize,
  pub column: usize,
  source_line: String,
}

impl SourcePos {
  pub fn new(file: &str, source: &str, loc: usize) -> Self {
    let mut safe_loc = loc.min(source.len());
    while !source.is_char_boundary(safe_loc) {
      safe_loc -= 1;
    }
    let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |i| safe_loc + i);
    Self {
      file: file.to_string(),
      line: source[..line_start].matches('\n').count() + 1,
      column: source[line_start..safe_loc].chars().count() + 1,
      source_line: source[line_start..line_end].trim_end_matches('\r').to_string(),
    }
  }
}

impl fmt::Display for SourcePos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let marker = format!("{}^", " ".repeat(self.column - 1));
    write!(
      f,
      "  --> {}:{}:{}\n   | {}\n   | {marker}",
      self.file, self.line, self.column, self.source_line
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn source_pos_points_at_word() {
    let source = "cersva f rinyv\n  frobnicate\nsituv\n";
    let loc = source.find("frobnicate").unwrap();
    let pos = SourcePos::new("a.tinka", source, loc);
    assert_eq!(pos.line, 2);
    assert_eq!(pos.column, 3);
    assert_eq!(
      pos.to_string(),
      "  --> a.tinka:2:3\n   |   frobnicate\n   |   ^"
    );
  }

  #[test]
  fn source_pos_at_end_of_input() {
    let source = "kue";
    let pos = SourcePos::new("a.tinka", source, source.len());
    assert_eq!((pos.line, pos.column), (1, 4));
  }

  #[test]
  fn analyze_error_display_leads_with_message() {
    let err = CompileError::at(
      "a.tinka",
      "anax x",
      0,
      AnalyzeErrorKind::OutsideFunction {
        keyword: "anax".into(),
      },
    );
    let text = err.to_string();
    assert!(text.starts_with("can't use 'anax' outside of a cersva\n"));
    assert!(text.contains("a.tinka:1:1"));
  }
}
