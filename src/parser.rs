//! Analyzer: turns the word stream of one file into a validated expression list.
//!
//! Tinka has no grammar beyond "keyword followed by a fixed number of words",
//! so this is a single left-to-right scan. Each keyword consumes its own
//! operands; `cersva` and `fenxeo` additionally scan ahead for the word that
//! terminates their variable-length lists. Alongside the expressions the
//! scan keeps:
//! - the function scope, entered at `cersva` and left when the nesting depth
//!   drops back to where the function started,
//! - the block nesting depth, which must be zero at end of input,
//! - the `kue`/`xok` label table.

use log::{debug, trace};

use crate::ast::{
  Comparison, Condition, Destination, ENTRY_POINT, Expression, LabelTable, Mnemonic, Operand,
  Param, RESERVED_CALL_LITERAL, RESERVED_CALL_TARGET, VariableRef,
};
use crate::error::{AnalyzeErrorKind, CompileError, CompileResult};
use crate::tokenizer::{Word, describe_word};

const KUE: &str = "kue";
const XOK: &str = "xok";
const ANAX: &str = "anax";
const FI: &str = "fi";
const FAL: &str = "fal";
const RINYV: &str = "rinyv";
const SITUV: &str = "situv";
const CERSVA: &str = "cersva";
const DOSNUD: &str = "dosnud";
const FENXEO: &str = "fenxeo";
const EL: &str = "el";
const DISCARD: &str = "niv";

/// Everything the analyzer learned from one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
  pub expressions: Vec<Expression>,
  pub labels: LabelTable,
  /// Set when the file defines the `_fasal` entry point.
  pub has_entry_point: bool,
}

/// Analyze the words of one file. `file` and `source` are only used to
/// anchor diagnostics.
pub fn parse(words: Vec<Word>, file: &str, source: &str) -> CompileResult<Unit> {
  let mut analyzer = Analyzer::new(WordStream::new(words, file, source));
  analyzer.run()?;
  let unit = analyzer.finish()?;
  debug!(
    "{file}: {} expressions, {} labels",
    unit.expressions.len(),
    unit.labels.len()
  );
  for expression in &unit.expressions {
    trace!("  {expression:?}");
  }
  Ok(unit)
}

/// Parse a single operand word.
///
/// All-digit words are constants. `name@rest` offsets `name` by the operand
/// `rest`, which is parsed recursively, so `x@y@3` reads `x` at the offset
/// held in element 3 of `y`. Returns `None` for an empty name or offset.
pub fn parse_operand(word: &str) -> Option<Operand> {
  if word.is_empty() {
    return None;
  }
  if word.bytes().all(|b| b.is_ascii_digit()) {
    return Some(Operand::constant(word));
  }
  match word.split_once('@') {
    Some((name, rest)) => {
      if name.is_empty() {
        return None;
      }
      let position = parse_operand(rest)?;
      Some(Operand::Variable(VariableRef::at(name, position)))
    }
    None => Some(Operand::variable(word)),
  }
}

struct Analyzer<'a> {
  stream: WordStream<'a>,
  expressions: Vec<Expression>,
  labels: LabelTable,
  has_entry_point: bool,
  depth: usize,
  /// Nesting depth at which the current `cersva` started.
  function_depth: Option<usize>,
  /// Header keyword still waiting for its `rinyv`.
  awaiting_block: Option<&'static str>,
}

impl<'a> Analyzer<'a> {
  fn new(stream: WordStream<'a>) -> Self {
    Self {
      stream,
      expressions: Vec::new(),
      labels: LabelTable::default(),
      has_entry_point: false,
      depth: 0,
      function_depth: None,
      awaiting_block: None,
    }
  }

  fn run(&mut self) -> CompileResult<()> {
    while let Some(word) = self.stream.advance() {
      if let Some(keyword) = self.awaiting_block
        && word.text != RINYV
      {
        return Err(self.stream.error_at(
          word.loc,
          AnalyzeErrorKind::MissingBlockOpener {
            keyword: keyword.to_string(),
            found: word.text,
          },
        ));
      }

      match word.text.as_str() {
        KUE => {
          self.forbid_function(&word)?;
          let label = self.stream.expect_word(KUE)?;
          self.labels.export(&label.text);
          self.expressions.push(Expression::Export { label: label.text });
        }
        XOK => {
          self.forbid_function(&word)?;
          let label = self.stream.expect_word(XOK)?;
          self.labels.import(&label.text);
          self.expressions.push(Expression::Import { label: label.text });
        }
        ANAX => self.declare_var(&word)?,
        FI => {
          let condition = self.condition(&word, FI)?;
          self.expressions.push(Expression::IfOnce(condition));
          self.awaiting_block = Some(FI);
        }
        FAL => {
          let condition = self.condition(&word, FAL)?;
          self.expressions.push(Expression::WhileTop(condition));
          self.awaiting_block = Some(FAL);
        }
        RINYV => self.open_block(&word)?,
        SITUV => self.close_block(&word)?,
        CERSVA => self.function_def(&word)?,
        DOSNUD => {
          self.require_function(&word)?;
          let value = self.operand_word(DOSNUD)?;
          self.expressions.push(Expression::Return { value });
        }
        FENXEO => self.call(&word)?,
        other => match Mnemonic::from_word(other) {
          Some(mnemonic) => self.raw_op(&word, mnemonic)?,
          None => {
            return Err(self.stream.error_at(
              word.loc,
              AnalyzeErrorKind::UnknownWord {
                word: word.text.clone(),
              },
            ));
          }
        },
      }
    }
    Ok(())
  }

  fn finish(self) -> CompileResult<Unit> {
    if let Some(keyword) = self.awaiting_block {
      return Err(self.stream.error_at_end(AnalyzeErrorKind::MissingBlockOpener {
        keyword: keyword.to_string(),
        found: describe_word(None),
      }));
    }
    if self.depth != 0 {
      return Err(
        self
          .stream
          .error_at_end(AnalyzeErrorKind::UnbalancedBlocks { open: self.depth }),
      );
    }
    Ok(Unit {
      expressions: self.expressions,
      labels: self.labels,
      has_entry_point: self.has_entry_point,
    })
  }

  fn require_function(&self, word: &Word) -> CompileResult<()> {
    if self.function_depth.is_none() {
      return Err(self.stream.error_at(
        word.loc,
        AnalyzeErrorKind::OutsideFunction {
          keyword: word.text.clone(),
        },
      ));
    }
    Ok(())
  }

  fn forbid_function(&self, word: &Word) -> CompileResult<()> {
    if self.function_depth.is_some() {
      return Err(self.stream.error_at(
        word.loc,
        AnalyzeErrorKind::InsideFunction {
          keyword: word.text.clone(),
        },
      ));
    }
    Ok(())
  }

  /// `anax name` or `anax name@length`.
  fn declare_var(&mut self, word: &Word) -> CompileResult<()> {
    self.require_function(word)?;
    let target = self.stream.expect_word(ANAX)?;

    let expression = match target.text.split_once('@') {
      Some((name, length)) => {
        let length = length.parse::<u32>().ok().filter(|len| *len > 0);
        match length {
          Some(length) if !name.is_empty() => Expression::DeclareVar {
            name: name.to_string(),
            pointer: true,
            length,
          },
          _ => {
            return Err(self.stream.error_at(
              target.loc,
              AnalyzeErrorKind::InvalidLength {
                word: target.text.clone(),
              },
            ));
          }
        }
      }
      None => Expression::DeclareVar {
        name: target.text,
        pointer: false,
        length: 1,
      },
    };

    self.expressions.push(expression);
    Ok(())
  }

  /// `<left> <compare> <right>` following `fi`/`fal`. The stored comparison is
  /// the complement of the written one, since the emitted branch skips the
  /// block when it holds.
  fn condition(&mut self, word: &Word, keyword: &'static str) -> CompileResult<Condition> {
    self.require_function(word)?;
    let left = self.stream.expect_word(keyword)?;
    let compare = self.stream.expect_word(keyword)?;
    let right = self.stream.expect_word(keyword)?;

    let Some(comparison) = Comparison::from_word(&compare.text) else {
      return Err(self.stream.error_at(
        compare.loc,
        AnalyzeErrorKind::UnknownComparison {
          keyword: keyword.to_string(),
          left: left.text,
          compare: compare.text.clone(),
          right: right.text,
        },
      ));
    };

    Ok(Condition {
      left: self.to_operand(&left)?,
      compare: comparison.complement(),
      right: self.to_operand(&right)?,
    })
  }

  fn open_block(&mut self, word: &Word) -> CompileResult<()> {
    if self.awaiting_block.take().is_none() {
      return Err(
        self
          .stream
          .error_at(word.loc, AnalyzeErrorKind::UnexpectedBlockOpener),
      );
    }
    self.depth += 1;
    self.expressions.push(Expression::OpenBlock { depth: self.depth });
    Ok(())
  }

  fn close_block(&mut self, word: &Word) -> CompileResult<()> {
    if self.depth == 0 {
      return Err(
        self
          .stream
          .error_at(word.loc, AnalyzeErrorKind::UnmatchedCloser),
      );
    }
    self.expressions.push(Expression::CloseBlock { depth: self.depth });
    self.depth -= 1;
    if self.function_depth == Some(self.depth) {
      self.function_depth = None;
    }
    Ok(())
  }

  /// `cersva name params... rinyv`. The `rinyv` is left for the main loop.
  fn function_def(&mut self, word: &Word) -> CompileResult<()> {
    self.forbid_function(word)?;
    let name = self.stream.expect_word(CERSVA)?;
    self.check_function_name(&name)?;
    if name.text == RESERVED_CALL_LITERAL {
      return Err(self.stream.error_at(
        name.loc,
        AnalyzeErrorKind::ReservedName {
          name: name.text.clone(),
        },
      ));
    }

    let Some(param_words) = self.stream.take_until(RINYV) else {
      return Err(self.stream.error_at(
        word.loc,
        AnalyzeErrorKind::MissingTerminator {
          keyword: CERSVA.to_string(),
          terminator: RINYV.to_string(),
        },
      ));
    };
    let params = param_words
      .iter()
      .map(|param| self.to_param(param))
      .collect::<CompileResult<Vec<_>>>()?;

    if name.text == ENTRY_POINT {
      self.has_entry_point = true;
    }
    self.expressions.push(Expression::FunctionDef {
      name: name.text,
      params,
    });
    self.function_depth = Some(self.depth);
    self.awaiting_block = Some(CERSVA);
    Ok(())
  }

  /// `fenxeo name args... el destination`.
  fn call(&mut self, word: &Word) -> CompileResult<()> {
    self.require_function(word)?;
    let name = self.stream.expect_word(FENXEO)?;
    self.check_function_name(&name)?;
    let function = if name.text == RESERVED_CALL_LITERAL {
      RESERVED_CALL_TARGET.to_string()
    } else {
      name.text
    };

    let Some(arg_words) = self.stream.take_until(EL) else {
      return Err(self.stream.error_at(
        word.loc,
        AnalyzeErrorKind::MissingTerminator {
          keyword: FENXEO.to_string(),
          terminator: EL.to_string(),
        },
      ));
    };
    let args = arg_words
      .iter()
      .map(|arg| self.to_operand(arg))
      .collect::<CompileResult<Vec<_>>>()?;

    self.stream.advance();
    let target = self.stream.expect_word(EL)?;
    let destination = if target.text == DISCARD {
      Destination::Discard
    } else {
      match self.to_operand(&target)? {
        Operand::Variable(var) => Destination::Variable(var),
        _ => {
          return Err(self.stream.error_at(
            target.loc,
            AnalyzeErrorKind::NotAVariable { word: target.text },
          ));
        }
      }
    };

    self.expressions.push(Expression::Call {
      function,
      args,
      destination,
    });
    Ok(())
  }

  fn raw_op(&mut self, word: &Word, mnemonic: Mnemonic) -> CompileResult<()> {
    self.require_function(word)?;
    let operands = (0..mnemonic.arity())
      .map(|_| self.operand_word(mnemonic.as_str()))
      .collect::<CompileResult<Vec<_>>>()?;
    self.expressions.push(Expression::RawOp { mnemonic, operands });
    Ok(())
  }

  fn operand_word(&mut self, keyword: &str) -> CompileResult<Operand> {
    let word = self.stream.expect_word(keyword)?;
    self.to_operand(&word)
  }

  fn to_operand(&self, word: &Word) -> CompileResult<Operand> {
    parse_operand(&word.text).ok_or_else(|| {
      self.stream.error_at(
        word.loc,
        AnalyzeErrorKind::InvalidOperand {
          word: word.text.clone(),
        },
      )
    })
  }

  /// A parameter word, with a trailing `@` marking a pointer.
  fn to_param(&self, word: &Word) -> CompileResult<Param> {
    let (name, pointer) = match word.text.strip_suffix('@') {
      Some(name) => (name, true),
      None => (word.text.as_str(), false),
    };
    let starts_with_digit = name.chars().next().is_none_or(|c| c.is_ascii_digit());
    if starts_with_digit || name.contains('@') {
      return Err(self.stream.error_at(
        word.loc,
        AnalyzeErrorKind::InvalidParameter {
          word: word.text.clone(),
        },
      ));
    }
    Ok(Param {
      name: name.to_string(),
      pointer,
    })
  }

  fn check_function_name(&self, name: &Word) -> CompileResult<()> {
    if name.text.starts_with(|c: char| c.is_ascii_digit()) {
      return Err(self.stream.error_at(
        name.loc,
        AnalyzeErrorKind::BadFunctionName {
          name: name.text.clone(),
        },
      ));
    }
    Ok(())
  }
}

/// Lightweight cursor over the word vector.
struct WordStream<'a> {
  words: Vec<Word>,
  file: &'a str,
  source: &'a str,
  pos: usize,
}

impl<'a> WordStream<'a> {
  fn new(words: Vec<Word>, file: &'a str, source: &'a str) -> Self {
    Self {
      words,
      file,
      source,
      pos: 0,
    }
  }

  fn advance(&mut self) -> Option<Word> {
    let word = self.words.get(self.pos).cloned();
    if word.is_some() {
      self.pos += 1;
    }
    word
  }

  /// Consume the word that `keyword` requires next.
  fn expect_word(&mut self, keyword: &str) -> CompileResult<Word> {
    self.advance().ok_or_else(|| {
      self.error_at_end(AnalyzeErrorKind::UnexpectedEnd {
        keyword: keyword.to_string(),
      })
    })
  }

  /// Consume the words before the next `terminator`, leaving the terminator
  /// itself unconsumed. Returns `None` if it never appears.
  fn take_until(&mut self, terminator: &str) -> Option<Vec<Word>> {
    let offset = self.words[self.pos..]
      .iter()
      .position(|word| word.text == terminator)?;
    let taken = self.words[self.pos..self.pos + offset].to_vec();
    self.pos += offset;
    Some(taken)
  }

  fn error_at(&self, loc: usize, kind: AnalyzeErrorKind) -> CompileError {
    CompileError::at(self.file, self.source, loc, kind)
  }

  fn error_at_end(&self, kind: AnalyzeErrorKind) -> CompileError {
    self.error_at(self.source.len(), kind)
  }
}
