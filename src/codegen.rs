//! Code generation: lower the expression list into 2003lk assembly.
//!
//! Every variable lives in 4-byte cells on a downward-growing stack whose top
//! is held in `f5`. The generator keeps count of the live cells, so a
//! reference with a constant element offset becomes a fixed `f5+N@` address.
//! Only offsets that depend on run-time values need scratch-register
//! arithmetic, which is returned separately as a prelude that must run before
//! the instruction using the address.
//!
//! Calling convention: the caller pushes the arguments in order, then one
//! more cell that `inj` fills with the return address before jumping to the
//! callee. The callee returns through that cell and the caller releases all
//! pushed cells. Results travel in `f0`.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::ast::{Condition, Destination, Expression, Mnemonic, Operand, VariableRef};
use crate::error::{CompileError, CompileResult, GenerateErrorKind};

/// Size of a stack cell in bytes.
pub const CELL_SIZE: u64 = 4;

/// `dro` shift amount equivalent to multiplying by [`CELL_SIZE`].
const CELL_SHIFT: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
  F0,
  F1,
  F5,
  Xx,
}

impl fmt::Display for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::F0 => "f0",
      Self::F1 => "f1",
      Self::F5 => "f5",
      Self::Xx => "xx",
    })
  }
}

/// Stack pointer; every variable is addressed relative to it.
pub const FRAME: Register = Register::F5;
/// Holds call results and return values.
pub const RESULT: Register = Register::F0;
/// Address arithmetic for dynamic element offsets.
pub const PRIMARY_SCRATCH: Register = Register::F0;
/// Left-hand side of comparisons and call destinations.
pub const SECONDARY_SCRATCH: Register = Register::F1;
const PC: Register = Register::Xx;

/// An operand ready for use: its textual value plus the instructions that
/// must be emitted before the value is referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
  pub value: String,
  pub prelude: Vec<String>,
}

impl Resolved {
  fn immediate(value: String) -> Self {
    Self {
      value,
      prelude: Vec::new(),
    }
  }

  pub fn needs_prelude(&self) -> bool {
    !self.prelude.is_empty()
  }
}

/// Labels of blocks that are still open, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockLabel {
  If(u32),
  WhileHead(u32),
  WhileExit(u32),
  /// Function sentinel, closed by the function's final `situv`.
  Function { name: String, ordinal: u32 },
}

impl fmt::Display for BlockLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::If(n) => write!(f, "fi{n}"),
      Self::WhileHead(n) => write!(f, "fal-rinyv{n}"),
      Self::WhileExit(n) => write!(f, "fal{n}"),
      Self::Function { name, .. } => f.write_str(name),
    }
  }
}

/// Exit label of the function with the given ordinal; 0 is the top level.
pub fn exit_label(ordinal: u32) -> String {
  format!("dosnud{ordinal}")
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LabelCounters {
  fi: u32,
  while_head: u32,
  while_exit: u32,
  function: u32,
}

impl LabelCounters {
  fn next(counter: &mut u32) -> u32 {
    let n = *counter;
    *counter += 1;
    n
  }
}

/// Output buffer, one instruction per line.
#[derive(Debug, Default)]
pub struct Asm {
  text: String,
}

impl Asm {
  fn line(&mut self, line: impl AsRef<str>) {
    self.text.push_str(line.as_ref());
    self.text.push('\n');
  }

  fn lines(&mut self, lines: &[String]) {
    for line in lines {
      self.line(line);
    }
  }

  pub fn as_str(&self) -> &str {
    &self.text
  }

  pub fn into_string(self) -> String {
    self.text
  }
}

/// Everything the single emission pass mutates.
#[derive(Debug, Default)]
pub struct GeneratorState {
  /// Live cells in the current frame.
  height: u64,
  /// Cells owned by the caller: parameters plus the return cell.
  frame_size: u64,
  /// Variable name to the stack height right after its allocation.
  symbols: HashMap<String, u64>,
  labels: Vec<BlockLabel>,
  counters: LabelCounters,
  /// Ordinal of the function being emitted.
  function: Option<u32>,
  /// Cells the current function body allocates in total, which is what its
  /// exit releases.
  function_cells: u64,
  top_level_return: bool,
}

/// Lower a complete program.
pub fn generate(expressions: &[Expression]) -> CompileResult<String> {
  let mut state = GeneratorState::default();
  let mut asm = Asm::default();
  for (index, expression) in expressions.iter().enumerate() {
    if let Expression::FunctionDef { .. } = expression {
      state.function_cells = declared_cells(&expressions[index + 1..]);
    }
    state.lower(expression, &mut asm)?;
  }
  state.finish(&mut asm)?;
  debug!(
    "generated {} lines from {} expressions",
    asm.as_str().lines().count(),
    expressions.len()
  );
  Ok(asm.into_string())
}

impl GeneratorState {
  pub fn height(&self) -> u64 {
    self.height
  }

  pub fn frame_size(&self) -> u64 {
    self.frame_size
  }

  pub fn open_labels(&self) -> &[BlockLabel] {
    &self.labels
  }

  /// Emit the instructions for one expression.
  pub fn lower(&mut self, expression: &Expression, asm: &mut Asm) -> CompileResult<()> {
    match expression {
      Expression::Export { label } => asm.line(format!("kue {label}")),
      Expression::Import { label } => asm.line(format!("xok {label}")),
      Expression::DeclareVar { name, length, .. } => {
        let length = u64::from(*length);
        self.height += length;
        self.symbols.insert(name.clone(), self.height);
        asm.line(format!("nta {} {FRAME}", length * CELL_SIZE));
      }
      Expression::IfOnce(condition) => {
        self.compare(condition, asm)?;
        let n = LabelCounters::next(&mut self.counters.fi);
        self.labels.push(BlockLabel::If(n));
      }
      Expression::WhileTop(condition) => {
        let head = BlockLabel::WhileHead(LabelCounters::next(&mut self.counters.while_head));
        asm.line(format!("nll {head}"));
        self.compare(condition, asm)?;
        let exit = LabelCounters::next(&mut self.counters.while_exit);
        self.labels.push(head);
        self.labels.push(BlockLabel::WhileExit(exit));
      }
      Expression::OpenBlock { .. } => self.open_block(asm)?,
      Expression::CloseBlock { .. } => self.close_block(asm)?,
      Expression::FunctionDef { name, params } => {
        self.height = 0;
        self.symbols.clear();
        for param in params {
          self.height += 1;
          self.symbols.insert(param.name.clone(), self.height);
        }
        // Return cell pushed by the caller and filled by `inj`.
        self.height += 1;
        self.frame_size = self.height;

        self.counters.function += 1;
        let ordinal = self.counters.function;
        self.function = Some(ordinal);
        asm.line(format!("nll {name}"));
        self.labels.push(BlockLabel::Function {
          name: name.clone(),
          ordinal,
        });
      }
      Expression::Return { value } => {
        let resolved = self.resolve_operand(value, 0, PRIMARY_SCRATCH)?;
        asm.lines(&resolved.prelude);
        asm.line(format!("krz {} {RESULT}", resolved.value));
        let ordinal = match self.function {
          Some(ordinal) => {
            // The exit releases every cell of the body; allocate the ones
            // not declared yet so the release matches.
            let missing = self.function_cells.saturating_sub(self.height - self.frame_size);
            if missing > 0 {
              asm.line(format!("nta {} {FRAME}", missing * CELL_SIZE));
            }
            ordinal
          }
          None => {
            self.top_level_return = true;
            0
          }
        };
        asm.line(format!("krz {} {PC}", exit_label(ordinal)));
      }
      Expression::Call {
        function,
        args,
        destination,
      } => self.call(function, args, destination, asm)?,
      Expression::RawOp { mnemonic, operands } => self.raw_op(*mnemonic, operands, asm)?,
    }
    Ok(())
  }

  /// Close the program: every block must be closed, and a top-level return
  /// needs the `dosnud0` exit it jumps to.
  pub fn finish(&mut self, asm: &mut Asm) -> CompileResult<()> {
    if !self.labels.is_empty() {
      return Err(CompileError::generate(GenerateErrorKind::UnclosedBlocks {
        open: self.labels.len(),
      }));
    }
    if self.top_level_return {
      asm.line(format!("nll {}", exit_label(0)));
      if self.height > 0 {
        asm.line(format!("ata {} {FRAME}", self.height * CELL_SIZE));
      }
      asm.line(format!("krz {FRAME}@ {PC}"));
    }
    Ok(())
  }

  /// Resolve an operand for use `count` cells above the current stack top.
  ///
  /// `count` biases the offset for values that are read after the stack has
  /// grown, such as call arguments. Dynamic offsets are computed in
  /// `scratch`.
  pub fn resolve_operand(
    &self,
    operand: &Operand,
    count: u64,
    scratch: Register,
  ) -> CompileResult<Resolved> {
    match operand {
      Operand::Constant(text) => Ok(Resolved::immediate(text.clone())),
      Operand::Variable(var) => self.resolve_variable(var, count, scratch),
      Operand::Function(_) => Err(CompileError::generate(GenerateErrorKind::NotAddressable {
        operand: operand.to_string(),
      })),
    }
  }

  fn resolve_variable(
    &self,
    var: &VariableRef,
    count: u64,
    scratch: Register,
  ) -> CompileResult<Resolved> {
    let declared = self.symbols.get(&var.name).copied().ok_or_else(|| {
      CompileError::generate(GenerateErrorKind::UndefinedVariable {
        name: var.name.clone(),
      })
    })?;
    let out_of_range = || {
      CompileError::generate(GenerateErrorKind::InvalidPosition {
        operand: var.to_string(),
      })
    };
    let base = (self.height + count)
      .checked_sub(declared)
      .ok_or_else(out_of_range)?;

    match var.position.as_ref() {
      Operand::Constant(text) => {
        let offset = text
          .parse::<u64>()
          .ok()
          .and_then(|position| base.checked_add(position))
          .and_then(|cells| cells.checked_mul(CELL_SIZE))
          .ok_or_else(out_of_range)?;
        Ok(Resolved::immediate(format!("{FRAME}+{offset}@")))
      }
      position => {
        let inner = self.resolve_operand(position, count, scratch)?;
        let mut prelude = inner.prelude;
        prelude.push(format!("krz {} {scratch}", inner.value));
        prelude.push(format!("ata {base} {scratch}"));
        prelude.push(format!("dro {CELL_SHIFT} {scratch}"));
        Ok(Resolved {
          value: format!("{FRAME}+{scratch}@"),
          prelude,
        })
      }
    }
  }

  /// Shared head of `fi` and `fal`: set the flag when the (complemented)
  /// comparison holds.
  fn compare(&self, condition: &Condition, asm: &mut Asm) -> CompileResult<()> {
    let left = self.resolve_operand(&condition.left, 0, PRIMARY_SCRATCH)?;
    asm.lines(&left.prelude);
    asm.line(format!("krz {} {SECONDARY_SCRATCH}", left.value));
    let right = self.resolve_operand(&condition.right, 0, PRIMARY_SCRATCH)?;
    asm.lines(&right.prelude);
    asm.line(format!(
      "fi {SECONDARY_SCRATCH} {} {}",
      right.value, condition.compare
    ));
    Ok(())
  }

  fn open_block(&mut self, asm: &mut Asm) -> CompileResult<()> {
    match self.labels.last() {
      Some(label @ (BlockLabel::If(_) | BlockLabel::WhileExit(_))) => {
        asm.line(format!("malkrz {label} {PC}"));
        Ok(())
      }
      Some(BlockLabel::Function { .. }) => Ok(()),
      Some(BlockLabel::WhileHead(_)) | None => {
        Err(CompileError::generate(GenerateErrorKind::UnmatchedBlock))
      }
    }
  }

  fn close_block(&mut self, asm: &mut Asm) -> CompileResult<()> {
    let unmatched = || CompileError::generate(GenerateErrorKind::UnmatchedBlock);
    match self.labels.pop().ok_or_else(unmatched)? {
      label @ BlockLabel::If(_) => asm.line(format!("nll {label}")),
      exit @ BlockLabel::WhileExit(_) => {
        let Some(head @ BlockLabel::WhileHead(_)) = self.labels.pop() else {
          return Err(unmatched());
        };
        asm.line(format!("krz {head} {PC}"));
        asm.line(format!("nll {exit}"));
      }
      BlockLabel::Function { ordinal, .. } => self.close_function(ordinal, asm),
      BlockLabel::WhileHead(_) => return Err(unmatched()),
    }
    Ok(())
  }

  /// Release the locals and jump back through the return cell.
  fn close_function(&mut self, ordinal: u32, asm: &mut Asm) {
    asm.line(format!("nll {}", exit_label(ordinal)));
    let locals = self.height - self.frame_size;
    if locals > 0 {
      asm.line(format!("ata {} {FRAME}", locals * CELL_SIZE));
    }
    asm.line(format!("krz {FRAME}@ {PC}"));

    self.height = 0;
    self.frame_size = 0;
    self.symbols.clear();
    self.function = None;
    self.function_cells = 0;
  }

  fn call(
    &mut self,
    function: &str,
    args: &[Operand],
    destination: &Destination,
    asm: &mut Asm,
  ) -> CompileResult<()> {
    for (index, arg) in args.iter().enumerate() {
      let resolved = self.resolve_operand(arg, index as u64 + 1, PRIMARY_SCRATCH)?;
      self.push(&resolved, asm);
    }

    asm.line(format!("nta {CELL_SIZE} {FRAME}"));
    asm.line(format!("inj {function} {PC} {FRAME}@"));
    asm.line(format!(
      "ata {} {FRAME}",
      (args.len() as u64 + 1) * CELL_SIZE
    ));

    if let Destination::Variable(var) = destination {
      let resolved = self.resolve_variable(var, 0, SECONDARY_SCRATCH)?;
      asm.lines(&resolved.prelude);
      asm.line(format!("krz {RESULT} {}", resolved.value));
    }
    Ok(())
  }

  /// Grow the stack by one cell and store `resolved` there. The cell is
  /// reserved before the prelude runs, so `resolved` must already be biased
  /// for it.
  fn push(&self, resolved: &Resolved, asm: &mut Asm) {
    asm.line(format!("nta {CELL_SIZE} {FRAME}"));
    asm.lines(&resolved.prelude);
    asm.line(format!("krz {} {FRAME}@", resolved.value));
  }

  /// Emit a passthrough instruction.
  ///
  /// Only two scratch registers are free, so when several operands need
  /// address arithmetic, all but the last are evaluated first and pushed into
  /// temporary cells that the instruction then reads directly. A temporary
  /// cell the instruction writes is copied back to its variable before the
  /// cells are released.
  fn raw_op(&mut self, mnemonic: Mnemonic, operands: &[Operand], asm: &mut Asm) -> CompileResult<()> {
    let dynamic: Vec<usize> = operands
      .iter()
      .enumerate()
      .filter(|(_, operand)| needs_address_arithmetic(operand))
      .map(|(index, _)| index)
      .collect();
    let spill: &[usize] = match dynamic.split_last() {
      Some((_, rest)) => rest,
      None => &[],
    };

    let mut spilled = 0u64;
    let mut slots: Vec<Option<u64>> = vec![None; operands.len()];
    for &index in spill {
      spilled += 1;
      let resolved = self.resolve_operand(&operands[index], spilled, PRIMARY_SCRATCH)?;
      self.push(&resolved, asm);
      slots[index] = Some(spilled);
    }

    let mut values = Vec::with_capacity(operands.len());
    for (operand, slot) in operands.iter().zip(&slots) {
      let value = match slot {
        Some(slot) => format!("{FRAME}+{}@", (spilled - slot) * CELL_SIZE),
        None => {
          let resolved = self.resolve_operand(operand, spilled, PRIMARY_SCRATCH)?;
          asm.lines(&resolved.prelude);
          resolved.value
        }
      };
      values.push(value);
    }
    asm.line(format!("{mnemonic} {}", values.join(" ")));

    for (index, slot) in slots.iter().enumerate() {
      if let Some(slot) = slot
        && mnemonic.writes(index)
      {
        let target = self.resolve_operand(&operands[index], spilled, PRIMARY_SCRATCH)?;
        asm.lines(&target.prelude);
        asm.line(format!(
          "krz {FRAME}+{}@ {}",
          (spilled - slot) * CELL_SIZE,
          target.value
        ));
      }
    }

    if spilled > 0 {
      asm.line(format!("ata {} {FRAME}", spilled * CELL_SIZE));
    }
    Ok(())
  }
}

/// Cells declared by the function body starting at `body[0]`, up to the
/// `situv` that closes it.
fn declared_cells(body: &[Expression]) -> u64 {
  let mut opened = None;
  let mut cells = 0;
  for expression in body {
    match expression {
      Expression::OpenBlock { depth } if opened.is_none() => opened = Some(*depth),
      Expression::CloseBlock { depth } if opened == Some(*depth) => break,
      Expression::DeclareVar { length, .. } => cells += u64::from(*length),
      _ => {}
    }
  }
  cells
}

/// Whether resolving `operand` needs scratch-register arithmetic.
fn needs_address_arithmetic(operand: &Operand) -> bool {
  match operand {
    Operand::Variable(var) => !var.position.is_constant(),
    Operand::Constant(_) | Operand::Function(_) => false,
  }
}
