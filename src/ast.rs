//! Tinka's abstract syntax.
//!
//! A program is a flat list of [`Expression`]s; blocks are delimited by
//! explicit open/close markers instead of nesting in the tree, which is how
//! the language itself is written. Both [`Expression`] and [`Operand`] are
//! closed sets, so the generator's exhaustive matches must be revisited
//! whenever a variant is added.

use std::collections::BTreeMap;
use std::fmt;

/// Function name that marks the program entry point.
pub const ENTRY_POINT: &str = "_fasal";

/// Source spelling of the reserved call target.
pub const RESERVED_CALL_LITERAL: &str = "'3126834864";

/// Name the reserved call target is emitted as.
pub const RESERVED_CALL_TARGET: &str = "3126834864";

/// A value source or sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  /// Non-negative integer literal, kept as written.
  Constant(String),
  Variable(VariableRef),
  /// Only valid as a call target; never addressable.
  Function(String),
}

impl Operand {
  pub fn constant(text: impl Into<String>) -> Self {
    Self::Constant(text.into())
  }

  pub fn variable(name: impl Into<String>) -> Self {
    Self::Variable(VariableRef::new(name))
  }

  pub fn zero() -> Self {
    Self::constant("0")
  }

  pub fn is_constant(&self) -> bool {
    matches!(self, Self::Constant(_))
  }
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Constant(text) => f.write_str(text),
      Self::Variable(var) => write!(f, "{var}"),
      Self::Function(name) => f.write_str(name),
    }
  }
}

/// Reference to a declared variable, optionally offset by `position` cells.
///
/// A non-constant position is evaluated at run time, which is how arrays and
/// one level of indirection are expressed (`x@i`, `x@y@3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
  pub name: String,
  pub position: Box<Operand>,
}

impl VariableRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self::at(name, Operand::zero())
  }

  pub fn at(name: impl Into<String>, position: Operand) -> Self {
    Self {
      name: name.into(),
      position: Box::new(position),
    }
  }
}

impl fmt::Display for VariableRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.position.as_ref() {
      Operand::Constant(text) if text == "0" => f.write_str(&self.name),
      position => write!(f, "{}@{position}", self.name),
    }
  }
}

/// Where a call stores its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
  Discard,
  Variable(VariableRef),
}

/// Relational words of the target's `fi` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
  Xtlo,
  Xylo,
  Clo,
  Niv,
  Llo,
  Xolo,
  Xtlonys,
  Xylonys,
  Llonys,
  Xolonys,
}

impl Comparison {
  pub const ALL: [Comparison; 10] = [
    Self::Xtlo,
    Self::Xylo,
    Self::Clo,
    Self::Niv,
    Self::Llo,
    Self::Xolo,
    Self::Xtlonys,
    Self::Xylonys,
    Self::Llonys,
    Self::Xolonys,
  ];

  pub fn from_word(word: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|cmp| cmp.as_str() == word)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Xtlo => "xtlo",
      Self::Xylo => "xylo",
      Self::Clo => "clo",
      Self::Niv => "niv",
      Self::Llo => "llo",
      Self::Xolo => "xolo",
      Self::Xtlonys => "xtlonys",
      Self::Xylonys => "xylonys",
      Self::Llonys => "llonys",
      Self::Xolonys => "xolonys",
    }
  }

  /// The relation that holds exactly when `self` does not.
  pub fn complement(self) -> Self {
    match self {
      Self::Xtlo => Self::Llo,
      Self::Llo => Self::Xtlo,
      Self::Xylo => Self::Xolo,
      Self::Xolo => Self::Xylo,
      Self::Clo => Self::Niv,
      Self::Niv => Self::Clo,
      Self::Xtlonys => Self::Llonys,
      Self::Llonys => Self::Xtlonys,
      Self::Xylonys => Self::Xolonys,
      Self::Xolonys => Self::Xylonys,
    }
  }
}

impl fmt::Display for Comparison {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Header of an `fi`/`fal` block. `compare` is already complemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
  pub left: Operand,
  pub compare: Comparison,
  pub right: Operand,
}

/// Target instructions that may be written directly in Tinka source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
  Nac,
  Krz,
  KRz,
  Ata,
  Nta,
  Kak,
  Ada,
  Ekc,
  Dal,
  Dto,
  Dro,
  DRo,
  Dtosna,
  Lat,
  Latsna,
}

impl Mnemonic {
  pub const ALL: [Mnemonic; 15] = [
    Self::Nac,
    Self::Krz,
    Self::KRz,
    Self::Ata,
    Self::Nta,
    Self::Kak,
    Self::Ada,
    Self::Ekc,
    Self::Dal,
    Self::Dto,
    Self::Dro,
    Self::DRo,
    Self::Dtosna,
    Self::Lat,
    Self::Latsna,
  ];

  pub fn from_word(word: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|m| m.as_str() == word)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Nac => "nac",
      Self::Krz => "krz",
      Self::KRz => "kRz",
      Self::Ata => "ata",
      Self::Nta => "nta",
      Self::Kak => "kak",
      Self::Ada => "ada",
      Self::Ekc => "ekc",
      Self::Dal => "dal",
      Self::Dto => "dto",
      Self::Dro => "dro",
      Self::DRo => "dRo",
      Self::Dtosna => "dtosna",
      Self::Lat => "lat",
      Self::Latsna => "latsna",
    }
  }

  /// Number of operands the instruction takes.
  pub fn arity(self) -> usize {
    match self {
      Self::Nac => 1,
      Self::Lat | Self::Latsna => 3,
      _ => 2,
    }
  }

  /// Whether the operand at `index` is a destination of the instruction.
  pub fn writes(self, index: usize) -> bool {
    match self {
      Self::Nac => index == 0,
      Self::Lat | Self::Latsna => index >= 1,
      _ => index == 1,
    }
  }
}

impl fmt::Display for Mnemonic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A `cersva` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
  pub name: String,
  /// Parsed from a trailing `@` but not consulted by code generation.
  pub pointer: bool,
}

/// One instruction of the AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
  Export {
    label: String,
  },
  Import {
    label: String,
  },
  DeclareVar {
    name: String,
    pointer: bool,
    length: u32,
  },
  IfOnce(Condition),
  WhileTop(Condition),
  /// `depth` is the nesting level after opening.
  OpenBlock {
    depth: usize,
  },
  /// `depth` is the nesting level being closed.
  CloseBlock {
    depth: usize,
  },
  FunctionDef {
    name: String,
    params: Vec<Param>,
  },
  Return {
    value: Operand,
  },
  Call {
    function: String,
    args: Vec<Operand>,
    destination: Destination,
  },
  RawOp {
    mnemonic: Mnemonic,
    operands: Vec<Operand>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Exported,
  Imported,
}

/// Visibility of every label named by `kue`/`xok`.
///
/// An export always wins; importing an exported label or importing twice
/// leaves the entry unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  entries: BTreeMap<String, Visibility>,
}

impl LabelTable {
  pub fn export(&mut self, label: &str) {
    self
      .entries
      .insert(label.to_string(), Visibility::Exported);
  }

  pub fn import(&mut self, label: &str) {
    self
      .entries
      .entry(label.to_string())
      .or_insert(Visibility::Imported);
  }

  pub fn get(&self, label: &str) -> Option<Visibility> {
    self.entries.get(label).copied()
  }

  pub fn merge(&mut self, other: &LabelTable) {
    for (label, visibility) in other.iter() {
      match visibility {
        Visibility::Exported => self.export(label),
        Visibility::Imported => self.import(label),
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, Visibility)> {
    self
      .entries
      .iter()
      .map(|(label, visibility)| (label.as_str(), *visibility))
  }

  /// Labels that are imported but exported by no unit seen so far.
  pub fn unresolved(&self) -> impl Iterator<Item = &str> {
    self
      .iter()
      .filter(|(_, visibility)| *visibility == Visibility::Imported)
      .map(|(label, _)| label)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn complement_is_an_involution() {
    for cmp in Comparison::ALL {
      assert_ne!(cmp.complement(), cmp);
      assert_eq!(cmp.complement().complement(), cmp);
    }
  }

  #[test]
  fn complement_is_injective() {
    let mut seen: Vec<Comparison> = Comparison::ALL.iter().map(|c| c.complement()).collect();
    seen.sort_by_key(|c| c.as_str());
    seen.dedup();
    assert_eq!(seen.len(), Comparison::ALL.len());
  }

  #[test]
  fn comparison_words_round_trip() {
    for cmp in Comparison::ALL {
      assert_eq!(Comparison::from_word(cmp.as_str()), Some(cmp));
    }
    assert_eq!(Comparison::from_word("<="), None);
  }

  #[test]
  fn mnemonic_arities() {
    assert_eq!(Mnemonic::from_word("nac").map(Mnemonic::arity), Some(1));
    assert_eq!(Mnemonic::from_word("kRz").map(Mnemonic::arity), Some(2));
    assert_eq!(Mnemonic::from_word("latsna").map(Mnemonic::arity), Some(3));
    assert_eq!(Mnemonic::from_word("KRZ"), None);
  }

  #[test]
  fn written_operands() {
    assert!(Mnemonic::Nac.writes(0));
    assert!(!Mnemonic::Krz.writes(0));
    assert!(Mnemonic::Krz.writes(1));
    assert!(!Mnemonic::Lat.writes(0));
    assert!(Mnemonic::Lat.writes(1));
    assert!(Mnemonic::Latsna.writes(2));
  }

  #[test]
  fn operand_display() {
    let nested = Operand::Variable(VariableRef::at(
      "x",
      Operand::Variable(VariableRef::at("y", Operand::constant("3"))),
    ));
    assert_eq!(nested.to_string(), "x@y@3");
    assert_eq!(Operand::variable("z").to_string(), "z");
  }

  #[test]
  fn export_wins_over_import() {
    let mut table = LabelTable::default();
    assert!(table.is_empty());
    table.import("f");
    table.import("f");
    assert_eq!(table.get("f"), Some(Visibility::Imported));
    table.export("f");
    table.import("f");
    assert_eq!(table.get("f"), Some(Visibility::Exported));
    assert_eq!(table.len(), 1);
    assert!(!table.is_empty());
  }

  #[test]
  fn merge_resolves_imports() {
    let mut caller = LabelTable::default();
    caller.import("g");
    caller.import("h");
    let mut callee = LabelTable::default();
    callee.export("g");
    caller.merge(&callee);
    assert_eq!(caller.unresolved().collect::<Vec<_>>(), ["h"]);
  }
}
