//! SSA-stage intermediate representation.
//!
//! A function is an arena of blocks. Before mem2reg, locals live in stack
//! slots created by `alloca` and are accessed through `load`/`store`. After
//! mem2reg, promoted slots are gone and their values flow through phi nodes.

mod display;

use std::collections::BTreeMap;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use crate::cfg::{compact_ids, reachable, BlockId, FlowGraph};

/// An SSA value. Numbering is local to a function.
#[derive(
  Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Value(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumAsInner)]
pub enum Operand {
  Value(Value),
  Const(i64),
  /// Reads of a variable before any store reaches them.
  Undef,
}

impl From<Value> for Operand {
  fn from(v: Value) -> Self {
    Operand::Value(v)
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  And,
  Or,
  Xor,
  Shl,
  Shr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum CmpOp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inst {
  /// Reserves a stack slot; `dest` is its address.
  Alloca { dest: Value },
  Load { dest: Value, addr: Operand },
  Store { value: Operand, addr: Operand },
  Binary { op: BinOp, dest: Value, lhs: Operand, rhs: Operand },
  Cmp { op: CmpOp, dest: Value, lhs: Operand, rhs: Operand },
  Call { dest: Option<Value>, callee: String, args: Vec<Operand> },
}

impl Inst {
  pub fn def(&self) -> Option<Value> {
    match self {
      Inst::Alloca { dest }
      | Inst::Load { dest, .. }
      | Inst::Binary { dest, .. }
      | Inst::Cmp { dest, .. } => Some(*dest),
      Inst::Call { dest, .. } => *dest,
      Inst::Store { .. } => None,
    }
  }

  /// The memory operand of a load or store.
  pub fn address(&self) -> Option<&Operand> {
    match self {
      Inst::Load { addr, .. } | Inst::Store { addr, .. } => Some(addr),
      _ => None,
    }
  }

  /// Every operand that is read as a value, i.e. everything but the address
  /// of a load or store.
  pub fn value_operands(&self) -> Vec<&Operand> {
    match self {
      Inst::Alloca { .. } | Inst::Load { .. } => vec![],
      Inst::Store { value, .. } => vec![value],
      Inst::Binary { lhs, rhs, .. } | Inst::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
      Inst::Call { args, .. } => args.iter().collect(),
    }
  }

  pub fn operands(&self) -> Vec<&Operand> {
    let mut ops = self.value_operands();
    ops.extend(self.address());
    ops
  }

  pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
    match self {
      Inst::Alloca { .. } => vec![],
      Inst::Load { addr, .. } => vec![addr],
      Inst::Store { value, addr } => vec![value, addr],
      Inst::Binary { lhs, rhs, .. } | Inst::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
      Inst::Call { args, .. } => args.iter_mut().collect(),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
  Ret(Option<Operand>),
  Branch {
    cond: Operand,
    then: BlockId,
    els: BlockId,
  },
  Jump(BlockId),
}

impl Terminator {
  pub fn targets(&self) -> Vec<BlockId> {
    match self {
      Terminator::Ret(_) => vec![],
      Terminator::Branch { then, els, .. } => vec![*then, *els],
      Terminator::Jump(target) => vec![*target],
    }
  }

  pub fn targets_mut(&mut self) -> Vec<&mut BlockId> {
    match self {
      Terminator::Ret(_) => vec![],
      Terminator::Branch { then, els, .. } => vec![then, els],
      Terminator::Jump(target) => vec![target],
    }
  }

  pub fn operands(&self) -> Vec<&Operand> {
    match self {
      Terminator::Ret(value) => value.iter().collect(),
      Terminator::Branch { cond, .. } => vec![cond],
      Terminator::Jump(_) => vec![],
    }
  }

  pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
    match self {
      Terminator::Ret(value) => value.iter_mut().collect(),
      Terminator::Branch { cond, .. } => vec![cond],
      Terminator::Jump(_) => vec![],
    }
  }
}

/// Selects a value by the predecessor control arrived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phi {
  pub dest: Value,
  /// Keyed by predecessor block; the key set must equal the block's
  /// predecessor set.
  pub incoming: BTreeMap<BlockId, Operand>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
  pub name: String,
  #[serde(default)]
  pub phis: Vec<Phi>,
  #[serde(default)]
  pub insts: Vec<Inst>,
  pub term: Terminator,
}

impl Block {
  pub fn new(name: impl Into<String>, term: Terminator) -> Self {
    Block {
      name: name.into(),
      phis: vec![],
      insts: vec![],
      term,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
  pub name: String,
  #[serde(default)]
  pub params: Vec<Value>,
  pub blocks: Vec<Block>,
  #[serde(default)]
  next_value: u32,
}

impl Function {
  pub fn new(name: impl Into<String>) -> Self {
    Function {
      name: name.into(),
      params: vec![],
      blocks: vec![],
      next_value: 0,
    }
  }

  pub fn add_block(&mut self, name: impl Into<String>, term: Terminator) -> BlockId {
    self.blocks.push(Block::new(name, term));
    BlockId(self.blocks.len() - 1)
  }

  pub fn block(&self, id: BlockId) -> &Block {
    &self.blocks[id.0]
  }

  pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
    &mut self.blocks[id.0]
  }

  pub fn push(&mut self, block: BlockId, inst: Inst) {
    self.blocks[block.0].insts.push(inst);
  }

  pub fn add_param(&mut self) -> Value {
    let v = self.fresh_value();
    self.params.push(v);
    v
  }

  /// A value never used before in this function.
  pub fn fresh_value(&mut self) -> Value {
    let v = Value(self.next_value);
    self.next_value += 1;
    v
  }

  /// Moves the value counter past every value already defined, for functions
  /// that were deserialized or assembled by hand.
  pub fn reserve_values(&mut self) {
    let mut max = self.next_value;
    let defs = self.params.iter().copied().chain(self.blocks.iter().flat_map(|b| {
      b.phis
        .iter()
        .map(|p| p.dest)
        .chain(b.insts.iter().filter_map(Inst::def))
    }));
    for v in defs {
      max = max.max(v.0 + 1);
    }
    self.next_value = max;
  }

  /// Drops every block not reachable from the entry and renumbers the rest.
  /// Phi entries keyed by a dropped predecessor are removed with it.
  pub fn remove_unreachable(&mut self) -> usize {
    let keep = reachable(self);
    let removed = keep.iter().filter(|k| !**k).count();
    if removed == 0 {
      return 0;
    }

    let map = compact_ids(&keep);
    let old = std::mem::take(&mut self.blocks);
    for (i, mut block) in old.into_iter().enumerate() {
      if !keep[i] {
        continue;
      }
      for target in block.term.targets_mut() {
        *target = map[target.0]
          .unwrap_or_else(|| panic!("reachable block {} jumps to a dropped block", block.name));
      }
      for phi in block.phis.iter_mut() {
        phi.incoming = std::mem::take(&mut phi.incoming)
          .into_iter()
          .filter_map(|(pred, v)| map.get(pred.0).copied().flatten().map(|p| (p, v)))
          .collect();
      }
      self.blocks.push(block);
    }
    log::debug!("{}: removed {} unreachable blocks", self.name, removed);
    removed
  }
}

impl FlowGraph for Function {
  fn num_blocks(&self) -> usize {
    self.blocks.len()
  }

  fn successors(&self, block: BlockId) -> Vec<BlockId> {
    self.blocks[block.0].term.targets()
  }
}
