//! Machine-stage code: RV32 instructions over virtual and physical registers.
//!
//! Every instruction exposes its uses and defs through exhaustive matching, so
//! liveness, allocation and spill rewriting never need per-opcode knowledge.

use std::collections::BTreeSet;
use std::fmt::{Display, Error, Formatter};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use crate::cfg::{BlockId, FlowGraph};
use crate::registers::consts::{CALLER_SAVED, STACK_ALIGN, WORD_SIZE};
use crate::registers::PhysReg;

/// A stack slot of the current frame.
#[derive(
  Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SlotId(pub usize);

#[derive(
  Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumAsInner,
)]
pub enum Register {
  /// To be colored by the allocator.
  Virtual(u32),
  /// Fixed physical register, never recolored or spilled.
  Precolored(PhysReg),
  /// Bound to a stack slot. Only exists inside the spill rewriter.
  Spilled(SlotId),
}

impl Register {
  pub const ZERO: Register = Register::Precolored(PhysReg::Zero);
  pub const SP: Register = Register::Precolored(PhysReg::Sp);
  pub const RA: Register = Register::Precolored(PhysReg::Ra);

  pub const fn arg(i: u8) -> Register {
    Register::Precolored(PhysReg::ith_argument(i))
  }

  /// Liveness and interference ignore zero and sp.
  pub fn is_tracked(&self) -> bool {
    match self {
      Register::Precolored(reg) => !reg.is_untracked(),
      _ => true,
    }
  }
}

impl From<PhysReg> for Register {
  fn from(reg: PhysReg) -> Self {
    Register::Precolored(reg)
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumAsInner)]
pub enum Address {
  Based { base: Register, offset: i32 },
  /// Resolved against sp once the frame size is known.
  Slot(SlotId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AluOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  And,
  Or,
  Xor,
  Sll,
  Sra,
  Slt,
  Sltu,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ImmOp {
  Addi,
  Andi,
  Ori,
  Xori,
  Slli,
  Srai,
  Slti,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ZeroCmp {
  Seqz,
  Snez,
  Sltz,
  Sgtz,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum BranchOp {
  Beq,
  Bne,
  Blt,
  Bge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
  Li {
    dest: Register,
    imm: i32,
  },
  La {
    dest: Register,
    symbol: String,
  },
  Load {
    dest: Register,
    addr: Address,
  },
  Store {
    src: Register,
    addr: Address,
  },
  Move {
    dest: Register,
    src: Register,
  },
  Calc {
    op: AluOp,
    dest: Register,
    lhs: Register,
    rhs: Register,
  },
  CalcI {
    op: ImmOp,
    dest: Register,
    lhs: Register,
    imm: i32,
  },
  CmpZ {
    op: ZeroCmp,
    dest: Register,
    src: Register,
  },
  /// Arguments are already in a0..a(argc-1).
  Call {
    callee: String,
    argc: u8,
  },
  /// Prologue stack adjustment.
  SpGrow,
  /// Epilogue stack adjustment.
  SpRecover,
}

impl Instr {
  pub fn uses(&self) -> Vec<Register> {
    match self {
      Instr::Li { .. } | Instr::La { .. } => vec![],
      Instr::Load { addr, .. } => address_uses(addr),
      Instr::Store { src, addr } => {
        let mut uses = vec![*src];
        uses.extend(address_uses(addr));
        uses
      }
      Instr::Move { src, .. } | Instr::CmpZ { src, .. } => vec![*src],
      Instr::Calc { lhs, rhs, .. } => vec![*lhs, *rhs],
      Instr::CalcI { lhs, .. } => vec![*lhs],
      Instr::Call { argc, .. } => (0..*argc).map(Register::arg).collect(),
      Instr::SpGrow | Instr::SpRecover => vec![Register::SP],
    }
  }

  pub fn defs(&self) -> Vec<Register> {
    match self {
      Instr::Li { dest, .. }
      | Instr::La { dest, .. }
      | Instr::Load { dest, .. }
      | Instr::Move { dest, .. }
      | Instr::Calc { dest, .. }
      | Instr::CalcI { dest, .. }
      | Instr::CmpZ { dest, .. } => vec![*dest],
      Instr::Store { .. } => vec![],
      Instr::Call { .. } => CALLER_SAVED.iter().map(|&r| r.into()).collect(),
      Instr::SpGrow | Instr::SpRecover => vec![Register::SP],
    }
  }

  /// Explicit use operands. Implicit ones (call arguments, sp) are fixed
  /// physical registers and are not rewritable.
  pub fn uses_mut(&mut self) -> Vec<&mut Register> {
    match self {
      Instr::Li { .. } | Instr::La { .. } => vec![],
      Instr::Load { addr, .. } => address_uses_mut(addr),
      Instr::Store { src, addr } => {
        let mut uses = vec![src];
        uses.extend(address_uses_mut(addr));
        uses
      }
      Instr::Move { src, .. } | Instr::CmpZ { src, .. } => vec![src],
      Instr::Calc { lhs, rhs, .. } => vec![lhs, rhs],
      Instr::CalcI { lhs, .. } => vec![lhs],
      Instr::Call { .. } | Instr::SpGrow | Instr::SpRecover => vec![],
    }
  }

  pub fn defs_mut(&mut self) -> Vec<&mut Register> {
    match self {
      Instr::Li { dest, .. }
      | Instr::La { dest, .. }
      | Instr::Load { dest, .. }
      | Instr::Move { dest, .. }
      | Instr::Calc { dest, .. }
      | Instr::CalcI { dest, .. }
      | Instr::CmpZ { dest, .. } => vec![dest],
      Instr::Store { .. } | Instr::Call { .. } | Instr::SpGrow | Instr::SpRecover => vec![],
    }
  }

  pub fn map_registers(&mut self, mut f: impl FnMut(Register) -> Register) {
    for reg in self.uses_mut() {
      *reg = f(*reg);
    }
    for reg in self.defs_mut() {
      *reg = f(*reg);
    }
  }

  pub fn is_move(&self) -> bool {
    matches!(self, Instr::Move { .. })
  }
}

fn address_uses(addr: &Address) -> Vec<Register> {
  match addr {
    Address::Based { base, .. } => vec![*base],
    Address::Slot(_) => vec![Register::SP],
  }
}

fn address_uses_mut(addr: &mut Address) -> Vec<&mut Register> {
  match addr {
    Address::Based { base, .. } => vec![base],
    Address::Slot(_) => vec![],
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
  Ret,
  Branch {
    op: BranchOp,
    lhs: Register,
    rhs: Register,
    then: BlockId,
    els: BlockId,
  },
  Jump(BlockId),
}

impl Terminator {
  pub fn targets(&self) -> Vec<BlockId> {
    match self {
      Terminator::Ret => vec![],
      Terminator::Branch { then, els, .. } => vec![*then, *els],
      Terminator::Jump(target) => vec![*target],
    }
  }

  /// `ret` reads the return address and the return value register.
  pub fn uses(&self) -> Vec<Register> {
    match self {
      Terminator::Ret => vec![Register::RA, Register::arg(0)],
      Terminator::Branch { lhs, rhs, .. } => vec![*lhs, *rhs],
      Terminator::Jump(_) => vec![],
    }
  }

  pub fn uses_mut(&mut self) -> Vec<&mut Register> {
    match self {
      Terminator::Branch { lhs, rhs, .. } => vec![lhs, rhs],
      Terminator::Ret | Terminator::Jump(_) => vec![],
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
  pub label: String,
  #[serde(default)]
  pub instrs: Vec<Instr>,
  pub term: Terminator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
  pub name: String,
  pub blocks: Vec<Block>,
  /// Number of 4-byte stack slots in the frame.
  #[serde(default)]
  pub slots: usize,
  #[serde(default)]
  next_virtual: u32,
}

impl Function {
  pub fn new(name: impl Into<String>) -> Self {
    Function {
      name: name.into(),
      blocks: vec![],
      slots: 0,
      next_virtual: 0,
    }
  }

  pub fn add_block(&mut self, label: impl Into<String>, term: Terminator) -> BlockId {
    self.blocks.push(Block {
      label: label.into(),
      instrs: vec![],
      term,
    });
    BlockId(self.blocks.len() - 1)
  }

  pub fn push(&mut self, block: BlockId, instr: Instr) {
    self.blocks[block.0].instrs.push(instr);
  }

  pub fn fresh_virtual(&mut self) -> Register {
    let reg = Register::Virtual(self.next_virtual);
    self.next_virtual += 1;
    reg
  }

  /// Moves the virtual register counter past every register in the body.
  pub fn reserve_virtuals(&mut self) {
    let max = self
      .registers()
      .into_iter()
      .filter_map(|r| r.as_virtual().copied())
      .max();
    if let Some(max) = max {
      self.next_virtual = self.next_virtual.max(max + 1);
    }
  }

  pub fn new_slot(&mut self) -> SlotId {
    self.slots += 1;
    SlotId(self.slots - 1)
  }

  /// Frame size in bytes, rounded up to the stack alignment.
  pub fn frame_size(&self) -> usize {
    let per_align = STACK_ALIGN / WORD_SIZE;
    (self.slots + per_align - 1) / per_align * STACK_ALIGN
  }

  /// Offset of `slot` from sp inside the grown frame.
  pub fn slot_offset(&self, slot: SlotId) -> i32 {
    (self.frame_size() - WORD_SIZE * (slot.0 + 1)) as i32
  }

  /// Every register mentioned anywhere in the body.
  pub fn registers(&self) -> BTreeSet<Register> {
    let mut regs = BTreeSet::new();
    for block in &self.blocks {
      for instr in &block.instrs {
        regs.extend(instr.uses());
        regs.extend(instr.defs());
      }
      regs.extend(block.term.uses());
    }
    regs
  }

  fn label_of(&self, block: BlockId) -> String {
    format!(".{}_{}", self.name, self.blocks[block.0].label)
  }

  fn fmt_address(&self, addr: &Address) -> String {
    match addr {
      Address::Based { base, offset } => format!("{}({})", offset, base),
      Address::Slot(slot) => format!("{}(sp)", self.slot_offset(*slot)),
    }
  }

  fn fmt_instr(&self, instr: &Instr) -> String {
    match instr {
      Instr::Load { dest, addr } => format!("lw {}, {}", dest, self.fmt_address(addr)),
      Instr::Store { src, addr } => format!("sw {}, {}", src, self.fmt_address(addr)),
      Instr::SpGrow => format!("addi sp, sp, -{}", self.frame_size()),
      Instr::SpRecover => format!("addi sp, sp, {}", self.frame_size()),
      other => other.to_string(),
    }
  }

  fn fmt_term(&self, at: usize, term: &Terminator) -> Vec<String> {
    let jump = |target: BlockId| {
      if target.0 == at + 1 {
        None
      } else {
        Some(format!("j {}", self.label_of(target)))
      }
    };
    match term {
      Terminator::Ret => vec!["ret".to_string()],
      Terminator::Branch {
        op,
        lhs,
        rhs,
        then,
        els,
      } => {
        let mut lines = vec![format!(
          "{} {}, {}, {}",
          op.as_ref(),
          lhs,
          rhs,
          self.label_of(*then)
        )];
        lines.extend(jump(*els));
        lines
      }
      Terminator::Jump(target) => jump(*target).into_iter().collect(),
    }
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

impl Display for Register {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    match self {
      Register::Virtual(n) => write!(fmt, "%v{}", n),
      Register::Precolored(reg) => write!(fmt, "{}", reg),
      Register::Spilled(slot) => write!(fmt, "[slot {}]", slot.0),
    }
  }
}

impl Display for Address {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    match self {
      Address::Based { base, offset } => write!(fmt, "{}({})", offset, base),
      Address::Slot(slot) => write!(fmt, "[slot {}]", slot.0),
    }
  }
}

impl Display for Instr {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    match self {
      Instr::Li { dest, imm } => write!(fmt, "li {}, {}", dest, imm),
      Instr::La { dest, symbol } => write!(fmt, "la {}, {}", dest, symbol),
      Instr::Load { dest, addr } => write!(fmt, "lw {}, {}", dest, addr),
      Instr::Store { src, addr } => write!(fmt, "sw {}, {}", src, addr),
      Instr::Move { dest, src } => write!(fmt, "mv {}, {}", dest, src),
      Instr::Calc { op, dest, lhs, rhs } => {
        write!(fmt, "{} {}, {}, {}", op.as_ref(), dest, lhs, rhs)
      }
      Instr::CalcI { op, dest, lhs, imm } => {
        write!(fmt, "{} {}, {}, {}", op.as_ref(), dest, lhs, imm)
      }
      Instr::CmpZ { op, dest, src } => write!(fmt, "{} {}, {}", op.as_ref(), dest, src),
      Instr::Call { callee, .. } => write!(fmt, "call {}", callee),
      Instr::SpGrow => write!(fmt, "spgrow"),
      Instr::SpRecover => write!(fmt, "sprecover"),
    }
  }
}

impl Display for Function {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    writeln!(fmt, "\t.globl\t{}", self.name)?;
    writeln!(fmt, "{}:", self.name)?;
    for (i, block) in self.blocks.iter().enumerate() {
      writeln!(fmt, "{}:", self.label_of(BlockId(i)))?;
      for instr in &block.instrs {
        writeln!(fmt, "\t{}", self.fmt_instr(instr))?;
      }
      for line in self.fmt_term(i, &block.term) {
        writeln!(fmt, "\t{}", line)?;
      }
    }
    Ok(())
  }
}
