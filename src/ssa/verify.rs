//! Structural checks on SSA-stage functions.
//!
//! These report problems as errors instead of panicking, so the driver can
//! print every broken function in a module before giving up.

use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, bail, Result};

use crate::cfg::{BlockId, Edges, FlowGraph};
use crate::ir::{Function, Inst, Operand, Value};
use crate::ssa::DomTree;

/// Every phi's incoming keys equal its block's predecessors.
pub fn check_phis(func: &Function) -> Result<()> {
  let edges = Edges::build(func);
  for (b, block) in func.blocks.iter().enumerate() {
    let preds: BTreeSet<BlockId> = edges.preds(BlockId(b)).iter().copied().collect();
    for phi in &block.phis {
      let keys: BTreeSet<BlockId> = phi.incoming.keys().copied().collect();
      if keys != preds {
        bail!(
          "{}: phi {} in {} has incoming {:?} but predecessors {:?}",
          func.name,
          phi.dest,
          BlockId(b),
          keys,
          preds
        );
      }
    }
  }
  Ok(())
}

/// Where a value is defined: block and position. Phis and parameters sit at
/// position 0, instruction `i` at `i + 1`.
fn definitions(func: &Function) -> Result<HashMap<Value, (BlockId, usize)>> {
  let mut defs = HashMap::new();
  let mut define = |v: Value, at: (BlockId, usize)| {
    if defs.insert(v, at).is_some() {
      Err(anyhow!("{}: {} is defined more than once", func.name, v))
    } else {
      Ok(())
    }
  };
  for &p in &func.params {
    define(p, (func.entry(), 0))?;
  }
  for (b, block) in func.blocks.iter().enumerate() {
    for phi in &block.phis {
      define(phi.dest, (BlockId(b), 0))?;
    }
    for (i, inst) in block.insts.iter().enumerate() {
      if let Some(v) = inst.def() {
        define(v, (BlockId(b), i + 1))?;
      }
    }
  }
  Ok(defs)
}

pub fn check_single_definition(func: &Function) -> Result<()> {
  definitions(func).map(|_| ())
}

/// Every use is dominated by its definition. Phi operands must be available
/// at the end of the corresponding predecessor.
pub fn check_dominance(func: &Function) -> Result<()> {
  let defs = definitions(func)?;
  let tree = DomTree::build(func);
  if let Some(b) = (0..func.num_blocks()).map(BlockId).find(|&b| !tree.is_reachable(b)) {
    bail!("{}: {} is unreachable", func.name, b);
  }

  let check = |op: &Operand, block: BlockId, pos: usize| -> Result<()> {
    let v = match op {
      Operand::Value(v) => *v,
      _ => return Ok(()),
    };
    let (def_block, def_pos) = *defs
      .get(&v)
      .ok_or_else(|| anyhow!("{}: use of undefined value {} in {}", func.name, v, block))?;
    let ok = if def_block == block {
      def_pos < pos
    } else {
      tree.dominates(def_block, block)
    };
    if !ok {
      bail!(
        "{}: {} defined in {} does not dominate its use in {}",
        func.name,
        v,
        def_block,
        block
      );
    }
    Ok(())
  };

  for (b, block) in func.blocks.iter().enumerate() {
    let b = BlockId(b);
    for phi in &block.phis {
      for (&pred, value) in &phi.incoming {
        let end = func.block(pred).insts.len() + 1;
        check(value, pred, end)?;
      }
    }
    for (i, inst) in block.insts.iter().enumerate() {
      for op in inst.operands() {
        check(op, b, i + 1)?;
      }
    }
    for op in block.term.operands() {
      check(op, b, block.insts.len() + 1)?;
    }
  }
  Ok(())
}

/// No instruction touches one of the promoted `slots` any more.
pub fn check_promoted(func: &Function, slots: &[Value]) -> Result<()> {
  for (b, block) in func.blocks.iter().enumerate() {
    for inst in &block.insts {
      let slot = match inst {
        Inst::Alloca { dest } => Some(dest),
        Inst::Load { addr, .. } | Inst::Store { addr, .. } => addr.as_value(),
        _ => None,
      };
      if let Some(slot) = slot.filter(|s| slots.contains(*s)) {
        bail!(
          "{}: promoted slot {} still accessed by `{}` in {}",
          func.name,
          slot,
          inst,
          BlockId(b)
        );
      }
    }
  }
  Ok(())
}
