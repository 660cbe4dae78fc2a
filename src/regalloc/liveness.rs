// Function -> per-block live-in/live-out sets + coalescing candidates

use std::collections::{HashSet, VecDeque};

use crate::{
  asm::{Block, Function, Instr, Register},
  cfg::{BlockId, Edges},
};

/// A register-to-register copy the allocator may coalesce away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveSite {
  pub block: BlockId,
  /// Position of the move in the block's instruction list.
  pub index: usize,
  pub dest: Register,
  pub src: Register,
}

/// The liveness analysis result of a function
#[derive(Debug, Clone)]
pub struct Liveness {
  pub live_in: Vec<HashSet<Register>>,
  pub live_out: Vec<HashSet<Register>>,
  /// Moves between tracked registers, in program order.
  pub moves: Vec<MoveSite>,
}

fn tracked(regs: Vec<Register>) -> impl Iterator<Item = Register> {
  regs.into_iter().filter(Register::is_tracked)
}

impl Liveness {
  /// Backward worklist fixpoint over the blocks of `func`.
  pub fn compute(func: &Function) -> Self {
    let edges = Edges::build(func);
    let n = func.blocks.len();
    let mut live_in = vec![HashSet::new(); n];
    let mut live_out = vec![HashSet::new(); n];

    // seeded in reverse so most blocks see their successors first
    let mut queue: VecDeque<BlockId> = (0..n).rev().map(BlockId).collect();
    let mut queued = vec![true; n];
    let mut iterations = 0;
    while let Some(b) = queue.pop_front() {
      iterations += 1;
      queued[b.0] = false;
      let out: HashSet<Register> = edges
        .succs(b)
        .iter()
        .flat_map(|s| live_in[s.0].iter().copied())
        .collect();
      let inn = Self::transfer(&func.blocks[b.0], &out);
      live_out[b.0] = out;
      if inn != live_in[b.0] {
        live_in[b.0] = inn;
        for &p in edges.preds(b) {
          if !queued[p.0] {
            queued[p.0] = true;
            queue.push_back(p);
          }
        }
      }
    }
    log::trace!("{}: liveness converged after {} block visits", func.name, iterations);

    let mut moves = vec![];
    for (b, block) in func.blocks.iter().enumerate() {
      for (index, instr) in block.instrs.iter().enumerate() {
        if let Instr::Move { dest, src } = instr {
          if dest.is_tracked() && src.is_tracked() {
            moves.push(MoveSite {
              block: BlockId(b),
              index,
              dest: *dest,
              src: *src,
            });
          }
        }
      }
    }

    Liveness {
      live_in,
      live_out,
      moves,
    }
  }

  /// Live-in of `block` given its live-out: scan backwards, kill defs, then
  /// add uses.
  pub fn transfer(block: &Block, live_out: &HashSet<Register>) -> HashSet<Register> {
    let mut live = live_out.clone();
    live.extend(tracked(block.term.uses()));
    for instr in block.instrs.iter().rev() {
      for d in instr.defs() {
        live.remove(&d);
      }
      live.extend(tracked(instr.uses()));
    }
    live
  }
}
