//! Control flow graph plumbing shared by the SSA stage and the machine stage.
//!
//! Blocks live in an arena owned by a function and are referred to by
//! [`BlockId`]. Successors always come from a block's terminator, predecessors
//! are derived from them on demand through [`Edges`].

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a block inside its function. Block 0 is the entry.
#[derive(
  Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockId(pub usize);

impl BlockId {
  pub const ENTRY: BlockId = BlockId(0);
}

impl fmt::Display for BlockId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "bb{}", self.0)
  }
}

/// Anything that looks like a CFG over a dense block arena.
pub trait FlowGraph {
  fn num_blocks(&self) -> usize;

  /// Successors of `block`, in terminator order. May contain duplicates.
  fn successors(&self, block: BlockId) -> Vec<BlockId>;

  fn entry(&self) -> BlockId {
    BlockId::ENTRY
  }
}

/// Deduplicated successor and predecessor tables of a flow graph.
#[derive(Debug, Clone)]
pub struct Edges {
  succs: Vec<Vec<BlockId>>,
  preds: Vec<Vec<BlockId>>,
}

impl Edges {
  pub fn build<G: FlowGraph + ?Sized>(graph: &G) -> Self {
    let n = graph.num_blocks();
    let mut succs = vec![vec![]; n];
    let mut preds: Vec<Vec<BlockId>> = vec![vec![]; n];
    for (b, out) in succs.iter_mut().enumerate() {
      for s in graph.successors(BlockId(b)) {
        if s.0 >= n {
          panic!("block bb{} jumps to bb{} which does not exist", b, s.0);
        }
        if !out.contains(&s) {
          out.push(s);
          preds[s.0].push(BlockId(b));
        }
      }
    }
    Edges { succs, preds }
  }

  pub fn num_blocks(&self) -> usize {
    self.succs.len()
  }

  pub fn succs(&self, block: BlockId) -> &[BlockId] {
    &self.succs[block.0]
  }

  pub fn preds(&self, block: BlockId) -> &[BlockId] {
    &self.preds[block.0]
  }
}

impl FlowGraph for Edges {
  fn num_blocks(&self) -> usize {
    self.succs.len()
  }

  fn successors(&self, block: BlockId) -> Vec<BlockId> {
    self.succs[block.0].clone()
  }
}

/// Marks every block reachable from the entry (BFS, no recursion).
pub fn reachable<G: FlowGraph + ?Sized>(graph: &G) -> Vec<bool> {
  let mut seen = vec![false; graph.num_blocks()];
  if seen.is_empty() {
    return seen;
  }
  let mut queue = VecDeque::new();
  seen[graph.entry().0] = true;
  queue.push_back(graph.entry());
  while let Some(b) = queue.pop_front() {
    for s in graph.successors(b) {
      if !seen[s.0] {
        seen[s.0] = true;
        queue.push_back(s);
      }
    }
  }
  seen
}

/// Maps old block ids to new ones after dropping the blocks marked `false`.
pub fn compact_ids(keep: &[bool]) -> Vec<Option<BlockId>> {
  let mut next = 0;
  keep
    .iter()
    .map(|&k| {
      if k {
        next += 1;
        Some(BlockId(next - 1))
      } else {
        None
      }
    })
    .collect()
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  /// Adjacency list graph used by tests across the crate.
  pub(crate) struct TestGraph(pub Vec<Vec<usize>>);

  impl FlowGraph for TestGraph {
    fn num_blocks(&self) -> usize {
      self.0.len()
    }

    fn successors(&self, block: BlockId) -> Vec<BlockId> {
      self.0[block.0].iter().map(|&s| BlockId(s)).collect()
    }
  }

  #[test]
  fn test_edges_dedup() {
    let g = TestGraph(vec![vec![1, 1], vec![2], vec![]]);
    let edges = Edges::build(&g);
    assert_eq!(edges.succs(BlockId(0)), &[BlockId(1)]);
    assert_eq!(edges.preds(BlockId(1)), &[BlockId(0)]);
    assert_eq!(edges.preds(BlockId(2)), &[BlockId(1)]);
    assert!(edges.preds(BlockId(0)).is_empty());
  }

  #[test]
  fn test_reachable() {
    let g = TestGraph(vec![vec![2], vec![2], vec![0]]);
    assert_eq!(reachable(&g), vec![true, false, true]);
  }

  #[test]
  fn test_compact_ids() {
    let ids = compact_ids(&[true, false, true, true]);
    assert_eq!(ids, vec![Some(BlockId(0)), None, Some(BlockId(1)), Some(BlockId(2))]);
  }
}
