//! Dominator tree construction (Lengauer-Tarjan).
//!
//! Blocks are renumbered by DFS preorder (`dfn`) and all bookkeeping lives
//! in dense arrays indexed by that number. Both the DFS and the path
//! compression in `eval` use explicit stacks, so deep CFGs are fine.

use std::collections::BTreeSet;

use crate::cfg::{BlockId, Edges, FlowGraph};

#[derive(Debug, Clone)]
pub struct DomTree {
  root: BlockId,
  /// DFS preorder number of each block, `None` if unreachable.
  dfn: Vec<Option<usize>>,
  idom: Vec<Option<BlockId>>,
  children: Vec<Vec<BlockId>>,
  /// Dominator tree preorder.
  order: Vec<BlockId>,
  /// Entry/exit times of the dominator tree walk, for O(1) dominance queries.
  tin: Vec<usize>,
  tout: Vec<usize>,
}

/// The link/eval forest over dfn numbers.
struct Forest {
  ancestor: Vec<Option<usize>>,
  best: Vec<usize>,
  semi: Vec<usize>,
}

impl Forest {
  fn new(count: usize) -> Self {
    Forest {
      ancestor: vec![None; count],
      best: (0..count).collect(),
      semi: (0..count).collect(),
    }
  }

  fn link(&mut self, parent: usize, child: usize) {
    self.ancestor[child] = Some(parent);
    self.best[child] = child;
  }

  /// The vertex with minimal semidominator on the forest path from `v` up to,
  /// but excluding, its root. Compresses the path on the way.
  fn eval(&mut self, v: usize) -> usize {
    if self.ancestor[v].is_none() {
      return v;
    }

    let mut path = vec![];
    let mut u = v;
    while let Some(a) = self.ancestor[u] {
      if self.ancestor[a].is_none() {
        break;
      }
      path.push(u);
      u = a;
    }

    // topmost first, so every node sees an already compressed ancestor
    while let Some(x) = path.pop() {
      if let Some(a) = self.ancestor[x] {
        if self.semi[self.best[a]] < self.semi[self.best[x]] {
          self.best[x] = self.best[a];
        }
        self.ancestor[x] = self.ancestor[a];
      }
    }
    self.best[v]
  }
}

/// Iterative DFS from the entry. Returns blocks in preorder, the dfn of each
/// block's DFS parent, and the dfn of every block.
fn depth_first(edges: &Edges, entry: BlockId) -> (Vec<BlockId>, Vec<usize>, Vec<Option<usize>>) {
  let mut dfn = vec![None; edges.num_blocks()];
  let mut vertex = vec![entry];
  let mut parent = vec![0];
  dfn[entry.0] = Some(0);

  // (block, its dfn, next successor to visit)
  let mut stack = vec![(entry, 0, 0)];
  while let Some(top) = stack.last_mut() {
    let (block, num, next) = *top;
    match edges.succs(block).get(next) {
      Some(&succ) => {
        top.2 += 1;
        if dfn[succ.0].is_none() {
          let succ_num = vertex.len();
          dfn[succ.0] = Some(succ_num);
          vertex.push(succ);
          parent.push(num);
          stack.push((succ, succ_num, 0));
        }
      }
      None => {
        stack.pop();
      }
    }
  }
  (vertex, parent, dfn)
}

impl DomTree {
  pub fn build<G: FlowGraph + ?Sized>(graph: &G) -> Self {
    let edges = Edges::build(graph);
    Self::from_edges(&edges, graph.entry())
  }

  pub fn from_edges(edges: &Edges, entry: BlockId) -> Self {
    let n = edges.num_blocks();
    if n == 0 {
      return DomTree {
        root: entry,
        dfn: vec![],
        idom: vec![],
        children: vec![],
        order: vec![],
        tin: vec![],
        tout: vec![],
      };
    }

    let (vertex, parent, dfn) = depth_first(edges, entry);
    let count = vertex.len();
    let mut forest = Forest::new(count);
    let mut bucket: Vec<Vec<usize>> = vec![vec![]; count];
    let mut idom = vec![0; count];
    let mut same_dom: Vec<Option<usize>> = vec![None; count];

    for w in (1..count).rev() {
      let p = parent[w];
      let mut s = p;
      for pred in edges.preds(vertex[w]) {
        let v = match dfn[pred.0] {
          Some(v) => v,
          None => continue,
        };
        let candidate = if v <= w {
          v
        } else {
          let u = forest.eval(v);
          forest.semi[u]
        };
        s = s.min(candidate);
      }
      forest.semi[w] = s;
      bucket[s].push(w);
      forest.link(p, w);

      for v in std::mem::take(&mut bucket[p]) {
        let y = forest.eval(v);
        if forest.semi[y] == forest.semi[v] {
          idom[v] = p;
        } else {
          same_dom[v] = Some(y);
        }
      }
    }

    for w in 1..count {
      if let Some(y) = same_dom[w] {
        idom[w] = idom[y];
      }
    }

    let mut block_idom = vec![None; n];
    let mut children = vec![vec![]; n];
    for w in 1..count {
      let (b, d) = (vertex[w], vertex[idom[w]]);
      block_idom[b.0] = Some(d);
      children[d.0].push(b);
    }
    for c in children.iter_mut() {
      c.sort();
    }

    let mut tree = DomTree {
      root: entry,
      dfn,
      idom: block_idom,
      children,
      order: vec![],
      tin: vec![0; n],
      tout: vec![0; n],
    };
    tree.number();
    log::debug!("dominator tree: {} of {} blocks reachable", count, n);
    tree
  }

  /// Preorder walk of the tree with explicit enter/exit events.
  fn number(&mut self) {
    let mut clock = 0;
    let mut stack = vec![(self.root, false)];
    while let Some((b, done)) = stack.pop() {
      clock += 1;
      if done {
        self.tout[b.0] = clock;
        continue;
      }
      self.tin[b.0] = clock;
      self.order.push(b);
      stack.push((b, true));
      for &c in self.children[b.0].iter().rev() {
        stack.push((c, false));
      }
    }
  }

  pub fn root(&self) -> BlockId {
    self.root
  }

  pub fn is_reachable(&self, block: BlockId) -> bool {
    self.dfn.get(block.0).map_or(false, Option::is_some)
  }

  /// Immediate dominator, `None` for the root.
  pub fn idom(&self, block: BlockId) -> Option<BlockId> {
    if !self.is_reachable(block) {
      panic!("dominator of unreachable block {} requested", block);
    }
    self.idom[block.0]
  }

  pub fn children(&self, block: BlockId) -> &[BlockId] {
    &self.children[block.0]
  }

  /// Does `a` dominate `b`? Every block dominates itself.
  pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
    if !self.is_reachable(a) || !self.is_reachable(b) {
      panic!("dominance between {} and {} asked with an unreachable block", a, b);
    }
    self.tin[a.0] <= self.tin[b.0] && self.tout[b.0] <= self.tout[a.0]
  }

  pub fn preorder(&self) -> &[BlockId] {
    &self.order
  }

  /// Dominance frontier of every block; empty for unreachable ones.
  pub fn frontiers(&self, edges: &Edges) -> Vec<BTreeSet<BlockId>> {
    let mut df = vec![BTreeSet::new(); edges.num_blocks()];
    for &b in &self.order {
      let stop = self.idom[b.0];
      for &p in edges.preds(b) {
        if !self.is_reachable(p) {
          continue;
        }
        let mut runner = Some(p);
        while let Some(r) = runner {
          if Some(r) == stop {
            break;
          }
          df[r.0].insert(b);
          runner = self.idom[r.0];
        }
      }
    }
    df
  }
}

#[cfg(test)]
mod tests {
  use std::collections::{HashSet, VecDeque};

  use super::*;
  use crate::cfg::tests::TestGraph;

  /// Dominators of every block by the definition: `d` dominates `b` iff `b`
  /// becomes unreachable once `d` is removed.
  fn brute_force(g: &TestGraph) -> Vec<Option<HashSet<usize>>> {
    let n = g.0.len();
    let reach = |removed: Option<usize>| {
      let mut seen = vec![false; n];
      if removed == Some(0) {
        return seen;
      }
      let mut queue = VecDeque::from(vec![0]);
      seen[0] = true;
      while let Some(b) = queue.pop_front() {
        for &s in &g.0[b] {
          if Some(s) != removed && !seen[s] {
            seen[s] = true;
            queue.push_back(s);
          }
        }
      }
      seen
    };
    let all = reach(None);
    let mut doms = vec![None; n];
    for b in 0..n {
      if all[b] {
        doms[b] = Some(HashSet::from([b]));
      }
    }
    for d in 0..n {
      if !all[d] {
        continue;
      }
      let without = reach(Some(d));
      for b in 0..n {
        if all[b] && !without[b] && b != d {
          doms[b].as_mut().unwrap().insert(d);
        }
      }
    }
    doms
  }

  fn tree_dominators(tree: &DomTree, b: usize) -> HashSet<usize> {
    let mut set = HashSet::from([b]);
    let mut cur = BlockId(b);
    while let Some(up) = tree.idom(cur) {
      set.insert(up.0);
      cur = up;
    }
    set
  }

  fn check_against_brute_force(g: &TestGraph) {
    let tree = DomTree::build(g);
    let expected = brute_force(g);
    for (b, doms) in expected.iter().enumerate() {
      match doms {
        Some(doms) => {
          assert!(tree.is_reachable(BlockId(b)));
          assert_eq!(&tree_dominators(&tree, b), doms, "dominators of block {}", b);
          for &d in doms {
            assert!(tree.dominates(BlockId(d), BlockId(b)));
          }
        }
        None => assert!(!tree.is_reachable(BlockId(b))),
      }
    }
  }

  fn set(blocks: &[usize]) -> BTreeSet<BlockId> {
    blocks.iter().map(|&b| BlockId(b)).collect()
  }

  #[test]
  fn test_diamond() {
    // entry -> {then, else} -> merge
    let g = TestGraph(vec![vec![1, 2], vec![3], vec![3], vec![]]);
    let tree = DomTree::build(&g);
    assert_eq!(tree.idom(BlockId(0)), None);
    assert_eq!(tree.idom(BlockId(1)), Some(BlockId(0)));
    assert_eq!(tree.idom(BlockId(2)), Some(BlockId(0)));
    assert_eq!(tree.idom(BlockId(3)), Some(BlockId(0)));
    assert_eq!(tree.children(BlockId(0)), &[BlockId(1), BlockId(2), BlockId(3)]);

    let df = tree.frontiers(&Edges::build(&g));
    assert!(df[0].is_empty());
    assert_eq!(df[1], set(&[3]));
    assert_eq!(df[2], set(&[3]));
    assert!(df[3].is_empty());
    check_against_brute_force(&g);
  }

  #[test]
  fn test_loop() {
    // entry -> header -> {body -> header, exit}
    let g = TestGraph(vec![vec![1], vec![2, 3], vec![1], vec![]]);
    let tree = DomTree::build(&g);
    assert_eq!(tree.idom(BlockId(1)), Some(BlockId(0)));
    assert_eq!(tree.idom(BlockId(2)), Some(BlockId(1)));
    assert_eq!(tree.idom(BlockId(3)), Some(BlockId(1)));
    assert!(!tree.dominates(BlockId(2), BlockId(3)));

    let df = tree.frontiers(&Edges::build(&g));
    assert_eq!(df[2], set(&[1]));
    assert_eq!(df[1], set(&[1]));
    assert!(df[0].is_empty());
    assert!(df[3].is_empty());
  }

  #[test]
  fn test_thirteen_blocks() {
    let (a, b, c, d, e, f, g, h, i, j, k, l, m) = (0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12);
    let mut succ = vec![vec![]; 13];
    let edges = [
      (a, b),
      (a, c),
      (b, d),
      (b, g),
      (c, e),
      (c, h),
      (d, f),
      (d, g),
      (e, h),
      (e, c),
      (f, i),
      (f, k),
      (g, j),
      (h, m),
      (i, l),
      (j, i),
      (k, l),
      (l, b),
      (l, m),
    ];
    for (from, to) in edges {
      succ[from].push(to);
    }
    let graph = TestGraph(succ);
    check_against_brute_force(&graph);

    let tree = DomTree::build(&graph);
    assert_eq!(tree.idom(BlockId(m)), Some(BlockId(a)));
    assert_eq!(tree.idom(BlockId(l)), Some(BlockId(b)));
    assert_eq!(tree.idom(BlockId(h)), Some(BlockId(c)));
    assert_eq!(tree.idom(BlockId(c)), Some(BlockId(a)));
  }

  #[test]
  fn test_unreachable_blocks_are_excluded() {
    let g = TestGraph(vec![vec![1], vec![], vec![1]]);
    let tree = DomTree::build(&g);
    assert!(!tree.is_reachable(BlockId(2)));
    assert_eq!(tree.preorder(), &[BlockId(0), BlockId(1)]);
    // the edge from the unreachable block does not make 1 a join point
    let df = tree.frontiers(&Edges::build(&g));
    assert!(df.iter().all(BTreeSet::is_empty));
  }

  #[test]
  #[should_panic(expected = "unreachable")]
  fn test_idom_of_unreachable_block_panics() {
    let g = TestGraph(vec![vec![], vec![0]]);
    DomTree::build(&g).idom(BlockId(1));
  }

  #[test]
  fn test_deep_chain_does_not_overflow() {
    let n = 100_000;
    let mut succ: Vec<Vec<usize>> = (0..n).map(|i| vec![i + 1]).collect();
    succ[n - 1] = vec![1];
    let g = TestGraph(succ);
    let tree = DomTree::build(&g);
    assert_eq!(tree.idom(BlockId(n - 1)), Some(BlockId(n - 2)));
    assert_eq!(tree.preorder().len(), n);
    assert!(tree.dominates(BlockId(1), BlockId(n - 1)));
  }

  #[test]
  fn test_entry_self_loop() {
    let g = TestGraph(vec![vec![0, 1], vec![]]);
    let tree = DomTree::build(&g);
    let df = tree.frontiers(&Edges::build(&g));
    assert_eq!(df[0], set(&[0]));
    assert_eq!(tree.idom(BlockId(1)), Some(BlockId(0)));
  }

  #[test]
  fn test_random_graphs_match_brute_force() {
    // small LCG so the test is reproducible without extra crates
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = |bound: usize| {
      seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
      ((seed >> 33) as usize) % bound
    };
    for _ in 0..200 {
      let n = 2 + next(12);
      let mut succ = vec![vec![]; n];
      for (b, out) in succ.iter_mut().enumerate() {
        for _ in 0..next(3) {
          out.push(next(n));
        }
        if b + 1 < n && next(2) == 0 {
          out.push(b + 1);
        }
      }
      check_against_brute_force(&TestGraph(succ));
    }
  }
}
