/// Implements move coalescing and freezing for the iterated allocator
use std::collections::BTreeSet;

use super::allocation::{MoveId, MoveState, NodeId, NodeState, Round};

impl Round<'_> {
  /// Follows the alias chain of a coalesced node to its representative.
  pub(super) fn get_alias(&self, mut n: NodeId) -> NodeId {
    while self.nodes[n].state == NodeState::Coalesced {
      match self.nodes[n].alias {
        Some(a) => n = a,
        None => panic!("coalesced node {} has no alias", self.nodes[n].reg),
      }
    }
    n
  }

  /// A node with no pending moves and low degree can be simplified again.
  pub(super) fn add_worklist(&mut self, u: NodeId) {
    if !self.is_precolored(u) && !self.move_related(u) && self.degree(u) < self.k {
      self.set_state(u, NodeState::Simplify);
    }
  }

  /// George: merging `v` into precolored `u` is safe when every neighbor
  /// `t` of `v` is harmless to `u`.
  fn ok(&self, t: NodeId, u: NodeId) -> bool {
    self.degree(t) < self.k || self.is_precolored(t) || self.graph.has_edge(&t, &u)
  }

  /// Briggs: fewer than K significant-degree neighbors.
  fn conservative(&self, nodes: &BTreeSet<NodeId>) -> bool {
    nodes.iter().filter(|&&n| self.degree(n) >= self.k).count() < self.k
  }

  fn in_pool(&self, n: NodeId) -> bool {
    self.nodes[n]
      .color
      .map_or(false, |reg| self.pool.contains(&reg))
  }

  pub(super) fn coalesce(&mut self, m: MoveId) {
    let site = self.moves[m];
    let x = self.get_alias(self.index[&site.dest]);
    let y = self.get_alias(self.index[&site.src]);
    let (u, v) = if self.is_precolored(y) { (y, x) } else { (x, y) };

    if u == v {
      self.set_move_state(m, MoveState::Coalesced);
      self.add_worklist(u);
    } else if self.is_precolored(v)
      || self.graph.has_edge(&u, &v)
      || (self.is_precolored(u) && !self.in_pool(u))
    {
      self.set_move_state(m, MoveState::Constrained);
      self.add_worklist(u);
      self.add_worklist(v);
    } else if (self.is_precolored(u) && self.adjacent(v).into_iter().all(|t| self.ok(t, u)))
      || (!self.is_precolored(u) && {
        let union: BTreeSet<NodeId> = self.adjacent(u).into_iter().chain(self.adjacent(v)).collect();
        self.conservative(&union)
      })
    {
      self.set_move_state(m, MoveState::Coalesced);
      self.combine(u, v);
      self.add_worklist(u);
    } else {
      self.set_move_state(m, MoveState::Active);
    }
  }

  /// Merges `v` into `u`.
  fn combine(&mut self, u: NodeId, v: NodeId) {
    log::trace!("coalesce {} into {}", self.nodes[v].reg, self.nodes[u].reg);
    self.set_state(v, NodeState::Coalesced);
    self.nodes[v].alias = Some(u);
    let moves = self.nodes[v].moves.clone();
    self.nodes[u].moves.extend(moves);
    self.enable_moves(&[v]);

    for t in self.adjacent(v) {
      self.add_edge(t, u);
      self.decrement_degree(t);
    }
    if self.degree(u) >= self.k && self.nodes[u].state == NodeState::Freeze {
      self.set_state(u, NodeState::Spill);
    }
  }

  pub(super) fn freeze(&mut self, u: NodeId) {
    self.set_state(u, NodeState::Simplify);
    self.freeze_moves(u);
  }

  /// Gives up on every pending move of `u`.
  pub(super) fn freeze_moves(&mut self, u: NodeId) {
    for m in self.node_moves(u) {
      let site = self.moves[m];
      let (x, y) = (self.index[&site.dest], self.index[&site.src]);
      let v = if self.get_alias(y) == self.get_alias(u) {
        self.get_alias(x)
      } else {
        self.get_alias(y)
      };
      self.set_move_state(m, MoveState::Frozen);
      if self.nodes[v].state == NodeState::Freeze && !self.move_related(v) {
        self.set_state(v, NodeState::Simplify);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use crate::asm::{AluOp, Function, Instr, Register, Terminator};
  use crate::regalloc::allocation::{MoveState, NodeState, Round};
  use crate::regalloc::{InterferenceGraph, Liveness};
  use crate::registers::PhysReg;

  fn v(n: u32) -> Register {
    Register::Virtual(n)
  }

  fn with_round(f: &Function, pool: &[PhysReg], check: impl FnOnce(&mut Round)) {
    let liveness = Liveness::compute(f);
    let igraph = InterferenceGraph::build(f, &liveness);
    let mut round = Round::new(pool, &igraph, liveness.moves);
    check(&mut round);
  }

  #[test]
  fn test_copy_chain_collapses() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret);
    f.push(entry, Instr::Li { dest: v(0), imm: 1 });
    f.push(entry, Instr::Move { dest: v(1), src: v(0) });
    f.push(entry, Instr::Move { dest: v(2), src: v(1) });
    f.push(
      entry,
      Instr::Calc {
        op: AluOp::Add,
        dest: Register::arg(0),
        lhs: v(2),
        rhs: v(2),
      },
    );
    let pool = [PhysReg::Temp(0), PhysReg::Temp(1)];
    with_round(&f, &pool, |round| {
      round.run();
      assert!(round.move_state.iter().all(|s| *s == MoveState::Coalesced));
      let reps: HashSet<_> = (0..3)
        .map(|i| round.get_alias(round.index[&v(i)]))
        .collect();
      assert_eq!(reps.len(), 1);
      assert!(round.assign_colors().is_empty());
      let colors = round.color_map();
      assert_eq!(colors[&v(0)], colors[&v(2)]);
    });
  }

  #[test]
  fn test_interfering_copy_is_constrained() {
    // v1 = v0, then v0 is redefined while v1 is still live
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret);
    f.push(entry, Instr::Li { dest: v(0), imm: 1 });
    f.push(entry, Instr::Move { dest: v(1), src: v(0) });
    f.push(entry, Instr::Li { dest: v(0), imm: 2 });
    f.push(
      entry,
      Instr::Calc {
        op: AluOp::Sub,
        dest: Register::arg(0),
        lhs: v(0),
        rhs: v(1),
      },
    );
    let pool = [PhysReg::Temp(0), PhysReg::Temp(1), PhysReg::Temp(2)];
    with_round(&f, &pool, |round| {
      round.run();
      assert_eq!(round.move_state, vec![MoveState::Constrained]);
      assert!(round.assign_colors().is_empty());
      let colors = round.color_map();
      assert_ne!(colors[&v(0)], colors[&v(1)]);
    });
  }

  #[test]
  fn test_precolored_outside_pool_is_not_merged() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret);
    f.push(entry, Instr::Li { dest: v(0), imm: 1 });
    f.push(entry, Instr::Move { dest: Register::arg(0), src: v(0) });
    let pool = [PhysReg::Temp(0), PhysReg::Temp(1)];
    with_round(&f, &pool, |round| {
      round.run();
      assert_eq!(round.move_state, vec![MoveState::Constrained]);
      let n = round.index[&v(0)];
      assert_eq!(round.nodes[n].state, NodeState::Selected);
    });
  }

  #[test]
  fn test_precolored_in_pool_absorbs_virtual() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret);
    f.push(entry, Instr::Li { dest: v(0), imm: 1 });
    f.push(entry, Instr::Move { dest: Register::arg(0), src: v(0) });
    let pool = [PhysReg::Arg(0), PhysReg::Temp(0)];
    with_round(&f, &pool, |round| {
      round.run();
      assert_eq!(round.move_state, vec![MoveState::Coalesced]);
      round.assign_colors();
      assert_eq!(round.color_map()[&v(0)], PhysReg::Arg(0));
    });
  }
}
