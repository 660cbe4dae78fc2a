use std::collections::BTreeSet;

use crate::{
  asm::{Function, Register},
  regalloc::liveness::Liveness,
  utils::Graph,
};

/// Which registers can never share a physical register. Rebuilt from
/// scratch every allocation round.
#[derive(Debug)]
pub struct InterferenceGraph {
  graph: Graph<Register>,
}

impl InterferenceGraph {
  /// Every def interferes with everything live right after it. The source
  /// of a move is dropped from the live set first, so a copy does not keep
  /// its own operands apart.
  pub fn build(func: &Function, liveness: &Liveness) -> Self {
    let mut graph = Graph::new();
    for reg in func.registers() {
      if reg.is_tracked() {
        graph.add_node(reg);
      }
    }

    for (b, block) in func.blocks.iter().enumerate() {
      let mut live = liveness.live_out[b].clone();
      live.extend(block.term.uses().into_iter().filter(Register::is_tracked));

      for instr in block.instrs.iter().rev() {
        let defs: Vec<Register> = instr.defs().into_iter().filter(Register::is_tracked).collect();
        let uses: Vec<Register> = instr.uses().into_iter().filter(Register::is_tracked).collect();
        if instr.is_move() {
          for u in &uses {
            live.remove(u);
          }
        }
        live.extend(defs.iter().copied());
        for &d in &defs {
          for &l in &live {
            graph.add_graph_edge(d, l);
          }
        }
        for d in &defs {
          live.remove(d);
        }
        live.extend(uses);
      }
    }

    log::debug!(
      "{}: interference graph with {} nodes and {} edges",
      func.name,
      graph.nodes_ref().len(),
      graph.num_edges()
    );
    InterferenceGraph { graph }
  }

  pub fn interferes(&self, a: &Register, b: &Register) -> bool {
    self.graph.has_edge(a, b)
  }

  pub fn neighbors(&self, reg: &Register) -> Option<&BTreeSet<Register>> {
    self.graph.neighbors(reg)
  }

  pub fn nodes(&self) -> Vec<Register> {
    self.graph.nodes_ref().into_iter().copied().collect()
  }
}
