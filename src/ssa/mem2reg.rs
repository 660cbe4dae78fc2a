//! Promotes stack slots to SSA values.
//!
//! Phis go on the iterated dominance frontier of each slot's store sites.
//! Renaming walks the dominator tree with an explicit stack; every slot has
//! a stack of visible values that starts out as `undef`.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::cfg::{BlockId, Edges, FlowGraph};
use crate::ir::{Function, Inst, Operand, Phi, Value};
use crate::ssa::DomTree;

/// What a promotion run did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionStats {
  /// The promoted slots, identified by the value their alloca defined.
  pub slots: Vec<Value>,
  pub phis: usize,
  pub loads: usize,
  pub stores: usize,
}

enum Visit {
  Enter(BlockId),
  /// Pops the variables pushed while visiting a block.
  Leave(Vec<usize>),
}

struct Promoter {
  /// alloca value -> variable index
  vars: HashMap<Value, usize>,
  /// (variable, phi result) per block
  phis_at: Vec<Vec<(usize, Value)>>,
  incoming: HashMap<Value, Vec<(BlockId, Operand)>>,
  /// Currently visible value of each variable.
  names: Vec<Vec<Operand>>,
  /// Eliminated load -> the value it read.
  alias: HashMap<Value, Operand>,
  stats: PromotionStats,
}

/// Slots whose address is only ever the address of a load or store.
pub fn promotable_slots(func: &Function) -> Vec<Value> {
  let allocas: BTreeSet<Value> = func
    .blocks
    .iter()
    .flat_map(|b| b.insts.iter())
    .filter_map(|inst| match inst {
      Inst::Alloca { dest } => Some(*dest),
      _ => None,
    })
    .collect();

  let mut escaped = HashSet::new();
  let mut note = |op: &Operand| {
    if let Operand::Value(v) = op {
      if allocas.contains(v) {
        escaped.insert(*v);
      }
    }
  };
  for block in &func.blocks {
    block.phis.iter().flat_map(|p| p.incoming.values()).for_each(&mut note);
    block
      .insts
      .iter()
      .flat_map(|inst| inst.value_operands())
      .for_each(&mut note);
    block.term.operands().into_iter().for_each(&mut note);
  }

  allocas
    .into_iter()
    .filter(|slot| !escaped.contains(slot))
    .collect()
}

/// Runs mem2reg on `func`. Unreachable blocks are dropped first.
pub fn promote(func: &mut Function) -> PromotionStats {
  func.remove_unreachable();
  func.reserve_values();

  let slots = promotable_slots(func);
  if slots.is_empty() {
    return PromotionStats::default();
  }

  let edges = Edges::build(func);
  let tree = DomTree::from_edges(&edges, func.entry());
  let frontiers = tree.frontiers(&edges);

  let mut promoter = Promoter {
    vars: slots.iter().enumerate().map(|(i, &s)| (s, i)).collect(),
    phis_at: vec![vec![]; func.num_blocks()],
    incoming: HashMap::new(),
    names: vec![vec![Operand::Undef]; slots.len()],
    alias: HashMap::new(),
    stats: PromotionStats {
      slots,
      ..PromotionStats::default()
    },
  };
  promoter.place_phis(func, &frontiers);
  promoter.rename(func, &edges, &tree);
  promoter.finish(func);

  log::debug!(
    "{}: promoted {} slots, {} phis, removed {} loads and {} stores",
    func.name,
    promoter.stats.slots.len(),
    promoter.stats.phis,
    promoter.stats.loads,
    promoter.stats.stores
  );
  promoter.stats
}

impl Promoter {
  fn var_of(&self, addr: &Operand) -> Option<usize> {
    addr.as_value().and_then(|v| self.vars.get(v)).copied()
  }

  fn top(&self, var: usize) -> Operand {
    *self.names[var]
      .last()
      .unwrap_or_else(|| panic!("no reaching definition for promoted slot {}", var))
  }

  fn place_phis(&mut self, func: &mut Function, frontiers: &[BTreeSet<BlockId>]) {
    let mut sites: Vec<BTreeSet<BlockId>> = vec![BTreeSet::new(); self.names.len()];
    for (b, block) in func.blocks.iter().enumerate() {
      for inst in &block.insts {
        if let Inst::Store { addr, .. } = inst {
          if let Some(var) = self.var_of(addr) {
            sites[var].insert(BlockId(b));
          }
        }
      }
    }

    for (var, sites) in sites.iter().enumerate() {
      let mut has_phi = HashSet::new();
      let mut queue: Vec<BlockId> = sites.iter().copied().collect();
      while let Some(x) = queue.pop() {
        for &y in &frontiers[x.0] {
          if !has_phi.insert(y) {
            continue;
          }
          let dest = func.fresh_value();
          self.phis_at[y.0].push((var, dest));
          self.incoming.insert(dest, vec![]);
          if !sites.contains(&y) {
            queue.push(y);
          }
        }
      }
    }
    for phis in self.phis_at.iter_mut() {
      phis.sort();
    }
  }

  fn rename(&mut self, func: &mut Function, edges: &Edges, tree: &DomTree) {
    let mut stack = vec![Visit::Enter(tree.root())];
    while let Some(visit) = stack.pop() {
      let b = match visit {
        Visit::Leave(pushed) => {
          for var in pushed {
            self.names[var].pop();
          }
          continue;
        }
        Visit::Enter(b) => b,
      };

      let mut pushed = vec![];
      for &(var, dest) in &self.phis_at[b.0] {
        self.names[var].push(Operand::Value(dest));
        pushed.push(var);
      }

      let insts = std::mem::take(&mut func.blocks[b.0].insts);
      let mut kept = Vec::with_capacity(insts.len());
      for inst in insts {
        let keep = match &inst {
          Inst::Alloca { dest } => !self.vars.contains_key(dest),
          Inst::Load { dest, addr } => match self.var_of(addr) {
            Some(var) => {
              let top = self.top(var);
              self.alias.insert(*dest, top);
              self.stats.loads += 1;
              false
            }
            None => true,
          },
          Inst::Store { value, addr } => match self.var_of(addr) {
            Some(var) => {
              self.names[var].push(*value);
              pushed.push(var);
              self.stats.stores += 1;
              false
            }
            None => true,
          },
          _ => true,
        };
        if keep {
          kept.push(inst);
        }
      }
      func.blocks[b.0].insts = kept;

      for &succ in edges.succs(b) {
        for &(var, dest) in &self.phis_at[succ.0] {
          let top = self.top(var);
          self
            .incoming
            .get_mut(&dest)
            .unwrap_or_else(|| panic!("phi {} was never placed", dest))
            .push((b, top));
        }
      }

      stack.push(Visit::Leave(pushed));
      for &child in tree.children(b).iter().rev() {
        stack.push(Visit::Enter(child));
      }
    }
  }

  fn resolve(&self, mut op: Operand) -> Operand {
    while let Operand::Value(v) = op {
      match self.alias.get(&v) {
        Some(next) => op = *next,
        None => break,
      }
    }
    op
  }

  /// Materializes the phis and rewrites every operand through the aliases
  /// left behind by eliminated loads.
  fn finish(&mut self, func: &mut Function) {
    for (b, phis) in self.phis_at.iter().enumerate() {
      for &(_, dest) in phis {
        let incoming = self.incoming.remove(&dest).unwrap_or_default();
        func.blocks[b].phis.push(Phi {
          dest,
          incoming: incoming.into_iter().collect(),
        });
        self.stats.phis += 1;
      }
    }

    for block in func.blocks.iter_mut() {
      for phi in block.phis.iter_mut() {
        for value in phi.incoming.values_mut() {
          *value = self.resolve(*value);
        }
      }
      for inst in block.insts.iter_mut() {
        for op in inst.operands_mut() {
          *op = self.resolve(*op);
        }
      }
      for op in block.term.operands_mut() {
        *op = self.resolve(*op);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::{BinOp, CmpOp, Terminator};
  use crate::ssa::verify;

  fn assert_valid_ssa(func: &Function) {
    verify::check_phis(func).unwrap();
    verify::check_single_definition(func).unwrap();
    verify::check_dominance(func).unwrap();
  }

  fn count_memory_ops(func: &Function) -> usize {
    func
      .blocks
      .iter()
      .flat_map(|b| b.insts.iter())
      .filter(|i| matches!(i, Inst::Alloca { .. } | Inst::Load { .. } | Inst::Store { .. }))
      .count()
  }

  /// entry -> header -> {body -> header, exit}; `i` is stored in entry and body.
  fn counting_loop() -> Function {
    let mut f = Function::new("count");
    let entry = f.add_block("entry", Terminator::Jump(BlockId(1)));
    let header = f.add_block("header", Terminator::Ret(None));
    let body = f.add_block("body", Terminator::Jump(header));
    let exit = f.add_block("exit", Terminator::Ret(None));

    let slot = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: slot });
    f.push(
      entry,
      Inst::Store {
        value: Operand::Const(0),
        addr: slot.into(),
      },
    );

    let i = f.fresh_value();
    let c = f.fresh_value();
    f.push(header, Inst::Load { dest: i, addr: slot.into() });
    f.push(
      header,
      Inst::Cmp {
        op: CmpOp::Lt,
        dest: c,
        lhs: i.into(),
        rhs: Operand::Const(10),
      },
    );
    f.block_mut(header).term = Terminator::Branch {
      cond: c.into(),
      then: body,
      els: exit,
    };

    let j = f.fresh_value();
    let k = f.fresh_value();
    f.push(body, Inst::Load { dest: j, addr: slot.into() });
    f.push(
      body,
      Inst::Binary {
        op: BinOp::Add,
        dest: k,
        lhs: j.into(),
        rhs: Operand::Const(1),
      },
    );
    f.push(
      body,
      Inst::Store {
        value: k.into(),
        addr: slot.into(),
      },
    );

    let r = f.fresh_value();
    f.push(exit, Inst::Load { dest: r, addr: slot.into() });
    f.block_mut(exit).term = Terminator::Ret(Some(r.into()));
    f
  }

  #[test]
  fn test_loop_gets_one_phi_at_header() {
    let mut f = counting_loop();
    let stats = promote(&mut f);
    assert_eq!(stats.slots.len(), 1);
    assert_eq!(stats.phis, 1);
    assert_eq!(stats.loads, 3);
    assert_eq!(stats.stores, 2);
    assert_eq!(count_memory_ops(&f), 0);

    let total_phis: usize = f.blocks.iter().map(|b| b.phis.len()).sum();
    assert_eq!(total_phis, 1);
    let phi = &f.blocks[1].phis[0];
    assert_eq!(phi.incoming.len(), 2);
    assert_eq!(phi.incoming[&BlockId(0)], Operand::Const(0));
    // the body's incoming value is the incremented counter
    let k = f.blocks[2].insts[0].def().unwrap();
    assert_eq!(phi.incoming[&BlockId(2)], Operand::Value(k));

    // every former load now reads the phi
    let cur = Operand::Value(phi.dest);
    assert_eq!(f.blocks[1].insts[0].operands()[0], &cur);
    assert_eq!(f.blocks[2].insts[0].operands()[0], &cur);
    assert_eq!(f.blocks[3].term, Terminator::Ret(Some(cur)));
    assert_valid_ssa(&f);
  }

  #[test]
  fn test_diamond_merges_both_arms() {
    let mut f = Function::new("pick");
    let p = f.add_param();
    let entry = f.add_block(
      "entry",
      Terminator::Branch {
        cond: p.into(),
        then: BlockId(1),
        els: BlockId(2),
      },
    );
    let then = f.add_block("then", Terminator::Jump(BlockId(3)));
    let els = f.add_block("else", Terminator::Jump(BlockId(3)));
    let merge = f.add_block("merge", Terminator::Ret(None));
    let slot = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: slot });
    f.push(then, Inst::Store { value: Operand::Const(1), addr: slot.into() });
    f.push(els, Inst::Store { value: Operand::Const(2), addr: slot.into() });
    let x = f.fresh_value();
    f.push(merge, Inst::Load { dest: x, addr: slot.into() });
    f.block_mut(merge).term = Terminator::Ret(Some(x.into()));

    let stats = promote(&mut f);
    assert_eq!(stats.phis, 1);
    let phi = &f.blocks[3].phis[0];
    assert_eq!(phi.incoming[&then], Operand::Const(1));
    assert_eq!(phi.incoming[&els], Operand::Const(2));
    assert_eq!(f.blocks[3].term, Terminator::Ret(Some(phi.dest.into())));
    assert_valid_ssa(&f);
  }

  #[test]
  fn test_escaping_slot_is_kept() {
    let mut f = Function::new("escape");
    let entry = f.add_block("entry", Terminator::Ret(None));
    let kept = f.fresh_value();
    let promoted = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: kept });
    f.push(entry, Inst::Alloca { dest: promoted });
    f.push(entry, Inst::Store { value: Operand::Const(5), addr: kept.into() });
    f.push(entry, Inst::Store { value: Operand::Const(6), addr: promoted.into() });
    f.push(
      entry,
      Inst::Call {
        dest: None,
        callee: "observe".to_string(),
        args: vec![kept.into()],
      },
    );
    let v = f.fresh_value();
    f.push(entry, Inst::Load { dest: v, addr: promoted.into() });
    f.block_mut(entry).term = Terminator::Ret(Some(v.into()));

    assert_eq!(promotable_slots(&f), vec![promoted]);
    promote(&mut f);
    let insts = &f.blocks[0].insts;
    assert_eq!(insts.len(), 3);
    assert_eq!(insts[0], Inst::Alloca { dest: kept });
    assert!(matches!(insts[1], Inst::Store { .. }));
    assert!(matches!(insts[2], Inst::Call { .. }));
    assert_eq!(f.blocks[0].term, Terminator::Ret(Some(Operand::Const(6))));
    verify::check_promoted(&f, &[promoted]).unwrap();
  }

  #[test]
  fn test_stored_address_escapes() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret(None));
    let a = f.fresh_value();
    let b = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: a });
    f.push(entry, Inst::Alloca { dest: b });
    f.push(entry, Inst::Store { value: a.into(), addr: b.into() });
    assert_eq!(promotable_slots(&f), vec![b]);
  }

  #[test]
  fn test_load_before_store_reads_undef() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret(None));
    let slot = f.fresh_value();
    let v = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: slot });
    f.push(entry, Inst::Load { dest: v, addr: slot.into() });
    f.block_mut(entry).term = Terminator::Ret(Some(v.into()));
    promote(&mut f);
    assert!(f.blocks[0].insts.is_empty());
    assert_eq!(f.blocks[0].term, Terminator::Ret(Some(Operand::Undef)));
  }

  #[test]
  fn test_unreachable_store_does_not_leak() {
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Jump(BlockId(2)));
    let dead = f.add_block("dead", Terminator::Jump(BlockId(2)));
    let exit = f.add_block("exit", Terminator::Ret(None));
    let slot = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: slot });
    f.push(entry, Inst::Store { value: Operand::Const(1), addr: slot.into() });
    f.push(dead, Inst::Store { value: Operand::Const(2), addr: slot.into() });
    let v = f.fresh_value();
    f.push(exit, Inst::Load { dest: v, addr: slot.into() });
    f.block_mut(exit).term = Terminator::Ret(Some(v.into()));

    let stats = promote(&mut f);
    assert_eq!(f.blocks.len(), 2);
    assert_eq!(stats.phis, 0);
    assert_eq!(f.blocks[1].term, Terminator::Ret(Some(Operand::Const(1))));
    assert_valid_ssa(&f);
  }

  #[test]
  fn test_copy_through_loaded_value_is_resolved() {
    // b = a; return b
    let mut f = Function::new("f");
    let entry = f.add_block("entry", Terminator::Ret(None));
    let a = f.fresh_value();
    let b = f.fresh_value();
    f.push(entry, Inst::Alloca { dest: a });
    f.push(entry, Inst::Alloca { dest: b });
    f.push(entry, Inst::Store { value: Operand::Const(9), addr: a.into() });
    let t = f.fresh_value();
    f.push(entry, Inst::Load { dest: t, addr: a.into() });
    f.push(entry, Inst::Store { value: t.into(), addr: b.into() });
    let u = f.fresh_value();
    f.push(entry, Inst::Load { dest: u, addr: b.into() });
    f.block_mut(entry).term = Terminator::Ret(Some(u.into()));

    promote(&mut f);
    assert_eq!(f.blocks[0].term, Terminator::Ret(Some(Operand::Const(9))));
  }

  #[test]
  fn test_deep_dominator_tree_renames_iteratively() {
    let n = 50_000;
    let mut f = Function::new("deep");
    for i in 0..n {
      let term = if i + 1 < n {
        Terminator::Jump(BlockId(i + 1))
      } else {
        Terminator::Ret(None)
      };
      f.add_block(format!("b{}", i), term);
    }
    let slot = f.fresh_value();
    f.push(BlockId(0), Inst::Alloca { dest: slot });
    for i in 0..n {
      f.push(BlockId(i), Inst::Store { value: Operand::Const(i as i64), addr: slot.into() });
    }
    let v = f.fresh_value();
    f.push(BlockId(n - 1), Inst::Load { dest: v, addr: slot.into() });
    f.block_mut(BlockId(n - 1)).term = Terminator::Ret(Some(v.into()));

    let stats = promote(&mut f);
    assert_eq!(stats.stores, n);
    assert_eq!(
      f.blocks[n - 1].term,
      Terminator::Ret(Some(Operand::Const(n as i64 - 1)))
    );
  }
}
