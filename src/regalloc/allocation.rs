use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
  args::PassConfig,
  asm::{Function, Instr, Register},
  cfg::BlockId,
  regalloc::{
    check_allocated,
    interference::InterferenceGraph,
    liveness::{Liveness, MoveSite},
    spill,
  },
  registers::{consts::ALLOC_POOL_REGS, reg_from_color, PhysReg},
  utils::{Graph, MinHeap},
};

pub(super) type NodeId = usize;
pub(super) type MoveId = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum NodeState {
  Precolored,
  Initial,
  Simplify,
  Freeze,
  Spill,
  Coalesced,
  /// Removed from the graph and pushed on the select stack.
  Selected,
  Colored,
  Spilled,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum MoveState {
  Worklist,
  Active,
  Coalesced,
  Constrained,
  Frozen,
}

/// A register in one allocation round.
#[derive(Debug)]
pub(super) struct Node {
  pub reg: Register,
  pub degree: usize,
  pub moves: BTreeSet<MoveId>,
  pub alias: Option<NodeId>,
  pub color: Option<PhysReg>,
  pub state: NodeState,
}

/// All bookkeeping of one round of iterated register coalescing. Built from
/// scratch for every round and dropped at its end.
pub(super) struct Round<'a> {
  pub pool: &'a [PhysReg],
  pub k: usize,
  pub nodes: Vec<Node>,
  pub index: HashMap<Register, NodeId>,
  pub graph: Graph<NodeId>,
  pub moves: Vec<MoveSite>,
  pub move_state: Vec<MoveState>,
  pub simplify_worklist: BTreeSet<NodeId>,
  pub freeze_worklist: BTreeSet<NodeId>,
  pub spill_worklist: BTreeSet<NodeId>,
  pub move_worklist: BTreeSet<MoveId>,
  pub active_moves: BTreeSet<MoveId>,
  pub select_stack: Vec<NodeId>,
}

/// The allocator is responsible for mapping virtual registers to physical
/// registers, spilling to the stack when it runs out.
#[derive(Debug, Clone)]
pub struct Allocator {
  /// The registers colors are drawn from; color `i` is `pool[i]`.
  pool: Vec<PhysReg>,
  /// Whether moves are coalesced at all.
  coalesce: bool,
  /// Upper bound on spill-and-restart rounds.
  max_rounds: usize,
}

/// What an allocation did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationReport {
  pub rounds: usize,
  /// Registers actually spilled over all rounds.
  pub spilled: usize,
  /// Moves removed because their operands were coalesced.
  pub coalesced: usize,
  /// Moves removed because both operands got the same color.
  pub self_moves: usize,
}

impl Allocator {
  pub const DEFAULT_MAX_ROUNDS: usize = 256;

  /// `pool` must hold at least two registers: an instruction may read two
  /// spilled values at once.
  pub fn new(pool: Vec<PhysReg>) -> Self {
    if pool.len() < 2 {
      panic!("register pool of {} registers cannot hold two operands", pool.len());
    }
    Allocator {
      pool,
      coalesce: true,
      max_rounds: Self::DEFAULT_MAX_ROUNDS,
    }
  }

  pub fn from_config(config: &PassConfig) -> Self {
    let size = config
      .registers
      .unwrap_or(ALLOC_POOL_REGS.len())
      .min(ALLOC_POOL_REGS.len());
    let mut allocator = Self::new((0..size).map(reg_from_color).collect());
    allocator.coalesce = config.coalesce;
    allocator.max_rounds = config.max_rounds;
    allocator
  }

  pub fn with_coalescing(mut self, coalesce: bool) -> Self {
    self.coalesce = coalesce;
    self
  }

  pub fn k(&self) -> usize {
    self.pool.len()
  }

  /// Colors every virtual register of `func`, rewriting spilled ones through
  /// the stack until a round needs no spill, then applies the colors.
  pub fn allocate(&self, func: &mut Function) -> AllocationReport {
    if let Some(reg) = func.registers().into_iter().find(|r| r.is_spilled()) {
      panic!("{}: spilled register {} reached register allocation", func.name, reg);
    }
    func.reserve_virtuals();

    let mut report = AllocationReport::default();
    loop {
      report.rounds += 1;
      if report.rounds > self.max_rounds {
        panic!(
          "{}: no coloring with K = {} after {} rounds",
          func.name,
          self.k(),
          self.max_rounds
        );
      }

      let liveness = Liveness::compute(func);
      let igraph = InterferenceGraph::build(func, &liveness);
      let moves = if self.coalesce { liveness.moves } else { vec![] };
      let mut round = Round::new(&self.pool, &igraph, moves);
      round.run();
      let spilled = round.assign_colors();

      if spilled.is_empty() {
        let colors = round.color_map();
        let coalesced = round.coalesced_moves();
        report.coalesced = coalesced.len();
        report.self_moves = apply_colors(func, &colors, &coalesced);
        break;
      }

      log::debug!(
        "{}: round {} spills {} registers",
        func.name,
        report.rounds,
        spilled.len()
      );
      report.spilled += spilled.len();
      let fresh = spill::rewrite(func, &spilled);
      log::debug!("{}: spill code uses {} fresh registers", func.name, fresh.len());
    }

    if let Err(e) = check_allocated(func) {
      panic!("{}", e);
    }
    log::debug!(
      "{}: allocated in {} rounds, {} spilled, {} moves coalesced, frame {} bytes",
      func.name,
      report.rounds,
      report.spilled,
      report.coalesced,
      func.frame_size()
    );
    report
  }
}

/// Rewrites every register to its color, drops coalesced and self moves and,
/// when the frame is empty, the stack adjustments. Returns the number of self
/// moves dropped.
fn apply_colors(
  func: &mut Function,
  colors: &HashMap<Register, PhysReg>,
  coalesced: &HashSet<(BlockId, usize)>,
) -> usize {
  let name = func.name.clone();
  let color = |r: Register| match r {
    Register::Virtual(_) => match colors.get(&r) {
      Some(&reg) => Register::Precolored(reg),
      None => panic!("{}: no color for {}", name, r),
    },
    Register::Precolored(_) => r,
    Register::Spilled(_) => panic!("{}: {} survived spill rewriting", name, r),
  };

  let frame_empty = func.frame_size() == 0;
  let mut self_moves = 0;
  for (b, block) in func.blocks.iter_mut().enumerate() {
    let instrs = std::mem::take(&mut block.instrs);
    for (i, mut instr) in instrs.into_iter().enumerate() {
      if coalesced.contains(&(BlockId(b), i)) {
        continue;
      }
      instr.map_registers(color);
      match instr {
        Instr::Move { dest, src } if dest == src => self_moves += 1,
        Instr::SpGrow | Instr::SpRecover if frame_empty => {}
        instr => block.instrs.push(instr),
      }
    }
    for reg in block.term.uses_mut() {
      *reg = color(*reg);
    }
  }
  self_moves
}

impl<'a> Round<'a> {
  pub fn new(
    pool: &'a [PhysReg],
    igraph: &InterferenceGraph,
    moves: Vec<MoveSite>,
  ) -> Self {
    let mut round = Round {
      pool,
      k: pool.len(),
      nodes: vec![],
      index: HashMap::new(),
      graph: Graph::new(),
      move_state: vec![MoveState::Worklist; moves.len()],
      moves,
      simplify_worklist: BTreeSet::new(),
      freeze_worklist: BTreeSet::new(),
      spill_worklist: BTreeSet::new(),
      move_worklist: BTreeSet::new(),
      active_moves: BTreeSet::new(),
      select_stack: vec![],
    };

    for reg in igraph.nodes() {
      round.node_of(reg);
    }
    for reg in igraph.nodes() {
      let n = round.index[&reg];
      for other in igraph.neighbors(&reg).into_iter().flatten() {
        let m = round.node_of(*other);
        round.add_edge(n, m);
      }
    }
    for (id, site) in round.moves.clone().iter().enumerate() {
      let (d, s) = (round.node_of(site.dest), round.node_of(site.src));
      round.nodes[d].moves.insert(id);
      round.nodes[s].moves.insert(id);
      round.move_worklist.insert(id);
    }
    round.make_worklist();
    round
  }

  fn node_of(&mut self, reg: Register) -> NodeId {
    if let Some(&n) = self.index.get(&reg) {
      return n;
    }
    let (state, color) = match reg {
      Register::Precolored(phys) => (NodeState::Precolored, Some(phys)),
      _ => (NodeState::Initial, None),
    };
    self.nodes.push(Node {
      reg,
      degree: 0,
      moves: BTreeSet::new(),
      alias: None,
      color,
      state,
    });
    self.graph.add_node(self.nodes.len() - 1);
    self.index.insert(reg, self.nodes.len() - 1);
    self.nodes.len() - 1
  }

  pub fn is_precolored(&self, n: NodeId) -> bool {
    self.nodes[n].state == NodeState::Precolored
  }

  /// Precolored nodes count as having infinite degree.
  pub fn degree(&self, n: NodeId) -> usize {
    if self.is_precolored(n) {
      usize::MAX
    } else {
      self.nodes[n].degree
    }
  }

  pub fn add_edge(&mut self, a: NodeId, b: NodeId) {
    if self.graph.add_graph_edge(a, b) {
      self.nodes[a].degree += 1;
      self.nodes[b].degree += 1;
    }
  }

  /// Moves `n` to the worklist of `state`, keeping the sets in sync.
  pub fn set_state(&mut self, n: NodeId, state: NodeState) {
    match self.nodes[n].state {
      NodeState::Simplify => self.simplify_worklist.remove(&n),
      NodeState::Freeze => self.freeze_worklist.remove(&n),
      NodeState::Spill => self.spill_worklist.remove(&n),
      _ => false,
    };
    match state {
      NodeState::Simplify => self.simplify_worklist.insert(n),
      NodeState::Freeze => self.freeze_worklist.insert(n),
      NodeState::Spill => self.spill_worklist.insert(n),
      _ => false,
    };
    self.nodes[n].state = state;
  }

  pub fn set_move_state(&mut self, m: MoveId, state: MoveState) {
    match self.move_state[m] {
      MoveState::Worklist => self.move_worklist.remove(&m),
      MoveState::Active => self.active_moves.remove(&m),
      _ => false,
    };
    match state {
      MoveState::Worklist => self.move_worklist.insert(m),
      MoveState::Active => self.active_moves.insert(m),
      _ => false,
    };
    self.move_state[m] = state;
  }

  /// Neighbors still in the graph.
  pub fn adjacent(&self, n: NodeId) -> Vec<NodeId> {
    self
      .graph
      .neighbors(&n)
      .into_iter()
      .flatten()
      .copied()
      .filter(|&m| {
        !matches!(
          self.nodes[m].state,
          NodeState::Selected | NodeState::Coalesced
        )
      })
      .collect()
  }

  /// Moves of `n` that may still be coalesced.
  pub fn node_moves(&self, n: NodeId) -> Vec<MoveId> {
    self.nodes[n]
      .moves
      .iter()
      .copied()
      .filter(|&m| matches!(self.move_state[m], MoveState::Worklist | MoveState::Active))
      .collect()
  }

  pub fn move_related(&self, n: NodeId) -> bool {
    !self.node_moves(n).is_empty()
  }

  fn make_worklist(&mut self) {
    for n in 0..self.nodes.len() {
      if self.is_precolored(n) {
        continue;
      }
      let state = if self.degree(n) >= self.k {
        NodeState::Spill
      } else if self.move_related(n) {
        NodeState::Freeze
      } else {
        NodeState::Simplify
      };
      self.set_state(n, state);
    }
  }

  pub fn run(&mut self) {
    loop {
      if let Some(&n) = self.simplify_worklist.iter().next() {
        self.simplify(n);
      } else if let Some(&m) = self.move_worklist.iter().next() {
        self.coalesce(m);
      } else if let Some(&n) = self.freeze_worklist.iter().next() {
        self.freeze(n);
      } else if !self.spill_worklist.is_empty() {
        self.select_spill();
      } else {
        break;
      }
    }
  }

  fn simplify(&mut self, n: NodeId) {
    self.set_state(n, NodeState::Selected);
    self.select_stack.push(n);
    log::trace!("simplify {}", self.nodes[n].reg);
    for m in self.adjacent(n) {
      self.decrement_degree(m);
    }
  }

  pub fn decrement_degree(&mut self, m: NodeId) {
    if self.is_precolored(m) {
      return;
    }
    let d = self.nodes[m].degree;
    self.nodes[m].degree = d.saturating_sub(1);
    if d == self.k && self.nodes[m].state == NodeState::Spill {
      let mut nodes = self.adjacent(m);
      nodes.push(m);
      self.enable_moves(&nodes);
      if self.move_related(m) {
        self.set_state(m, NodeState::Freeze);
      } else {
        self.set_state(m, NodeState::Simplify);
      }
    }
  }

  pub fn enable_moves(&mut self, nodes: &[NodeId]) {
    for &n in nodes {
      for m in self.node_moves(n) {
        if self.move_state[m] == MoveState::Active {
          self.set_move_state(m, MoveState::Worklist);
        }
      }
    }
  }

  /// Picks the highest-degree spill candidate. Ties go to the lowest id.
  fn select_spill(&mut self) {
    let pick = self
      .spill_worklist
      .iter()
      .copied()
      .max_by_key(|&n| (self.degree(n), std::cmp::Reverse(n)));
    if let Some(m) = pick {
      log::trace!("potential spill {}", self.nodes[m].reg);
      self.set_state(m, NodeState::Simplify);
      self.freeze_moves(m);
    }
  }

  /// Pops the select stack and colors each node with the lowest color its
  /// neighbors leave free. Returns the registers that got no color.
  pub fn assign_colors(&mut self) -> Vec<Register> {
    let mut spilled = vec![];
    while let Some(n) = self.select_stack.pop() {
      let mut used = MinHeap::new();
      let neighbors: Vec<NodeId> = self.graph.neighbors(&n).into_iter().flatten().copied().collect();
      for w in neighbors {
        let a = self.get_alias(w);
        if matches!(
          self.nodes[a].state,
          NodeState::Colored | NodeState::Precolored
        ) {
          if let Some(c) = self.nodes[a]
            .color
            .and_then(|reg| self.pool.iter().position(|&p| p == reg))
          {
            used.push(c);
          }
        }
      }
      let c = used.find_smallest_absent();
      if c < self.k {
        self.nodes[n].color = Some(self.pool[c]);
        self.set_state(n, NodeState::Colored);
      } else {
        self.set_state(n, NodeState::Spilled);
        spilled.push(self.nodes[n].reg);
      }
    }

    for n in 0..self.nodes.len() {
      if self.nodes[n].state == NodeState::Coalesced {
        let a = self.get_alias(n);
        self.nodes[n].color = self.nodes[a].color;
      }
    }
    spilled
  }

  pub fn color_map(&self) -> HashMap<Register, PhysReg> {
    self
      .nodes
      .iter()
      .filter(|n| !matches!(n.state, NodeState::Precolored))
      .filter_map(|n| n.color.map(|c| (n.reg, c)))
      .collect()
  }

  pub fn coalesced_moves(&self) -> HashSet<(BlockId, usize)> {
    self
      .moves
      .iter()
      .zip(&self.move_state)
      .filter(|(_, &s)| s == MoveState::Coalesced)
      .map(|(site, _)| (site.block, site.index))
      .collect()
  }
}
