use std::collections::{BTreeMap, BTreeSet};

/// Undirected graph as an ordered adjacency map, so iteration is
/// deterministic from run to run.
#[derive(Clone, Debug)]
pub struct Graph<T: Ord>(BTreeMap<T, BTreeSet<T>>);

impl<T: Ord + Clone + Copy> Graph<T> {
  pub fn new() -> Self {
    Graph(BTreeMap::new())
  }

  /// Return the neighbors of a node
  ///
  /// # Return
  /// If the node does not exist, return None
  /// If there is no neighbor for this node, return an empty set
  pub fn neighbors(&self, node: &T) -> Option<&BTreeSet<T>> {
    self.0.get(node)
  }

  pub fn has_edge(&self, node1: &T, node2: &T) -> bool {
    self.0.get(node1).map_or(false, |n| n.contains(node2))
  }

  /// Return the vector of the references to all nodes
  pub fn nodes_ref(&self) -> Vec<&T> {
    self.0.keys().collect()
  }

  pub fn num_edges(&self) -> usize {
    self.0.values().map(BTreeSet::len).sum::<usize>() / 2
  }

  /// Idempotently add a node into the graph
  pub fn add_node(&mut self, node: T) {
    self.0.entry(node).or_default();
  }

  /// Add an edge between two nodes, i.e. node1 and node2. Self loops are
  /// ignored. Returns whether the edge is new.
  pub fn add_graph_edge(&mut self, node1: T, node2: T) -> bool {
    if node1 == node2 {
      return false;
    }
    let fresh = self.0.entry(node1).or_default().insert(node2);
    self.0.entry(node2).or_default().insert(node1);
    fresh
  }
}

impl<T: Ord + Clone + Copy> Default for Graph<T> {
  fn default() -> Self {
    Self::new()
  }
}
