//! Dependency-ordered build queue.
//!
//! Targets form a DAG through their dependency ids. The queue orders them so
//! dependencies build before dependents, rejects cycles, and decides which
//! targets need work this cycle: a target that needs a build forces a rebuild
//! of everything downstream of it.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;

use super::BuildError;
use crate::model::{TargetId, TargetSpec};
use crate::state::BuildStateSet;

/// Visit marker for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
  InProgress,
  Done,
}

/// Targets in build order, with the set that needs building.
#[derive(Debug)]
pub struct TargetQueue {
  /// Edges run from dependency to dependent.
  graph: DiGraph<TargetId, ()>,
  nodes: HashMap<TargetId, NodeIndex>,
  order: Vec<TargetId>,
  dirty: BTreeSet<TargetId>,
}

impl TargetQueue {
  /// Order `specs` and mark the targets that need building.
  ///
  /// # Errors
  ///
  /// Returns [`BuildError::MissingDependency`] when a dependency is not in
  /// `specs` and [`BuildError::Cycle`] when dependencies form a cycle.
  pub fn new(specs: &[TargetSpec], state: &BuildStateSet) -> Result<Self, BuildError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for spec in specs {
      let id = spec.id();
      if !nodes.contains_key(&id) {
        nodes.insert(id.clone(), graph.add_node(id));
      }
    }

    for spec in specs {
      let dependent = nodes[&spec.id()];
      for dep in spec.dependency_ids() {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(BuildError::MissingDependency {
            target: spec.id(),
            dependency: dep.clone(),
          });
        };
        graph.update_edge(dep_idx, dependent, ());
      }
    }

    let order = topological_order(&graph)?;

    let mut dirty = BTreeSet::new();
    for idx in graph.node_indices() {
      let id = &graph[idx];
      if !needs_own_build(id, state) || dirty.contains(id) {
        continue;
      }
      let mut bfs = Bfs::new(&graph, idx);
      while let Some(downstream) = bfs.next(&graph) {
        dirty.insert(graph[downstream].clone());
      }
    }

    Ok(Self {
      graph,
      nodes,
      order,
      dirty,
    })
  }

  /// Every target, dependencies first.
  pub fn order(&self) -> &[TargetId] {
    &self.order
  }

  /// Whether `id` must be built or deployed this cycle.
  pub fn needs_build(&self, id: &TargetId) -> bool {
    self.dirty.contains(id)
  }

  /// Targets needing work, in build order.
  pub fn to_build(&self) -> Vec<TargetId> {
    self.order.iter().filter(|id| self.dirty.contains(*id)).cloned().collect()
  }

  /// Direct dependencies of `id`.
  pub fn dependencies(&self, id: &TargetId) -> Vec<TargetId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let mut deps: Vec<TargetId> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|n| self.graph[n].clone())
      .collect();
    deps.sort();
    deps
  }
}

/// A target needs its own build when it has never produced a result or has
/// files changed since its last one.
fn needs_own_build(id: &TargetId, state: &BuildStateSet) -> bool {
  match state.get(id) {
    None => true,
    Some(s) => s.last_result.is_empty() || s.has_changed_files(),
  }
}

/// Depth-first order over the dependency edges with an explicit work list.
///
/// Meeting a node that is still in progress means the path loops back on
/// itself.
fn topological_order(graph: &DiGraph<TargetId, ()>) -> Result<Vec<TargetId>, BuildError> {
  let mut claims: HashMap<NodeIndex, Claim> = HashMap::new();
  let mut order = Vec::with_capacity(graph.node_count());

  for start in graph.node_indices() {
    if claims.contains_key(&start) {
      continue;
    }
    let mut stack = vec![(start, false)];
    while let Some((node, expanded)) = stack.pop() {
      if expanded {
        claims.insert(node, Claim::Done);
        order.push(graph[node].clone());
        continue;
      }
      match claims.get(&node) {
        Some(Claim::Done) => continue,
        Some(Claim::InProgress) => return Err(BuildError::Cycle(graph[node].clone())),
        None => {}
      }
      claims.insert(node, Claim::InProgress);
      stack.push((node, true));

      let mut deps: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Incoming).collect();
      // Reverse index order so dependencies pop in declaration order.
      deps.sort_by(|a, b| b.cmp(a));
      for dep in deps {
        match claims.get(&dep) {
          Some(Claim::Done) => {}
          Some(Claim::InProgress) => return Err(BuildError::Cycle(graph[dep].clone())),
          None => stack.push((dep, false)),
        }
      }
    }
  }

  Ok(order)
}
