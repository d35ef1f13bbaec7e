// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tracing::debug;

use crate::errors::CycleError;
use crate::manifest::{Dependency, Manifest};
use crate::step_id::StepId;

/// Directed acyclic graph over every step and snapshot in a manifest.
///
/// Edge direction: dependency -> dependent. For
///
/// ```toml
/// [step."data://garden/who/2024-01-01/gho"]
/// deps = ["data://meadow/who/2024-01-01/gho"]
/// ```
///
/// we add the edge `meadow/... -> garden/...`.
#[derive(Debug, Clone)]
pub struct StepGraph {
    manifest: Manifest,
    graph: DiGraph<StepId, ()>,
    index: HashMap<StepId, NodeIndex>,
    /// Direct dependencies per node, sorted by identifier.
    deps: HashMap<StepId, Vec<StepId>>,
    /// Direct dependents per node, sorted by identifier.
    dependents: HashMap<StepId, Vec<StepId>>,
}

impl StepGraph {
    /// Build the graph from a validated manifest, rejecting cycles.
    pub fn build(manifest: Manifest) -> Result<Self, CycleError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for id in manifest.snapshots().keys().chain(manifest.steps().keys()) {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }

        let mut deps: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut dependents: HashMap<StepId, Vec<StepId>> =
            index.keys().map(|id| (id.clone(), Vec::new())).collect();

        for (id, step) in manifest.steps() {
            let mut direct: Vec<StepId> = step.deps.iter().map(|d| d.id().clone()).collect();
            direct.sort();
            for dep in &direct {
                graph.add_edge(index[dep], index[id], ());
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(id.clone());
                }
            }
            deps.insert(id.clone(), direct);
        }
        for id in manifest.snapshots().keys() {
            deps.insert(id.clone(), Vec::new());
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        let built = Self {
            manifest,
            graph,
            index,
            deps,
            dependents,
        };
        built.detect_cycle()?;

        debug!(
            nodes = built.graph.node_count(),
            edges = built.graph.edge_count(),
            "built step graph"
        );
        Ok(built)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.index.contains_key(id)
    }

    pub fn is_step(&self, id: &StepId) -> bool {
        self.manifest.step(id).is_some()
    }

    /// All step identifiers (snapshots excluded), sorted.
    pub fn step_ids(&self) -> impl Iterator<Item = &StepId> {
        self.manifest.steps().keys()
    }

    /// Direct dependencies (steps and snapshots), sorted by identifier.
    pub fn dependencies_of(&self, id: &StepId) -> &[StepId] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents, sorted by identifier.
    pub fn dependents_of(&self, id: &StepId) -> &[StepId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependencies that are steps (snapshots filtered out).
    pub fn step_dependencies_of(&self, id: &StepId) -> Vec<&StepId> {
        match self.manifest.step(id) {
            Some(step) => {
                let mut out: Vec<&StepId> = step
                    .deps
                    .iter()
                    .filter_map(|d| match d {
                        Dependency::Step(dep) => Some(dep),
                        Dependency::Snapshot(_) => None,
                    })
                    .collect();
                out.sort();
                out
            }
            None => Vec::new(),
        }
    }

    /// `targets` plus everything they transitively depend on, snapshots included.
    pub fn closure<'a, I>(&self, targets: I) -> BTreeSet<StepId>
    where
        I: IntoIterator<Item = &'a StepId>,
    {
        let reversed = Reversed(&self.graph);
        let mut out = BTreeSet::new();

        for target in targets {
            let Some(&start) = self.index.get(target) else {
                continue;
            };
            if out.contains(target) {
                continue;
            }
            let mut dfs = Dfs::new(reversed, start);
            while let Some(node) = dfs.next(reversed) {
                out.insert(self.graph[node].clone());
            }
        }

        out
    }

    /// Every step that transitively depends on `id` (not including `id`).
    pub fn downstream_of(&self, id: &StepId) -> BTreeSet<StepId> {
        let mut out = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return out;
        };

        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    /// Steps in the transitive closure of `targets`, ordered so that every
    /// dependency comes strictly before its dependents. Among steps that are
    /// ready at the same time the lexically smallest identifier goes first.
    ///
    /// Snapshots are leaves outside the build and are not part of the order.
    pub fn topological_order<'a, I>(&self, targets: I) -> Vec<StepId>
    where
        I: IntoIterator<Item = &'a StepId>,
    {
        let members: BTreeSet<StepId> = self
            .closure(targets)
            .into_iter()
            .filter(|id| self.is_step(id))
            .collect();

        let mut in_degree: BTreeMap<&StepId, usize> = members
            .iter()
            .map(|id| {
                let n = self
                    .step_dependencies_of(id)
                    .into_iter()
                    .filter(|d| members.contains(*d))
                    .count();
                (id, n)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<&StepId>> = in_degree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id.clone());
            for dependent in self.dependents_of(id) {
                if let Some(n) = in_degree.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        order
    }

    /// Group an already topologically ordered list into ranks: rank 0 has no
    /// dependencies inside `order`, rank n depends on something in rank n-1.
    /// Steps within one rank have no dependency relationship.
    pub fn ranks(&self, order: &[StepId]) -> BTreeMap<StepId, usize> {
        let mut ranks: BTreeMap<StepId, usize> = BTreeMap::new();
        for id in order {
            let rank = self
                .step_dependencies_of(id)
                .into_iter()
                .filter_map(|d| ranks.get(d))
                .map(|r| r + 1)
                .max()
                .unwrap_or(0);
            ranks.insert(id.clone(), rank);
        }
        ranks
    }

    /// Depth-first traversal along "depends on" edges with an explicit
    /// recursion stack; a node met again while still on the stack closes a
    /// cycle. Roots and neighbours are visited in identifier order so the
    /// reported cycle is deterministic.
    fn detect_cycle(&self) -> Result<(), CycleError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks: HashMap<NodeIndex, Mark> = self
            .graph
            .node_indices()
            .map(|n| (n, Mark::Unvisited))
            .collect();

        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        for root in roots {
            if marks[&root] != Mark::Unvisited {
                continue;
            }

            // (node, its sorted dependencies, next dependency to visit)
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
                vec![(root, self.sorted_deps(root), 0)];
            marks.insert(root, Mark::OnStack);

            while let Some((node, children, next)) = stack.last_mut() {
                if *next >= children.len() {
                    marks.insert(*node, Mark::Done);
                    stack.pop();
                    continue;
                }

                let child = children[*next];
                *next += 1;

                match marks[&child] {
                    Mark::Unvisited => {
                        marks.insert(child, Mark::OnStack);
                        let grandchildren = self.sorted_deps(child);
                        stack.push((child, grandchildren, 0));
                    }
                    Mark::OnStack => {
                        let start = stack
                            .iter()
                            .position(|(n, _, _)| *n == child)
                            .unwrap_or(0);
                        let mut members: Vec<StepId> = stack[start..]
                            .iter()
                            .map(|(n, _, _)| self.graph[*n].clone())
                            .collect();
                        members.push(self.graph[child].clone());
                        return Err(CycleError { members });
                    }
                    Mark::Done => {}
                }
            }
        }

        Ok(())
    }

    fn sorted_deps(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        deps.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        deps
    }
}
