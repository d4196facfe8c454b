//! Dependency graph over tasks.
//!
//! `TaskGraph` is an ordering-only projection of a task list: ids, edges and
//! parallel groups. It assigns groups by bounded relaxation, reports cycles
//! without failing, and produces an execution order that leaves cyclic
//! components (and everything downstream of them) out.

use crate::core::task::{Task, TaskId};
use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Ordering projection of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: TaskId,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub parallel_group: u32,
}

impl GraphNode {
    pub fn new<I, T>(id: impl Into<TaskId>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        Self {
            id: id.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
            parallel_group: 0,
        }
    }
}

impl From<&Task> for GraphNode {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            depends_on: task.depends_on.clone(),
            parallel_group: task.parallel_group,
        }
    }
}

/// Result of ordering a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologicalOrder {
    /// Every orderable task, each after all of its known dependencies.
    pub order: Vec<TaskId>,
    /// Nodes at which the depth-first walk closed a cycle.
    pub cycles: Vec<TaskId>,
    /// Members of each cyclic strongly connected component.
    pub cyclic_components: Vec<Vec<TaskId>>,
    /// Acyclic tasks that depend, directly or transitively, on a cycle.
    pub blocked: Vec<TaskId>,
}

impl TopologicalOrder {
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty() && self.cyclic_components.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Dependency graph with index lookups.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<TaskId, usize>,
}

impl TaskGraph {
    /// Build a graph. A repeated id keeps its first node.
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        let mut graph = Self::default();
        for node in nodes {
            if graph.index.contains_key(&node.id) {
                continue;
            }
            graph.index.insert(node.id.clone(), graph.nodes.len());
            graph.nodes.push(node);
        }
        graph
    }

    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self::new(tasks.iter().map(GraphNode::from).collect())
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<GraphNode> {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn group_of(&self, id: &TaskId) -> Option<u32> {
        self.index.get(id).map(|&i| self.nodes[i].parallel_group)
    }

    /// Indices of dependencies that exist in the graph, self-edges excluded.
    fn known_deps(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[i]
            .depends_on
            .iter()
            .filter_map(|dep| self.index.get(dep).copied())
            .filter(move |&j| j != i)
    }

    /// Raise every node's group above all of its dependencies' groups.
    ///
    /// Starts from each node's current `parallel_group` (0 or a hint) and
    /// only ever raises values. On a DAG the longest dependency chain has at
    /// most `n - 1` edges and each full pass settles at least one more edge of
    /// it, so `n` passes always reach the fixed point; on a cyclic graph the
    /// same bound stops the climb. Returns the number of passes run.
    pub fn assign_parallel_groups(&mut self) -> usize {
        let n = self.nodes.len();
        let mut passes = 0;
        while passes < n {
            passes += 1;
            let mut changed = false;
            for i in 0..n {
                let required = self
                    .known_deps(i)
                    .map(|j| self.nodes[j].parallel_group.saturating_add(1))
                    .max();
                if let Some(required) = required {
                    if required > self.nodes[i].parallel_group {
                        self.nodes[i].parallel_group = required;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        passes
    }

    /// Depth-first cycle check with visiting/visited marks.
    ///
    /// Returns each node that a back edge reached, in discovery order. The
    /// walk keeps its own frame stack, so chain depth is bounded by memory.
    pub fn detect_cycles(&self) -> Vec<TaskId> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut found = Vec::new();
        let mut reported = HashSet::new();
        // (node, position in its depends_on list)
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::Visiting;
            stack.push((root, 0));
            while let Some(frame) = stack.last_mut() {
                let (i, pos) = *frame;
                let Some(dep) = self.nodes[i].depends_on.get(pos) else {
                    marks[i] = Mark::Visited;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;
                let Some(&j) = self.index.get(dep) else {
                    continue;
                };
                match marks[j] {
                    Mark::Visiting => {
                        if reported.insert(j) {
                            found.push(self.nodes[j].id.clone());
                        }
                    }
                    Mark::Unvisited => {
                        marks[j] = Mark::Visiting;
                        stack.push((j, 0));
                    }
                    Mark::Visited => {}
                }
            }
        }
        found
    }

    /// Strongly connected components that contain a cycle, including
    /// single nodes that depend on themselves.
    pub fn cyclic_components(&self) -> Vec<Vec<usize>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let handles: Vec<_> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                if let Some(&j) = self.index.get(dep) {
                    graph.add_edge(handles[j], handles[i], ());
                }
            }
        }

        let mut components: Vec<Vec<usize>> = kosaraju_scc(&graph)
            .into_iter()
            .map(|scc| scc.into_iter().map(|h| graph[h]).collect::<Vec<_>>())
            .filter(|members| {
                members.len() > 1
                    || members
                        .first()
                        .map(|&i| self.nodes[i].depends_on.contains(&self.nodes[i].id))
                        .unwrap_or(false)
            })
            .collect();
        for members in &mut components {
            members.sort_unstable();
        }
        components.sort();
        components
    }

    /// Nodes outside `cyclic` that transitively depend on a node inside it.
    fn downstream_of(&self, cyclic: &HashSet<usize>) -> HashSet<usize> {
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for i in 0..self.nodes.len() {
            for j in self.known_deps(i) {
                dependents[j].push(i);
            }
        }

        let mut blocked = HashSet::new();
        let mut queue: VecDeque<usize> = cyclic.iter().copied().collect();
        while let Some(j) = queue.pop_front() {
            for &i in &dependents[j] {
                if !cyclic.contains(&i) && blocked.insert(i) {
                    queue.push_back(i);
                }
            }
        }
        blocked
    }

    /// Order tasks so each follows its dependencies.
    ///
    /// Depth-first post-order: each unvisited task first visits its
    /// dependencies, then is appended. Dependencies missing from the graph
    /// count as satisfied. Tasks listed in `seed` are visited first, then the
    /// rest in graph order. Cyclic components and their downstream tasks are
    /// reported and left out of `order`.
    pub fn topological_sort(&self, seed: &[TaskId]) -> TopologicalOrder {
        let cycles = self.detect_cycles();
        let components = self.cyclic_components();
        let cyclic: HashSet<usize> = components.iter().flatten().copied().collect();
        let blocked = self.downstream_of(&cyclic);

        let mut excluded: HashSet<usize> = cyclic.clone();
        excluded.extend(blocked.iter().copied());

        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len() - excluded.len());
        let starts = seed
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .chain(0..self.nodes.len());
        for i in starts {
            self.visit_in_order(i, &excluded, &mut visited, &mut order);
        }

        let mut blocked: Vec<usize> = blocked.into_iter().collect();
        blocked.sort_unstable();

        TopologicalOrder {
            order: order.into_iter().map(|i| self.nodes[i].id.clone()).collect(),
            cycles,
            cyclic_components: components
                .iter()
                .map(|members| members.iter().map(|&i| self.nodes[i].id.clone()).collect())
                .collect(),
            blocked: blocked.into_iter().map(|i| self.nodes[i].id.clone()).collect(),
        }
    }

    /// Post-order walk from `root` over known dependencies.
    fn visit_in_order(
        &self,
        root: usize,
        excluded: &HashSet<usize>,
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if visited[root] || excluded.contains(&root) {
            return;
        }
        // Marked before descending; the remaining subgraph is acyclic, so
        // this only guards against revisits.
        visited[root] = true;
        let mut stack: Vec<(usize, Vec<usize>, usize)> =
            vec![(root, self.known_deps(root).collect(), 0)];
        while let Some((i, deps, pos)) = stack.last_mut() {
            if let Some(&j) = deps.get(*pos) {
                *pos += 1;
                if !visited[j] && !excluded.contains(&j) {
                    visited[j] = true;
                    stack.push((j, self.known_deps(j).collect(), 0));
                }
            } else {
                order.push(*i);
                stack.pop();
            }
        }
    }

    /// Group ids by tier, ascending, skipping `excluded` ids.
    pub fn parallel_groups(&self, excluded: &HashSet<TaskId>) -> Vec<(u32, Vec<TaskId>)> {
        let mut tiers: std::collections::BTreeMap<u32, Vec<TaskId>> = Default::default();
        for node in &self.nodes {
            if excluded.contains(&node.id) {
                continue;
            }
            tiers
                .entry(node.parallel_group)
                .or_default()
                .push(node.id.clone());
        }
        tiers.into_iter().collect()
    }
}
