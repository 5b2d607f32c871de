//! Leveled dependency graph
//!
//! A [`DependencyGraph`] only exists for acyclic input. Levels come from
//! Kahn's algorithm: roots sit at level 0 and every other atom sits one
//! level past its deepest prerequisite, so all atoms of one level are
//! mutually independent and can run as a single wave.

use crate::edge::{AtomNode, DependencyEdge, EdgeKind};
use crate::error::GraphError;
use aee_atom::AtomId;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// All atoms sharing one topological level, sorted by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionWave {
    pub level: usize,
    pub atoms: Vec<AtomId>,
}

impl ExecutionWave {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &AtomId) -> bool {
        self.atoms.binary_search(id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AtomId> {
        self.atoms.iter()
    }
}

/// Whether an atom's output leaves its module or component
///
/// A boundary atom has at least one dependent declared in a different
/// module (or component). Boundaries trigger the higher validation gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Boundary {
    pub module: bool,
    pub component: bool,
}

impl Boundary {
    #[inline]
    #[must_use]
    pub fn any(self) -> bool {
        self.module || self.component
    }
}

#[derive(Debug, Clone)]
struct Placement {
    index: NodeIndex,
    module: String,
    component: String,
    level: usize,
    boundary: Boundary,
}

/// Summary numbers for logs and reports
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub atoms: usize,
    pub edges: usize,
    pub waves: usize,
    pub widest_wave: usize,
    pub modules: usize,
    pub components: usize,
    pub module_boundaries: usize,
    pub component_boundaries: usize,
    pub edges_by_kind: BTreeMap<EdgeKind, usize>,
}

/// Acyclic, leveled dependency graph over a fixed atom set
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<AtomId, EdgeKind>,
    placements: BTreeMap<AtomId, Placement>,
    edges: Vec<DependencyEdge>,
    waves: Vec<ExecutionWave>,
}

impl DependencyGraph {
    pub(crate) fn level(
        nodes: BTreeMap<AtomId, AtomNode>,
        edges: Vec<DependencyEdge>,
    ) -> Result<Self, GraphError> {
        let mut graph: DiGraph<AtomId, EdgeKind> =
            DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index: HashMap<AtomId, NodeIndex> = HashMap::with_capacity(nodes.len());
        for id in nodes.keys() {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }
        for edge in &edges {
            if let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) {
                graph.add_edge(from, to, edge.kind);
            }
        }

        let mut members: Vec<AtomId> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .map(|ix| graph[ix].clone())
            .collect();
        if !members.is_empty() {
            members.sort();
            tracing::warn!(members = ?members, "dependency cycle detected");
            return Err(GraphError::CycleDetected { members });
        }

        let levels = kahn_levels(&graph)?;

        let mut placements = BTreeMap::new();
        for (id, node) in nodes {
            let ix = index[&id];
            placements.insert(
                id,
                Placement {
                    index: ix,
                    module: node.module,
                    component: node.component,
                    level: levels[ix.index()],
                    boundary: Boundary::default(),
                },
            );
        }

        for edge in &edges {
            let (Some(from), Some(to)) = (placements.get(&edge.from), placements.get(&edge.to))
            else {
                continue;
            };
            let crosses_module = from.module != to.module || from.component != to.component;
            let crosses_component = from.component != to.component;
            if let Some(from) = placements.get_mut(&edge.from) {
                from.boundary.module |= crosses_module;
                from.boundary.component |= crosses_component;
            }
        }

        let depth = placements.values().map(|p| p.level + 1).max().unwrap_or(0);
        let mut waves: Vec<ExecutionWave> = (0..depth)
            .map(|level| ExecutionWave { level, atoms: Vec::new() })
            .collect();
        // placements iterate in id order, so every wave comes out sorted
        for (id, placement) in &placements {
            waves[placement.level].atoms.push(id.clone());
        }

        tracing::info!(
            atoms = placements.len(),
            edges = edges.len(),
            waves = waves.len(),
            "dependency graph leveled"
        );

        Ok(Self {
            graph,
            placements,
            edges,
            waves,
        })
    }

    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.placements.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn contains(&self, id: &AtomId) -> bool {
        self.placements.contains_key(id)
    }

    /// Every edge, sorted by (from, to)
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Waves in execution order
    #[must_use]
    pub fn waves(&self) -> &[ExecutionWave] {
        &self.waves
    }

    #[must_use]
    pub fn wave(&self, level: usize) -> Option<&ExecutionWave> {
        self.waves.get(level)
    }

    #[must_use]
    pub fn level_of(&self, id: &AtomId) -> Option<usize> {
        self.placements.get(id).map(|p| p.level)
    }

    #[must_use]
    pub fn boundary(&self, id: &AtomId) -> Boundary {
        self.placements.get(id).map(|p| p.boundary).unwrap_or_default()
    }

    #[must_use]
    pub fn module_of(&self, id: &AtomId) -> Option<&str> {
        self.placements.get(id).map(|p| p.module.as_str())
    }

    #[must_use]
    pub fn component_of(&self, id: &AtomId) -> Option<&str> {
        self.placements.get(id).map(|p| p.component.as_str())
    }

    /// Direct prerequisites, sorted
    #[must_use]
    pub fn dependencies_of(&self, id: &AtomId) -> Vec<AtomId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents, sorted
    #[must_use]
    pub fn dependents_of(&self, id: &AtomId) -> Vec<AtomId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Every atom reachable from `id`, excluding `id`, sorted
    #[must_use]
    pub fn transitive_dependents(&self, id: &AtomId) -> Vec<AtomId> {
        let Some(start) = self.placements.get(id) else {
            return Vec::new();
        };
        let mut seen: BTreeSet<AtomId> = BTreeSet::new();
        let mut queue = VecDeque::from([start.index]);
        while let Some(ix) = queue.pop_front() {
            for next in self.graph.neighbors_directed(ix, Direction::Outgoing) {
                if seen.insert(self.graph[next].clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Declared modules, qualified as `component/module`, sorted
    #[must_use]
    pub fn modules(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .placements
            .values()
            .map(|p| qualified(&p.component, &p.module))
            .collect();
        set.into_iter().collect()
    }

    #[must_use]
    pub fn components(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.placements.values().map(|p| p.component.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Qualified module name of an atom (`component/module`)
    #[must_use]
    pub fn qualified_module_of(&self, id: &AtomId) -> Option<String> {
        self.placements.get(id).map(|p| qualified(&p.component, &p.module))
    }

    /// Atoms of a qualified module, sorted
    #[must_use]
    pub fn module_members(&self, qualified_module: &str) -> Vec<AtomId> {
        self.placements
            .iter()
            .filter(|(_, p)| qualified(&p.component, &p.module) == qualified_module)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Atoms of a component, sorted
    #[must_use]
    pub fn component_members(&self, component: &str) -> Vec<AtomId> {
        self.placements
            .iter()
            .filter(|(_, p)| p.component == component)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Level of the last wave that contains an atom of this module
    #[must_use]
    pub fn module_completion_level(&self, qualified_module: &str) -> Option<usize> {
        self.placements
            .values()
            .filter(|p| qualified(&p.component, &p.module) == qualified_module)
            .map(|p| p.level)
            .max()
    }

    /// Level of the last wave that contains an atom of this component
    #[must_use]
    pub fn component_completion_level(&self, component: &str) -> Option<usize> {
        self.placements
            .values()
            .filter(|p| p.component == component)
            .map(|p| p.level)
            .max()
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut edges_by_kind = BTreeMap::new();
        for edge in &self.edges {
            *edges_by_kind.entry(edge.kind).or_insert(0) += 1;
        }
        GraphStats {
            atoms: self.atom_count(),
            edges: self.edge_count(),
            waves: self.waves.len(),
            widest_wave: self.waves.iter().map(ExecutionWave::len).max().unwrap_or(0),
            modules: self.modules().len(),
            components: self.components().len(),
            module_boundaries: self.placements.values().filter(|p| p.boundary.module).count(),
            component_boundaries: self
                .placements
                .values()
                .filter(|p| p.boundary.component)
                .count(),
            edges_by_kind,
        }
    }

    fn neighbors(&self, id: &AtomId, direction: Direction) -> Vec<AtomId> {
        let Some(placement) = self.placements.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<AtomId> = self
            .graph
            .neighbors_directed(placement.index, direction)
            .map(|ix| self.graph[ix].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

fn qualified(component: &str, module: &str) -> String {
    format!("{component}/{module}")
}

/// Longest-path level of every node, computed with an iterative Kahn pass
fn kahn_levels(graph: &DiGraph<AtomId, EdgeKind>) -> Result<Vec<usize>, GraphError> {
    let n = graph.node_count();
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|ix| graph.neighbors_directed(ix, Direction::Incoming).count())
        .collect();
    let mut levels = vec![0usize; n];
    let mut queue: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|ix| in_degree[ix.index()] == 0)
        .collect();

    let mut visited = 0usize;
    while let Some(ix) = queue.pop_front() {
        visited += 1;
        let level = levels[ix.index()];
        for next in graph.neighbors_directed(ix, Direction::Outgoing) {
            let slot = next.index();
            levels[slot] = levels[slot].max(level + 1);
            in_degree[slot] -= 1;
            if in_degree[slot] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited < n {
        let mut members: Vec<AtomId> = graph
            .node_indices()
            .filter(|ix| in_degree[ix.index()] > 0)
            .map(|ix| graph[ix].clone())
            .collect();
        members.sort();
        return Err(GraphError::CycleDetected { members });
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use crate::builder::GraphBuilder;
    use crate::error::GraphError;
    use aee_atom::{AtomId, AtomSpec, AtomicUnit};

    fn atom(id: &str, deps: &[&str]) -> AtomicUnit {
        deps.iter()
            .fold(AtomicUnit::new(id, "t", AtomSpec::new(id)), |a, d| a.depends_on(*d))
    }

    fn ids(list: &[&str]) -> Vec<AtomId> {
        list.iter().map(|s| AtomId::new(*s)).collect()
    }

    #[test]
    fn independent_atoms_share_one_wave() {
        let atoms: Vec<_> = ["e", "b", "a", "d", "c"].iter().map(|id| atom(id, &[])).collect();
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();
        assert_eq!(graph.waves().len(), 1);
        assert_eq!(graph.waves()[0].atoms, ids(&["a", "b", "c", "d", "e"]));
    }

    #[test]
    fn chain_yields_one_atom_per_wave() {
        let atoms = [atom("a", &[]), atom("b", &["a"]), atom("c", &["b"])];
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();
        let waves: Vec<_> = graph.waves().iter().map(|w| w.atoms.clone()).collect();
        assert_eq!(waves, vec![ids(&["a"]), ids(&["b"]), ids(&["c"])]);
    }

    #[test]
    fn diamond_levels() {
        let atoms = [
            atom("a", &[]),
            atom("b", &["a"]),
            atom("c", &["a"]),
            atom("d", &["b", "c"]),
        ];
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();
        let waves: Vec<_> = graph.waves().iter().map(|w| w.atoms.clone()).collect();
        assert_eq!(waves, vec![ids(&["a"]), ids(&["b", "c"]), ids(&["d"])]);
        assert_eq!(graph.transitive_dependents(&AtomId::new("a")), ids(&["b", "c", "d"]));
        assert_eq!(graph.dependencies_of(&AtomId::new("d")), ids(&["b", "c"]));
    }

    #[test]
    fn level_is_longest_path() {
        // a -> b -> c, and a -> c directly: c still waits for b
        let atoms = [atom("a", &[]), atom("b", &["a"]), atom("c", &["a", "b"])];
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();
        assert_eq!(graph.level_of(&AtomId::new("c")), Some(2));
    }

    #[test]
    fn cycle_reports_all_members_sorted() {
        let atoms = [
            atom("c", &["b"]),
            atom("a", &["c"]),
            atom("b", &["a"]),
            atom("x", &[]),
        ];
        let err = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap_err();
        assert_eq!(err, GraphError::CycleDetected { members: ids(&["a", "b", "c"]) });
    }

    #[test]
    fn boundaries_follow_declared_modules() {
        let a = AtomicUnit::new("a", "t", AtomSpec::new("a").in_module("app", "auth"));
        let b = AtomicUnit::new("b", "t", AtomSpec::new("b").in_module("app", "auth")).depends_on("a");
        let c = AtomicUnit::new("c", "t", AtomSpec::new("c").in_module("app", "api")).depends_on("b");
        let d = AtomicUnit::new("d", "t", AtomSpec::new("d").in_module("web", "ui")).depends_on("c");
        let graph = GraphBuilder::new().add_atoms([a, b, c, d].iter()).unwrap().build().unwrap();

        assert!(!graph.boundary(&AtomId::new("a")).any());
        assert!(graph.boundary(&AtomId::new("b")).module);
        assert!(!graph.boundary(&AtomId::new("b")).component);
        assert!(graph.boundary(&AtomId::new("c")).component);
        assert_eq!(graph.module_members("app/auth"), ids(&["a", "b"]));
        assert_eq!(graph.module_completion_level("app/auth"), Some(1));
        assert_eq!(graph.component_completion_level("app"), Some(2));

        let stats = graph.stats();
        assert_eq!(stats.modules, 3);
        assert_eq!(stats.components, 2);
        assert_eq!(stats.module_boundaries, 2);
        assert_eq!(stats.component_boundaries, 1);
    }

    #[test]
    fn empty_input_has_no_waves() {
        let graph = GraphBuilder::new().build().unwrap();
        assert!(graph.waves().is_empty());
        assert_eq!(graph.stats().atoms, 0);
    }
}
