//! Graph Builder
//!
//! Collects atoms, derives edges, rejects malformed input and hands back
//! a leveled [`DependencyGraph`].

use crate::edge::{AtomNode, DependencyEdge, EdgeKind, EdgePolicy};
use crate::error::GraphError;
use crate::graph::DependencyGraph;
use aee_atom::{AtomId, AtomicUnit};
use std::collections::BTreeMap;

/// Builder for dependency graphs
///
/// Usage:
/// ```rust,ignore
/// let graph = GraphBuilder::new()
///     .with_policy(SharedSymbols)
///     .add_atoms(store.snapshot().iter())?
///     .build()?;
/// for wave in graph.waves() { /* ... */ }
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<AtomId, AtomNode>,
    policies: Vec<Box<dyn EdgePolicy>>,
}

impl GraphBuilder {
    /// Builder that only honours declared dependencies
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge-derivation policy on top of declared dependencies
    #[must_use]
    pub fn with_policy(mut self, policy: impl EdgePolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add one atom
    pub fn add_atom(&mut self, atom: &AtomicUnit) -> Result<(), GraphError> {
        self.add_node(AtomNode::from(atom))
    }

    /// Add a prepared node
    pub fn add_node(&mut self, node: AtomNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateAtom(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add many atoms, chaining
    pub fn add_atoms<'a>(
        mut self,
        atoms: impl IntoIterator<Item = &'a AtomicUnit>,
    ) -> Result<Self, GraphError> {
        for atom in atoms {
            self.add_atom(atom)?;
        }
        Ok(self)
    }

    /// Derive all edges, check them and level the graph
    ///
    /// Fails on unknown or self dependencies, then on cycles. Nothing is
    /// leveled unless the whole relation is acyclic.
    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        let mut edges: BTreeMap<(AtomId, AtomId), EdgeKind> = BTreeMap::new();

        for node in self.nodes.values() {
            for dependency in &node.dependencies {
                if *dependency == node.id {
                    return Err(GraphError::SelfDependency(node.id.clone()));
                }
                if !self.nodes.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        atom: node.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                edges.insert((dependency.clone(), node.id.clone()), EdgeKind::Explicit);
            }
        }

        for policy in &self.policies {
            let derived = policy.derive_edges(&self.nodes);
            tracing::debug!(policy = policy.name(), edges = derived.len(), "derived edges");
            for edge in derived {
                if edge.from == edge.to
                    || !self.nodes.contains_key(&edge.from)
                    || !self.nodes.contains_key(&edge.to)
                {
                    continue;
                }
                edges
                    .entry((edge.from, edge.to))
                    .and_modify(|kind| *kind = (*kind).min(edge.kind))
                    .or_insert(edge.kind);
            }
        }

        let edges: Vec<DependencyEdge> = edges
            .into_iter()
            .map(|((from, to), kind)| DependencyEdge::new(from, to, kind))
            .collect();

        DependencyGraph::level(self.nodes, edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::SharedSymbols;
    use aee_atom::{AtomSpec, Signature};

    fn atom(id: &str) -> AtomicUnit {
        AtomicUnit::new(id, "t", AtomSpec::new(id))
    }

    #[test]
    fn duplicate_atom_is_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_atom(&atom("a")).unwrap();
        assert_eq!(
            builder.add_atom(&atom("a")),
            Err(GraphError::DuplicateAtom(AtomId::new("a")))
        );
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let atoms = [atom("a").depends_on("ghost")];
        let err = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                atom: AtomId::new("a"),
                dependency: AtomId::new("ghost"),
            }
        );
    }

    #[test]
    fn self_dependency_is_rejected() {
        let atoms = [atom("a").depends_on("a")];
        let err = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap_err();
        assert_eq!(err, GraphError::SelfDependency(AtomId::new("a")));
    }

    #[test]
    fn explicit_edge_wins_over_derived() {
        let provider = AtomicUnit::new(
            "p",
            "t",
            AtomSpec::new("p").with_output(Signature::new("Token", "struct")),
        );
        let consumer = AtomicUnit::new("c", "t", AtomSpec::new("c").requiring("type:Token"))
            .depends_on("p");
        let graph = GraphBuilder::new()
            .with_policy(SharedSymbols)
            .add_atoms([provider, consumer].iter())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].kind, EdgeKind::Explicit);
    }

    #[test]
    fn derived_edges_affect_leveling() {
        let provider = AtomicUnit::new(
            "p",
            "t",
            AtomSpec::new("p").with_output(Signature::new("Token", "struct")),
        );
        let consumer = AtomicUnit::new("c", "t", AtomSpec::new("c").requiring("type:Token"));
        let graph = GraphBuilder::new()
            .with_policy(SharedSymbols)
            .add_atoms([provider, consumer].iter())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(graph.level_of(&AtomId::new("c")), Some(1));
    }
}
