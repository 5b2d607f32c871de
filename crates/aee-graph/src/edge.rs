//! Dependency edges and edge-derivation policies
//!
//! Edges point from prerequisite to dependent: `from -> to` means `to`
//! cannot be generated before `from` is validated. Declared dependencies
//! always produce edges; further edges can be derived by pluggable
//! [`EdgePolicy`] implementations.

use aee_atom::{AtomId, AtomicUnit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why an edge exists. Ordered by precedence when the same pair is
/// derived more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Declared by the decomposition step
    Explicit,
    /// The dependent imports a module path the prerequisite provides
    Import,
    /// The dependent uses a type the prerequisite defines
    Type,
    /// The dependent calls a function the prerequisite defines
    Call,
}

/// `from` must be validated before `to` is generated
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: AtomId,
    pub to: AtomId,
    pub kind: EdgeKind,
}

impl DependencyEdge {
    #[must_use]
    pub fn new(from: AtomId, to: AtomId, kind: EdgeKind) -> Self {
        Self { from, to, kind }
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{:?}]-> {}", self.from, self.kind, self.to)
    }
}

/// The graph-relevant view of an atom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomNode {
    pub id: AtomId,
    pub module: String,
    pub component: String,
    pub dependencies: BTreeSet<AtomId>,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
}

impl From<&AtomicUnit> for AtomNode {
    fn from(atom: &AtomicUnit) -> Self {
        Self {
            id: atom.id.clone(),
            module: atom.spec.module.clone(),
            component: atom.spec.component.clone(),
            dependencies: atom.dependencies.clone(),
            provides: atom.spec.provides.clone(),
            requires: atom.spec.requires.clone(),
        }
    }
}

/// Derives extra edges from atom metadata
pub trait EdgePolicy: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Edges implied by this policy. Unknown endpoints are never returned.
    fn derive_edges(&self, nodes: &BTreeMap<AtomId, AtomNode>) -> Vec<DependencyEdge>;
}

/// Derives `Import`/`Type`/`Call` edges by matching each atom's `requires`
/// against the `provides` of the other atoms.
///
/// A requirement may carry a kind prefix: `import:auth::hash`,
/// `type:Session`, `call:hash_password`. Bare names are treated as calls.
/// Requirements with no provider are external and ignored; requirements
/// with several providers are ambiguous and skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedSymbols;

impl SharedSymbols {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn classify(requirement: &str) -> (EdgeKind, &str) {
        if let Some(rest) = requirement.strip_prefix("import:") {
            (EdgeKind::Import, rest)
        } else if let Some(rest) = requirement.strip_prefix("type:") {
            (EdgeKind::Type, rest)
        } else if let Some(rest) = requirement.strip_prefix("call:") {
            (EdgeKind::Call, rest)
        } else {
            (EdgeKind::Call, requirement)
        }
    }
}

impl EdgePolicy for SharedSymbols {
    fn name(&self) -> &'static str {
        "shared-symbols"
    }

    fn derive_edges(&self, nodes: &BTreeMap<AtomId, AtomNode>) -> Vec<DependencyEdge> {
        let mut providers: BTreeMap<&str, Vec<&AtomId>> = BTreeMap::new();
        for node in nodes.values() {
            for symbol in &node.provides {
                providers.entry(symbol.as_str()).or_default().push(&node.id);
            }
        }

        let mut edges = Vec::new();
        for node in nodes.values() {
            for requirement in &node.requires {
                let (kind, symbol) = Self::classify(requirement);
                let candidates: Vec<&AtomId> = providers
                    .get(symbol)
                    .map(|ids| ids.iter().copied().filter(|id| **id != node.id).collect())
                    .unwrap_or_default();
                match candidates.as_slice() {
                    [] => {}
                    [provider] => {
                        edges.push(DependencyEdge::new((*provider).clone(), node.id.clone(), kind));
                    }
                    many => {
                        tracing::warn!(
                            atom_id = %node.id,
                            symbol,
                            providers = many.len(),
                            "ambiguous symbol requirement, no edge derived"
                        );
                    }
                }
            }
        }
        edges
    }
}
