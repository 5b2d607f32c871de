//! Graph construction errors

use aee_atom::AtomId;

/// Errors raised while building the dependency graph
///
/// All of them are raised before any atom is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The same atom id was added twice
    #[error("duplicate atom: {0}")]
    DuplicateAtom(AtomId),

    /// A declared dependency names an atom that is not in the set
    #[error("atom {atom} depends on unknown atom {dependency}")]
    UnknownDependency { atom: AtomId, dependency: AtomId },

    /// An atom lists itself as a dependency
    #[error("atom {0} depends on itself")]
    SelfDependency(AtomId),

    /// The dependency relation is not acyclic; `members` lists every atom
    /// that sits on a cycle, sorted by id
    #[error("cyclic dependency among {members:?}")]
    CycleDetected { members: Vec<AtomId> },
}

impl GraphError {
    /// Atoms on a cycle, if this is a cycle error
    #[must_use]
    pub fn cycle_members(&self) -> Option<&[AtomId]> {
        match self {
            GraphError::CycleDetected { members } => Some(members),
            _ => None,
        }
    }
}
