//! Atom Store
//!
//! Registry of every atom in a run. Backed by a sharded [`DashMap`], so
//! workers touching different atoms never contend on one lock while
//! writes to the same atom are serialized by its shard.
//!
//! # Invariants
//! - status changes follow [`AtomStatus::can_transition_to`]
//! - `generated_artifact` is written exactly once, at promotion to Validated
//! - the confidence score is frozen once an atom is Resolved

use crate::artifact::Artifact;
use crate::atom::{AtomicUnit, RetryAttempt};
use crate::ids::AtomId;
use crate::status::AtomStatus;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Errors raised by store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown atom: {0}")]
    UnknownAtom(AtomId),

    #[error("duplicate atom: {0}")]
    DuplicateAtom(AtomId),

    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: AtomId,
        from: AtomStatus,
        to: AtomStatus,
    },

    #[error("artifact already set for {0}")]
    ArtifactAlreadySet(AtomId),

    #[error("atom {id} has no artifact to resolve with")]
    NoArtifact { id: AtomId },

    #[error("confidence of resolved atom {0} is final")]
    ConfidenceFrozen(AtomId),

    #[error("dependency {dependency} of {atom} is {status}, not validated")]
    DependencyNotReady {
        atom: AtomId,
        dependency: AtomId,
        status: AtomStatus,
    },
}

/// Concurrent registry of atoms
#[derive(Debug, Default)]
pub struct AtomStore {
    atoms: DashMap<AtomId, AtomicUnit>,
}

impl AtomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a batch of atoms
    ///
    /// # Errors
    /// `DuplicateAtom` if two atoms share an id
    pub fn from_atoms(atoms: impl IntoIterator<Item = AtomicUnit>) -> Result<Self, StoreError> {
        let store = Self::new();
        for atom in atoms {
            store.insert(atom)?;
        }
        Ok(store)
    }

    /// Register an atom
    ///
    /// # Errors
    /// `DuplicateAtom` if the id is taken
    pub fn insert(&self, atom: AtomicUnit) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.atoms.entry(atom.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateAtom(atom.id)),
            Entry::Vacant(slot) => {
                slot.insert(atom);
                Ok(())
            }
        }
    }

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

    #[inline]
    #[must_use]
    pub fn contains(&self, id: &AtomId) -> bool {
        self.atoms.contains_key(id)
    }

    /// Snapshot of one atom
    #[must_use]
    pub fn get(&self, id: &AtomId) -> Option<AtomicUnit> {
        self.atoms.get(id).map(|entry| entry.value().clone())
    }

    /// Current status
    ///
    /// # Errors
    /// `UnknownAtom`
    pub fn status(&self, id: &AtomId) -> Result<AtomStatus, StoreError> {
        self.atoms
            .get(id)
            .map(|entry| entry.status())
            .ok_or_else(|| StoreError::UnknownAtom(id.clone()))
    }

    /// All ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<AtomId> {
        let mut ids: Vec<AtomId> = self.atoms.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ids currently in `status`, sorted
    #[must_use]
    pub fn by_status(&self, status: AtomStatus) -> Vec<AtomId> {
        let mut ids: Vec<AtomId> = self
            .atoms
            .iter()
            .filter(|e| e.status() == status)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Count of atoms per status
    #[must_use]
    pub fn status_counts(&self) -> BTreeMap<AtomStatus, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.atoms {
            *counts.entry(entry.status()).or_insert(0) += 1;
        }
        counts
    }

    /// All atoms, sorted by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<AtomicUnit> {
        let mut atoms: Vec<AtomicUnit> = self.atoms.iter().map(|e| e.value().clone()).collect();
        atoms.sort_by(|a, b| a.id.cmp(&b.id));
        atoms
    }

    /// Move an atom to a new status; returns the previous one
    ///
    /// # Errors
    /// `UnknownAtom`, `IllegalTransition`
    pub fn transition(&self, id: &AtomId, to: AtomStatus) -> Result<AtomStatus, StoreError> {
        self.with_atom(id, |atom| {
            let from = atom.status();
            if !from.can_transition_to(to) {
                return Err(StoreError::IllegalTransition {
                    id: id.clone(),
                    from,
                    to,
                });
            }
            atom.set_status(to);
            Ok(from)
        })
    }

    /// Append to the attempt log; returns the new attempt count
    ///
    /// # Errors
    /// `UnknownAtom`
    pub fn record_attempt(&self, attempt: RetryAttempt) -> Result<u32, StoreError> {
        let id = attempt.atom_id.clone();
        self.with_atom(&id, |atom| {
            atom.push_attempt(attempt);
            Ok(atom.attempt_count())
        })
    }

    /// Attempt log of an atom
    ///
    /// # Errors
    /// `UnknownAtom`
    pub fn attempts(&self, id: &AtomId) -> Result<Vec<RetryAttempt>, StoreError> {
        self.atoms
            .get(id)
            .map(|entry| entry.attempts().to_vec())
            .ok_or_else(|| StoreError::UnknownAtom(id.clone()))
    }

    /// Promote a validating atom: status becomes Validated and the artifact
    /// is written, in one step under the atom's shard lock.
    ///
    /// # Errors
    /// `IllegalTransition` unless the atom is Validating,
    /// `ArtifactAlreadySet` if an artifact was written before
    pub fn promote(&self, id: &AtomId, artifact: Artifact) -> Result<(), StoreError> {
        self.with_atom(id, |atom| {
            if atom.generated_artifact().is_some() {
                return Err(StoreError::ArtifactAlreadySet(id.clone()));
            }
            let from = atom.status();
            if !from.can_transition_to(AtomStatus::Validated) {
                return Err(StoreError::IllegalTransition {
                    id: id.clone(),
                    from,
                    to: AtomStatus::Validated,
                });
            }
            atom.set_status(AtomStatus::Validated);
            atom.set_generated(artifact);
            Ok(())
        })
    }

    /// Record the confidence score
    ///
    /// # Errors
    /// `ConfidenceFrozen` once the atom is Resolved
    pub fn set_confidence(&self, id: &AtomId, score: f64) -> Result<(), StoreError> {
        self.with_atom(id, |atom| {
            if atom.status() == AtomStatus::Resolved {
                return Err(StoreError::ConfidenceFrozen(id.clone()));
            }
            atom.set_confidence(score.clamp(0.0, 1.0));
            Ok(())
        })
    }

    /// Apply a human decision: the atom becomes Resolved, optionally with a
    /// replacement artifact. A resolved atom must end up with some artifact.
    ///
    /// # Errors
    /// `IllegalTransition`, `NoArtifact`
    pub fn resolve(&self, id: &AtomId, replacement: Option<Artifact>) -> Result<(), StoreError> {
        self.with_atom(id, |atom| {
            let from = atom.status();
            if !from.can_transition_to(AtomStatus::Resolved) {
                return Err(StoreError::IllegalTransition {
                    id: id.clone(),
                    from,
                    to: AtomStatus::Resolved,
                });
            }
            if replacement.is_none() && atom.effective_artifact().is_none() {
                return Err(StoreError::NoArtifact { id: id.clone() });
            }
            if let Some(artifact) = replacement {
                atom.set_resolution(artifact);
            }
            atom.set_status(AtomStatus::Resolved);
            Ok(())
        })
    }

    /// Artifact dependents should consume
    #[must_use]
    pub fn artifact(&self, id: &AtomId) -> Option<Artifact> {
        self.atoms
            .get(id)
            .and_then(|entry| entry.effective_artifact().cloned())
    }

    /// Collect the artifacts of `atom`'s dependencies.
    ///
    /// Every dependency must be Validated or Resolved; anything else,
    /// including an atom under review, is a scheduling defect.
    ///
    /// # Errors
    /// `UnknownAtom`, `DependencyNotReady`
    pub fn dependency_artifacts(
        &self,
        atom: &AtomId,
        dependencies: impl IntoIterator<Item = AtomId>,
    ) -> Result<BTreeMap<AtomId, Artifact>, StoreError> {
        let mut out = BTreeMap::new();
        for dep in dependencies {
            let entry = self
                .atoms
                .get(&dep)
                .ok_or_else(|| StoreError::UnknownAtom(dep.clone()))?;
            let artifact = entry
                .effective_artifact()
                .filter(|_| entry.feeds_dependents())
                .cloned()
                .ok_or_else(|| StoreError::DependencyNotReady {
                    atom: atom.clone(),
                    dependency: dep.clone(),
                    status: entry.status(),
                })?;
            drop(entry);
            out.insert(dep, artifact);
        }
        Ok(out)
    }

    /// Whether every listed dependency feeds dependents
    #[must_use]
    pub fn dependencies_ready<'a>(&self, dependencies: impl IntoIterator<Item = &'a AtomId>) -> bool {
        dependencies.into_iter().all(|dep| {
            self.atoms
                .get(dep)
                .is_some_and(|entry| entry.feeds_dependents())
        })
    }

    fn with_atom<R>(
        &self,
        id: &AtomId,
        f: impl FnOnce(&mut AtomicUnit) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut entry = self
            .atoms
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownAtom(id.clone()))?;
        f(entry.value_mut())
    }
}
