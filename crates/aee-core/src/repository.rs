//! Persistence interface
//!
//! The engine writes atoms, attempts, validation results and review items
//! through [`Repository`]. Storage technology is up to the implementor;
//! [`InMemoryRepository`] backs tests and the CLI.

use crate::review::ReviewItem;
use aee_atom::{AtomId, AtomStatus, AtomicUnit, RetryAttempt};
use aee_validation::{ValidationLevel, ValidationResult};
use dashmap::DashMap;
use parking_lot::RwLock;

/// Persistence failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// CRUD and status/level queries over engine records
#[async_trait::async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Insert or replace an atom
    async fn save_atom(&self, atom: &AtomicUnit) -> Result<(), RepositoryError>;

    async fn load_atom(&self, id: &AtomId) -> Result<Option<AtomicUnit>, RepositoryError>;

    /// Ids of stored atoms in `status`, sorted
    async fn atoms_by_status(&self, status: AtomStatus) -> Result<Vec<AtomId>, RepositoryError>;

    async fn append_attempt(&self, attempt: &RetryAttempt) -> Result<(), RepositoryError>;

    async fn attempts(&self, id: &AtomId) -> Result<Vec<RetryAttempt>, RepositoryError>;

    async fn save_validation(&self, result: &ValidationResult) -> Result<(), RepositoryError>;

    async fn validations_by_level(
        &self,
        level: ValidationLevel,
    ) -> Result<Vec<ValidationResult>, RepositoryError>;

    /// Insert or replace the review item of an atom
    async fn save_review(&self, item: &ReviewItem) -> Result<(), RepositoryError>;

    async fn load_review(&self, id: &AtomId) -> Result<Option<ReviewItem>, RepositoryError>;

    /// Review items without a decision, sorted by atom id
    async fn pending_reviews(&self) -> Result<Vec<ReviewItem>, RepositoryError>;
}

/// Repository kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    atoms: DashMap<AtomId, AtomicUnit>,
    attempts: DashMap<AtomId, Vec<RetryAttempt>>,
    validations: RwLock<Vec<ValidationResult>>,
    reviews: DashMap<AtomId, ReviewItem>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    #[must_use]
    pub fn validation_count(&self) -> usize {
        self.validations.read().len()
    }
}

#[async_trait::async_trait]
impl Repository for InMemoryRepository {
    async fn save_atom(&self, atom: &AtomicUnit) -> Result<(), RepositoryError> {
        self.atoms.insert(atom.id.clone(), atom.clone());
        Ok(())
    }

    async fn load_atom(&self, id: &AtomId) -> Result<Option<AtomicUnit>, RepositoryError> {
        Ok(self.atoms.get(id).map(|e| e.value().clone()))
    }

    async fn atoms_by_status(&self, status: AtomStatus) -> Result<Vec<AtomId>, RepositoryError> {
        let mut ids: Vec<AtomId> = self
            .atoms
            .iter()
            .filter(|e| e.status() == status)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_attempt(&self, attempt: &RetryAttempt) -> Result<(), RepositoryError> {
        self.attempts
            .entry(attempt.atom_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn attempts(&self, id: &AtomId) -> Result<Vec<RetryAttempt>, RepositoryError> {
        Ok(self.attempts.get(id).map(|e| e.value().clone()).unwrap_or_default())
    }

    async fn save_validation(&self, result: &ValidationResult) -> Result<(), RepositoryError> {
        self.validations.write().push(result.clone());
        Ok(())
    }

    async fn validations_by_level(
        &self,
        level: ValidationLevel,
    ) -> Result<Vec<ValidationResult>, RepositoryError> {
        Ok(self
            .validations
            .read()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect())
    }

    async fn save_review(&self, item: &ReviewItem) -> Result<(), RepositoryError> {
        self.reviews.insert(item.atom_id.clone(), item.clone());
        Ok(())
    }

    async fn load_review(&self, id: &AtomId) -> Result<Option<ReviewItem>, RepositoryError> {
        Ok(self.reviews.get(id).map(|e| e.value().clone()))
    }

    async fn pending_reviews(&self) -> Result<Vec<ReviewItem>, RepositoryError> {
        let mut items: Vec<ReviewItem> = self
            .reviews
            .iter()
            .filter(|e| e.decision.is_none())
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.atom_id.cmp(&b.atom_id));
        Ok(items)
    }
}
