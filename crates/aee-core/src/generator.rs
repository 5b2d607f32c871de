//! Generator capability
//!
//! Code synthesis lives outside the engine. The engine only sees this
//! trait: one call per attempt, with the atom's spec, the artifacts of its
//! validated dependencies and the attempt context.

use aee_atom::{Artifact, AtomId, AtomSpec, AttemptStrategy, RunId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors reported by a generator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Service unreachable, rate limited or overloaded
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    /// The generator declined the request
    #[error("generation rejected: {0}")]
    Rejected(String),

    /// The response could not be turned into an artifact
    #[error("malformed generator output: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Whether backing off before the next attempt makes sense
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Per-attempt context handed to the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptContext {
    pub run_id: RunId,
    pub atom_id: AtomId,
    pub strategy: AttemptStrategy,
    /// Violations from earlier failed attempts, most recent last
    pub feedback: Vec<String>,
    /// Reviewer instructions on a regenerate decision
    pub human_feedback: Option<String>,
}

impl AttemptContext {
    #[must_use]
    pub fn new(run_id: RunId, atom_id: AtomId, strategy: AttemptStrategy) -> Self {
        Self {
            run_id,
            atom_id,
            strategy,
            feedback: Vec::new(),
            human_feedback: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_feedback(mut self, feedback: Vec<String>) -> Self {
        self.feedback = feedback;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_human_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.human_feedback = Some(feedback.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.strategy.attempt
    }
}

/// External code generation capability
///
/// Implementations must be side-effect free from the engine's point of
/// view; the engine may call them concurrently for different atoms.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        spec: &AtomSpec,
        dependencies: &BTreeMap<AtomId, Artifact>,
        context: &AttemptContext,
    ) -> Result<Artifact, GenerationError>;
}
