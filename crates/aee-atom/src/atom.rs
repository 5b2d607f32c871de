//! Atomic units and their attempt log

use crate::artifact::Artifact;
use crate::ids::{AtomId, TaskId};
use crate::spec::AtomSpec;
use crate::status::AtomStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smallest independently generatable and validatable unit of work
///
/// Created once by the upstream decomposition step and handed to the
/// engine as `Pending`. Lifecycle fields are private: they change only
/// through [`crate::AtomStore`], which enforces the status table and the
/// write-once rule for `generated_artifact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicUnit {
    pub id: AtomId,
    pub task_id: TaskId,
    pub spec: AtomSpec,
    pub dependencies: BTreeSet<AtomId>,
    status: AtomStatus,
    attempt_count: u32,
    generated_artifact: Option<Artifact>,
    resolution: Option<Artifact>,
    confidence_score: Option<f64>,
    attempts: Vec<RetryAttempt>,
}

impl AtomicUnit {
    /// Create a pending atom
    #[must_use]
    pub fn new(id: impl Into<AtomId>, task_id: impl Into<TaskId>, spec: AtomSpec) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            spec,
            dependencies: BTreeSet::new(),
            status: AtomStatus::Pending,
            attempt_count: 0,
            generated_artifact: None,
            resolution: None,
            confidence_score: None,
            attempts: Vec::new(),
        }
    }

    /// Declare a dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<AtomId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> AtomStatus {
        self.status
    }

    /// Completed generation attempts (cancelled attempts do not count)
    #[inline]
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Artifact written when the atom was promoted to Validated
    #[inline]
    #[must_use]
    pub fn generated_artifact(&self) -> Option<&Artifact> {
        self.generated_artifact.as_ref()
    }

    /// Replacement artifact supplied through review
    #[inline]
    #[must_use]
    pub fn resolution(&self) -> Option<&Artifact> {
        self.resolution.as_ref()
    }

    /// Resolution if present, otherwise the generated artifact
    #[inline]
    #[must_use]
    pub fn effective_artifact(&self) -> Option<&Artifact> {
        self.resolution.as_ref().or(self.generated_artifact.as_ref())
    }

    #[inline]
    #[must_use]
    pub fn confidence_score(&self) -> Option<f64> {
        self.confidence_score
    }

    /// Append-only attempt log
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    /// Whether dependents may be generated against this atom
    ///
    /// Only Validated and Resolved atoms qualify. An atom pulled into
    /// review keeps its promoted artifact but supplies nothing until a
    /// reviewer resolves it.
    #[must_use]
    pub fn feeds_dependents(&self) -> bool {
        self.status.satisfies_dependents() && self.effective_artifact().is_some()
    }

    pub(crate) fn set_status(&mut self, status: AtomStatus) {
        self.status = status;
    }

    pub(crate) fn push_attempt(&mut self, attempt: RetryAttempt) {
        self.attempts.push(attempt);
        self.attempt_count = u32::try_from(self.attempts.len()).unwrap_or(u32::MAX);
    }

    pub(crate) fn set_generated(&mut self, artifact: Artifact) {
        self.generated_artifact = Some(artifact);
    }

    pub(crate) fn set_resolution(&mut self, artifact: Artifact) {
        self.resolution = Some(artifact);
    }

    pub(crate) fn set_confidence(&mut self, score: f64) {
        self.confidence_score = Some(score);
    }
}

/// Strategy parameters handed to the generator for one attempt
///
/// `temperature` widens generation (less deterministic), `strictness`
/// lowers tolerance thresholds the generator is asked to honour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptStrategy {
    pub attempt: u32,
    pub temperature: f64,
    pub strictness: f64,
}

impl AttemptStrategy {
    /// Parameters for a first attempt
    #[must_use]
    pub fn initial(temperature: f64, strictness: f64) -> Self {
        Self {
            attempt: 1,
            temperature,
            strictness,
        }
    }
}

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    /// The generator returned an error
    GenerationFailed,
    /// The generator answered but atomic validation rejected the artifact
    ValidationFailed,
    /// The per-attempt timeout fired
    TimedOut,
}

impl AttemptOutcome {
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }

    /// Failures that involved the generator call itself and warrant backoff
    #[inline]
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, AttemptOutcome::GenerationFailed | AttemptOutcome::TimedOut)
    }
}

/// One entry of an atom's append-only attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub atom_id: AtomId,
    /// 1-based attempt number
    pub attempt: u32,
    pub strategy: AttemptStrategy,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    /// Rule violations that caused a validation failure
    pub violations: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RetryAttempt {
    #[must_use]
    pub fn new(atom_id: AtomId, strategy: AttemptStrategy, outcome: AttemptOutcome) -> Self {
        Self {
            atom_id,
            attempt: strategy.attempt,
            strategy,
            outcome,
            error: None,
            violations: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_violations(mut self, violations: Vec<String>) -> Self {
        self.violations = violations;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        self.started_at = started_at;
        self.duration_ms = duration_ms;
        self
    }
}
