//! Review queue
//!
//! Atoms needing a human decision wait here, ordered by ascending
//! confidence with ties broken by atom id. Failed atoms always enter;
//! validated atoms enter when they fall into the low-confidence band
//! chosen by [`select_for_review`].
//!
//! [`ReviewManager`] applies the three decisions:
//! - `approve` keeps the artifact and resolves the atom
//! - `edit` swaps in a human artifact after atomic validation
//! - `regenerate` grants one extra generation attempt with human feedback

use crate::config::ReviewPolicy;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::retry::{AttemptResult, RetryOrchestrator};
use aee_atom::{Artifact, AtomId, AtomStatus, AtomicUnit};
use aee_graph::DependencyGraph;
use aee_validation::Subject;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Why an atom was routed to review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Every attempt failed
    RetriesExhausted,
    /// Validated, but in the low-confidence band
    LowConfidence,
    /// Localized culprit of a failed module or component gate
    GateQuarantine,
    /// Localized culprit of a failed system gate
    SystemGate,
}

/// Decision recorded on a resolved item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecisionKind {
    Approve,
    Edit,
    Regenerate,
}

impl std::fmt::Display for ReviewDecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Approve => "approve",
            Self::Edit => "edit",
            Self::Regenerate => "regenerate",
        };
        f.write_str(name)
    }
}

/// One atom awaiting or having received a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub atom_id: AtomId,
    /// Confidence when the item was flagged
    pub confidence: f64,
    pub reason: ReviewReason,
    /// Improvement hints from an external assistant
    pub suggestions: Vec<String>,
    /// Artifact that passed atomic checks but was held back by a gate
    pub candidate: Option<Artifact>,
    pub decision: Option<ReviewDecisionKind>,
    pub resolved_artifact: Option<Artifact>,
    pub enqueued_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    /// Pending item without a candidate
    #[must_use]
    pub fn new(atom_id: AtomId, confidence: f64, reason: ReviewReason) -> Self {
        Self {
            atom_id,
            confidence: if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) },
            reason,
            suggestions: Vec::new(),
            candidate: None,
            decision: None,
            resolved_artifact: None,
            enqueued_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Attach the artifact the reviewer may approve
    #[inline]
    #[must_use]
    pub fn with_candidate(mut self, artifact: Artifact) -> Self {
        self.candidate = Some(artifact);
        self
    }

    /// Whether a decision was recorded
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.decision.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct Confidence(f64);

impl PartialEq for Confidence {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Confidence {}

impl PartialOrd for Confidence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Confidence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    order: BTreeSet<(Confidence, AtomId)>,
    items: BTreeMap<AtomId, ReviewItem>,
    resolved: Vec<ReviewItem>,
}

/// Pending review items in priority order
#[derive(Debug, Default)]
pub struct ReviewQueue {
    state: Mutex<QueueState>,
}

impl ReviewQueue {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; an item already pending for the atom is replaced
    ///
    /// Returns false if the atom was already queued.
    pub fn enqueue(&self, item: ReviewItem) -> bool {
        let mut state = self.state.lock();
        let fresh = match state.items.remove(&item.atom_id) {
            Some(old) => {
                state.order.remove(&(Confidence(old.confidence), old.atom_id));
                false
            }
            None => true,
        };
        state.order.insert((Confidence(item.confidence), item.atom_id.clone()));
        state.items.insert(item.atom_id.clone(), item);
        fresh
    }

    /// Lowest-confidence pending item
    #[must_use]
    pub fn peek_next(&self) -> Option<ReviewItem> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .next()
            .and_then(|(_, id)| state.items.get(id).cloned())
    }

    /// Pending items in priority order
    #[must_use]
    pub fn pending(&self) -> Vec<ReviewItem> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|(_, id)| state.items.get(id).cloned())
            .collect()
    }

    /// Number of pending items
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing awaits review
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Whether `id` has a pending item
    #[must_use]
    pub fn contains(&self, id: &AtomId) -> bool {
        self.state.lock().items.contains_key(id)
    }

    /// Copy of the pending item for `id`
    #[must_use]
    pub fn get(&self, id: &AtomId) -> Option<ReviewItem> {
        self.state.lock().items.get(id).cloned()
    }

    /// Attach assistant suggestions to a pending item
    pub fn attach_suggestions(&self, id: &AtomId, suggestions: Vec<String>) -> bool {
        match self.state.lock().items.get_mut(id) {
            Some(item) => {
                item.suggestions.extend(suggestions);
                true
            }
            None => false,
        }
    }

    /// Items that received a decision, oldest first
    #[must_use]
    pub fn resolved(&self) -> Vec<ReviewItem> {
        self.state.lock().resolved.clone()
    }

    fn take(&self, id: &AtomId) -> Option<ReviewItem> {
        let mut state = self.state.lock();
        let item = state.items.remove(id)?;
        state.order.remove(&(Confidence(item.confidence), item.atom_id.clone()));
        Some(item)
    }

    fn complete(&self, item: ReviewItem) {
        self.state.lock().resolved.push(item);
    }
}

/// Choose validated atoms for review
///
/// Candidates below `cutoff` are taken lowest first; the count is then
/// clamped into `[floor(n * min_fraction), ceil(n * max_fraction)]` of the
/// `n` candidates. Ties are broken by atom id.
#[must_use]
pub fn select_for_review(candidates: &[(AtomId, f64)], policy: &ReviewPolicy) -> Vec<AtomId> {
    let n = candidates.len();
    if n == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<&(AtomId, f64)> = candidates.iter().collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lower, upper) = {
        let n = n as f64;
        (
            (n * policy.min_fraction.clamp(0.0, 1.0)).floor() as usize,
            (n * policy.max_fraction.clamp(0.0, 1.0)).ceil() as usize,
        )
    };
    let below = ranked.iter().filter(|(_, score)| *score < policy.cutoff).count();
    let take = below.clamp(lower, upper.max(lower)).min(n);

    ranked.into_iter().take(take).map(|(id, _)| id.clone()).collect()
}

/// Review decision errors
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("atom {0} is not in the review queue")]
    NotQueued(AtomId),

    #[error("atom {0} has no artifact to approve")]
    NoArtifact(AtomId),

    #[error("edited artifact for {atom} fails atomic validation: {violations:?}")]
    EditRejected { atom: AtomId, violations: Vec<String> },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What a regenerate decision produced
#[derive(Debug, Clone)]
pub enum RegenerateOutcome {
    /// The new artifact passed atomic validation; the atom is Resolved
    Resolved(ReviewItem),
    /// The attempt failed; the atom is back in the queue
    Requeued { feedback: Vec<String> },
    Cancelled,
}

/// Applies human decisions to queued atoms
#[derive(Debug, Clone)]
pub struct ReviewManager {
    ctx: Arc<EngineContext>,
    orchestrator: Arc<RetryOrchestrator>,
    graph: Option<Arc<DependencyGraph>>,
}

impl ReviewManager {
    /// Manager over the context's queue
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>, orchestrator: Arc<RetryOrchestrator>) -> Self {
        Self {
            ctx,
            orchestrator,
            graph: None,
        }
    }

    /// Use derived edges when collecting dependency artifacts
    #[must_use]
    pub fn with_graph(mut self, graph: Arc<DependencyGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Queue shared with the executor
    #[must_use]
    pub fn queue(&self) -> &ReviewQueue {
        self.ctx.review_queue()
    }

    /// Resolve with the artifact already produced
    ///
    /// # Errors
    /// `NotQueued`, `NoArtifact`, or a store error.
    pub async fn approve(&self, id: &AtomId) -> Result<ReviewItem, ReviewError> {
        let item = self.queued(id)?;
        let atom = self.atom(id)?;
        let replacement = if atom.effective_artifact().is_some() {
            None
        } else {
            Some(item.candidate.clone().ok_or_else(|| ReviewError::NoArtifact(id.clone()))?)
        };
        self.ctx.store().resolve(id, replacement.clone()).map_err(EngineError::from)?;
        Ok(self.finish(item, ReviewDecisionKind::Approve, replacement).await)
    }

    /// Resolve with a human-supplied artifact, re-running atomic checks only
    ///
    /// # Errors
    /// `NotQueued`, `EditRejected`, or a store error.
    pub async fn edit(&self, id: &AtomId, artifact: Artifact) -> Result<ReviewItem, ReviewError> {
        let item = self.queued(id)?;
        let atom = self.atom(id)?;
        let dependencies = self.dependency_ids(&atom);
        let dep_atoms: Vec<AtomicUnit> = dependencies.iter().filter_map(|d| self.ctx.store().get(d)).collect();
        let available: Vec<Subject<'_>> = dep_atoms.iter().filter_map(Subject::from_atom).collect();

        let assessment = self
            .orchestrator
            .validator()
            .validate_atomic(Subject::new(&atom, &artifact), &available);
        if !assessment.passed() {
            return Err(ReviewError::EditRejected {
                atom: id.clone(),
                violations: assessment.violated_rules(),
            });
        }

        self.ctx
            .store()
            .resolve(id, Some(artifact.clone()))
            .map_err(EngineError::from)?;
        Ok(self.finish(item, ReviewDecisionKind::Edit, Some(artifact)).await)
    }

    /// One extra generation attempt with `feedback` as human guidance
    ///
    /// The attempt does not count against the automatic budget check.
    ///
    /// # Errors
    /// `NotQueued`, or `Engine` if a dependency is no longer available.
    pub async fn regenerate(&self, id: &AtomId, feedback: impl Into<String>) -> Result<RegenerateOutcome, ReviewError> {
        let item = self.queued(id)?;
        let atom = self.atom(id)?;
        let deps = self
            .ctx
            .store()
            .dependency_artifacts(id, self.dependency_ids(&atom))
            .map_err(EngineError::from)?;

        let result = self
            .orchestrator
            .attempt_once(&self.ctx, id, &deps, item.suggestions.clone(), Some(feedback.into()))
            .await?;

        match result {
            AttemptResult::Passed { artifact, .. } => {
                self.ctx
                    .store()
                    .resolve(id, Some(artifact.clone()))
                    .map_err(EngineError::from)?;
                let item = self.finish(item, ReviewDecisionKind::Regenerate, Some(artifact)).await;
                Ok(RegenerateOutcome::Resolved(item))
            }
            AttemptResult::Failed { feedback, .. } => {
                self.ctx
                    .store()
                    .transition(id, AtomStatus::InReview)
                    .map_err(EngineError::from)?;
                self.ctx.persist_atom(id).await;
                tracing::warn!(atom_id = %id, "regeneration failed, back in review");
                Ok(RegenerateOutcome::Requeued { feedback })
            }
            AttemptResult::Cancelled => Ok(RegenerateOutcome::Cancelled),
        }
    }

    fn queued(&self, id: &AtomId) -> Result<ReviewItem, ReviewError> {
        self.queue().get(id).ok_or_else(|| ReviewError::NotQueued(id.clone()))
    }

    fn atom(&self, id: &AtomId) -> Result<AtomicUnit, ReviewError> {
        self.ctx
            .store()
            .get(id)
            .ok_or_else(|| ReviewError::Engine(EngineError::Store(aee_atom::StoreError::UnknownAtom(id.clone()))))
    }

    fn dependency_ids(&self, atom: &AtomicUnit) -> Vec<AtomId> {
        let mut ids: BTreeSet<AtomId> = atom.dependencies.clone();
        if let Some(graph) = &self.graph {
            ids.extend(graph.dependencies_of(&atom.id));
        }
        ids.into_iter().collect()
    }

    async fn finish(&self, item: ReviewItem, decision: ReviewDecisionKind, artifact: Option<Artifact>) -> ReviewItem {
        let id = item.atom_id.clone();
        let mut done = self.queue().take(&id).unwrap_or(item);
        done.decision = Some(decision);
        done.resolved_artifact = artifact;
        done.resolved_at = Some(self.ctx.clock().now());
        self.queue().complete(done.clone());

        self.ctx.persist_atom(&id).await;
        self.ctx.persist_review(&done).await;
        self.ctx.emit(EngineEvent::ReviewResolved {
            atom_id: id.clone(),
            decision: decision.to_string(),
        });
        tracing::info!(atom_id = %id, %decision, "review resolved");
        done
    }
}
