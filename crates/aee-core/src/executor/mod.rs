//! Wave executor
//!
//! Runs a plan wave by wave. Inside a wave, ready atoms go through the
//! retry orchestrator on a pool bounded by `concurrency`; nothing from a
//! later wave starts before the gates of the current wave have settled.
//! Atoms that pass atomic validation stay candidates (status `Validating`)
//! until the module and component gates of their wave accept them, and
//! only then are promoted to `Validated` so dependents can consume them.

mod gates;
mod report;

pub use report::{AtomOutcome, GateRecord, RunReport, RunState, WaveSummary};

use crate::confidence::{ConfidenceInputs, ConfidenceScorer};
use crate::context::EngineContext;
use crate::error::{AbortInfo, EngineError};
use crate::events::EngineEvent;
use crate::generator::Generator;
use crate::retry::{RetryOrchestrator, RetryOutcome};
use crate::review::{select_for_review, ReviewItem, ReviewManager, ReviewReason};
use aee_atom::{AtomId, AtomStatus, Artifact};
use aee_graph::{DependencyGraph, ExecutionWave, GraphBuilder, GraphStats, SharedSymbols};
use aee_validation::{AtomicAssessment, HierarchicalValidator};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Accepted at the atomic level, waiting on the gates of its wave
#[derive(Debug, Clone)]
struct Candidate {
    artifact: Artifact,
    assessment: AtomicAssessment,
}

/// Bookkeeping of one run
#[derive(Debug, Default)]
struct RunProgress {
    candidates: BTreeMap<AtomId, Candidate>,
    waves: Vec<WaveSummary>,
    gates: Vec<GateRecord>,
    blocked: BTreeSet<AtomId>,
    /// Promoted during this run, in promotion order
    promoted: Vec<AtomId>,
    /// Per atom: (gates passed without being implicated, gates covering it)
    coverage: BTreeMap<AtomId, (u32, u32)>,
    /// Candidates gated per component since its last component gate
    component_backlog: BTreeMap<String, usize>,
    /// Gate-triggered retries spent per atom
    gate_rounds: BTreeMap<AtomId, u32>,
}

impl RunProgress {
    fn cover(&mut self, id: &AtomId, clean: bool) {
        let entry = self.coverage.entry(id.clone()).or_insert((0, 0));
        entry.1 += 1;
        if clean {
            entry.0 += 1;
        }
    }

    /// Share of covering gates passed cleanly; 1.0 when nothing covered the atom yet
    fn integration(&self, id: &AtomId) -> f64 {
        match self.coverage.get(id) {
            Some(&(clean, total)) if total > 0 => f64::from(clean) / f64::from(total),
            _ => 1.0,
        }
    }
}

/// Drives a plan from `Pending` atoms to a [`RunReport`]
pub struct WaveExecutor {
    ctx: Arc<EngineContext>,
    orchestrator: Arc<RetryOrchestrator>,
    scorer: ConfidenceScorer,
    state: Mutex<RunState>,
    graph: RwLock<Option<Arc<DependencyGraph>>>,
}

impl std::fmt::Debug for WaveExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveExecutor")
            .field("run_id", &self.ctx.run_id())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl WaveExecutor {
    /// Executor with the built-in checkers and the configured gate policy
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>, generator: Arc<dyn Generator>) -> Self {
        let config = ctx.config();
        let validator = HierarchicalValidator::with_builtins(config.validation.clone(), config.gate.policy());
        let orchestrator = RetryOrchestrator::new(generator, Arc::new(validator), config.backoff.clone());
        Self::with_orchestrator(ctx, orchestrator)
    }

    /// Executor around a prepared orchestrator, e.g. one with extra checkers
    #[must_use]
    pub fn with_orchestrator(ctx: Arc<EngineContext>, orchestrator: RetryOrchestrator) -> Self {
        let scorer = ConfidenceScorer::new(ctx.config().confidence);
        Self {
            ctx,
            orchestrator: Arc::new(orchestrator),
            scorer,
            state: Mutex::new(RunState::Planning),
            graph: RwLock::new(None),
        }
    }

    /// Shared context this executor runs against
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Current run state; `Planning` before the first run
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Graph of the last planned run
    #[must_use]
    pub fn graph(&self) -> Option<Arc<DependencyGraph>> {
        self.graph.read().clone()
    }

    /// Stop dispatching and abandon in-flight attempts
    ///
    /// Interrupted atoms go back to `Pending`; the run ends `Aborted`.
    pub fn cancel(&self) {
        tracing::info!(run_id = %self.ctx.run_id(), "cancellation requested");
        self.ctx.cancel();
    }

    /// Reviewer operations bound to this executor's engine
    #[must_use]
    pub fn review(&self) -> ReviewManager {
        let manager = ReviewManager::new(Arc::clone(&self.ctx), Arc::clone(&self.orchestrator));
        match self.graph() {
            Some(graph) => manager.with_graph(graph),
            None => manager,
        }
    }

    /// Execute every wave of the stored plan
    pub async fn run(&self) -> RunReport {
        let span = tracing::info_span!("run", run_id = %self.ctx.run_id());
        self.drive().instrument(span).await
    }

    /// Continue after a cancellation
    ///
    /// Settled atoms are skipped; interrupted ones start over from their
    /// remaining attempt budget.
    pub async fn resume(&self) -> RunReport {
        self.ctx.reset_cancellation();
        self.run().await
    }

    async fn drive(&self) -> RunReport {
        let started = Instant::now();
        let mut progress = RunProgress::default();
        self.set_state(RunState::Planning);

        let graph = match self.plan() {
            Ok(graph) => Arc::new(graph),
            Err(err) => return self.abort(&err, None, progress, started).await,
        };
        *self.graph.write() = Some(Arc::clone(&graph));
        let stats = graph.stats();

        tracing::info!(
            atoms = stats.atoms,
            edges = stats.edges,
            waves = stats.waves,
            widest = stats.widest_wave,
            "plan leveled"
        );
        self.ctx.emit(EngineEvent::RunStarted {
            atoms: stats.atoms,
            waves: stats.waves,
        });
        for id in self.ctx.store().ids() {
            self.ctx.persist_atom(&id).await;
        }

        match self.execute(&graph, &mut progress).await {
            Ok(()) => {
                self.set_state(RunState::Completed);
                self.ctx.emit(EngineEvent::RunFinished {
                    state: RunState::Completed,
                });
                let report = self.report(RunState::Completed, None, Some(stats), progress, started);
                tracing::info!(
                    validated = report.count(AtomStatus::Validated),
                    review = report.review_queue.len(),
                    blocked = report.blocked.len(),
                    elapsed_ms = report.elapsed_ms,
                    "run completed"
                );
                report
            }
            Err(err) => self.abort(&err, Some(stats), progress, started).await,
        }
    }

    fn plan(&self) -> Result<DependencyGraph, EngineError> {
        let atoms = self.ctx.store().snapshot();
        let mut builder = GraphBuilder::new();
        if self.ctx.config().derive_symbol_edges {
            builder = builder.with_policy(SharedSymbols);
        }
        let graph = builder.add_atoms(atoms.iter())?.build()?;
        Ok(graph)
    }

    async fn execute(&self, graph: &DependencyGraph, progress: &mut RunProgress) -> Result<(), EngineError> {
        for wave in graph.waves() {
            if self.ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let span = tracing::info_span!("wave", level = wave.level, atoms = wave.len());
            self.execute_level(graph, wave, progress).instrument(span).await?;
        }

        self.system_gate(graph, progress).await?;
        self.select_low_confidence(progress).await
    }

    async fn execute_level(
        &self,
        graph: &DependencyGraph,
        wave: &ExecutionWave,
        progress: &mut RunProgress,
    ) -> Result<(), EngineError> {
        self.set_state(RunState::Executing { wave: wave.level });
        let mut summary = match self.dispatch_wave(graph, wave, progress).await {
            Ok(summary) => summary,
            Err((summary, err)) => {
                progress.waves.push(summary);
                return Err(err);
            }
        };

        self.set_state(RunState::Gating { wave: wave.level });
        summary.review += self.gate_wave(graph, wave, progress).await?;
        summary.validated = self.promote_candidates(progress).await?;

        self.ctx.emit(EngineEvent::WaveCompleted {
            level: wave.level,
            validated: summary.validated,
            review: summary.review,
            blocked: summary.blocked,
        });
        tracing::info!(
            validated = summary.validated,
            review = summary.review,
            blocked = summary.blocked,
            peak = summary.peak_concurrency,
            "wave completed"
        );
        progress.waves.push(summary);
        Ok(())
    }

    /// Generate every ready member of `wave`, at most `concurrency` at a time
    async fn dispatch_wave(
        &self,
        graph: &DependencyGraph,
        wave: &ExecutionWave,
        progress: &mut RunProgress,
    ) -> Result<WaveSummary, (WaveSummary, EngineError)> {
        let started = Instant::now();
        let store = self.ctx.store();
        let mut summary = WaveSummary {
            level: wave.level,
            atoms: wave.len(),
            ..WaveSummary::default()
        };

        let mut ready = Vec::new();
        for id in wave.iter() {
            match store.status(id) {
                Ok(AtomStatus::Pending) => {}
                Ok(_) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(err) => return Err((summary, err.into())),
            }
            let dependencies = graph.dependencies_of(id);
            if store.dependencies_ready(&dependencies) {
                ready.push(id.clone());
            } else {
                tracing::warn!(atom_id = %id, "dependency unavailable, atom blocked");
                summary.blocked += 1;
                progress.blocked.insert(id.clone());
            }
        }
        summary.dispatched = ready.len();
        self.ctx.emit(EngineEvent::WaveStarted {
            level: wave.level,
            ready: ready.len(),
            blocked: summary.blocked,
        });

        let limit = self.ctx.config().concurrency.max(1);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut queue = ready.into_iter();
        let mut tasks = FuturesUnordered::new();
        for id in queue.by_ref().take(limit) {
            tasks.push(self.dispatch(graph, id, &in_flight, &peak));
        }

        let mut fatal: Option<EngineError> = None;
        while let Some((id, result)) = tasks.next().await {
            match result {
                Ok(outcome) => self.absorb(id, outcome, progress, &mut summary).await,
                Err(err) => {
                    tracing::error!(atom_id = %id, error = %err, "atom dispatch failed");
                    fatal.get_or_insert(err);
                }
            }
            if fatal.is_none() && !self.ctx.is_cancelled() {
                if let Some(next) = queue.next() {
                    tasks.push(self.dispatch(graph, next, &in_flight, &peak));
                }
            }
        }
        summary.cancelled += queue.count();
        summary.peak_concurrency = peak.load(Ordering::SeqCst);
        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Some(err) = fatal {
            return Err((summary, err));
        }
        if self.ctx.is_cancelled() {
            return Err((summary, EngineError::Cancelled));
        }
        Ok(summary)
    }

    async fn dispatch(
        &self,
        graph: &DependencyGraph,
        id: AtomId,
        in_flight: &AtomicUsize,
        peak: &AtomicUsize,
    ) -> (AtomId, Result<RetryOutcome, EngineError>) {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);

        let result = async {
            let dependencies = self
                .ctx
                .store()
                .dependency_artifacts(&id, graph.dependencies_of(&id))?;
            self.orchestrator.attempt(&self.ctx, &id, &dependencies).await
        }
        .instrument(tracing::debug_span!("atom", atom_id = %id))
        .await;

        in_flight.fetch_sub(1, Ordering::SeqCst);
        (id, result)
    }

    async fn absorb(&self, id: AtomId, outcome: RetryOutcome, progress: &mut RunProgress, summary: &mut WaveSummary) {
        match outcome {
            RetryOutcome::Passed { artifact, assessment, .. } => {
                progress.candidates.insert(id, Candidate { artifact, assessment });
            }
            RetryOutcome::Exhausted {
                attempts,
                last_assessment,
                ..
            } => {
                let score = self.scorer.score(&ConfidenceInputs {
                    validation_pass_ratio: last_assessment.as_ref().map_or(0.0, AtomicAssessment::pass_ratio),
                    attempt_count: attempts,
                    max_attempts: self.ctx.config().retry.max_attempts,
                    complexity_norm: last_assessment.as_ref().map_or(1.0, |a| a.complexity_norm),
                    integration_score: 0.0,
                });
                if let Err(err) = self.ctx.store().set_confidence(&id, score) {
                    tracing::warn!(atom_id = %id, error = %err, "could not record confidence");
                }
                self.ctx.emit(EngineEvent::AtomSettled {
                    atom_id: id.clone(),
                    status: AtomStatus::Failed,
                    confidence: Some(score),
                });
                self.enqueue_review(ReviewItem::new(id.clone(), score, ReviewReason::RetriesExhausted))
                    .await;
                self.ctx.persist_atom(&id).await;
                summary.review += 1;
            }
            RetryOutcome::Cancelled => summary.cancelled += 1,
        }
    }

    /// Move the wave's surviving candidates to `Validated`
    async fn promote_candidates(&self, progress: &mut RunProgress) -> Result<usize, EngineError> {
        let candidates = std::mem::take(&mut progress.candidates);
        let count = candidates.len();
        for (id, candidate) in candidates {
            let store = self.ctx.store();
            store.promote(&id, candidate.artifact)?;
            let attempts = store.get(&id).map_or(1, |a| a.attempt_count());
            let score = self.scorer.score(&ConfidenceInputs {
                validation_pass_ratio: candidate.assessment.pass_ratio(),
                attempt_count: attempts,
                max_attempts: self.ctx.config().retry.max_attempts,
                complexity_norm: candidate.assessment.complexity_norm,
                integration_score: progress.integration(&id),
            });
            store.set_confidence(&id, score)?;
            self.ctx.emit(EngineEvent::AtomSettled {
                atom_id: id.clone(),
                status: AtomStatus::Validated,
                confidence: Some(score),
            });
            self.ctx.persist_atom(&id).await;
            progress.promoted.push(id);
        }
        Ok(count)
    }

    /// Send the lowest-confidence share of this run's promotions to review
    async fn select_low_confidence(&self, progress: &RunProgress) -> Result<(), EngineError> {
        let store = self.ctx.store();
        let scored: Vec<(AtomId, f64)> = progress
            .promoted
            .iter()
            .filter_map(|id| store.get(id))
            .filter(|atom| atom.status() == AtomStatus::Validated)
            .map(|atom| {
                let score = atom.confidence_score().unwrap_or(0.0);
                (atom.id, score)
            })
            .collect();
        let scores: BTreeMap<&AtomId, f64> = scored.iter().map(|(id, s)| (id, *s)).collect();

        let picked = select_for_review(&scored, &self.ctx.config().review);
        tracing::info!(promoted = scored.len(), selected = picked.len(), "low-confidence selection");
        for id in picked {
            let score = scores.get(&id).copied().unwrap_or(0.0);
            store.transition(&id, AtomStatus::InReview)?;
            self.ctx.emit(EngineEvent::AtomSettled {
                atom_id: id.clone(),
                status: AtomStatus::InReview,
                confidence: Some(score),
            });
            self.enqueue_review(ReviewItem::new(id.clone(), score, ReviewReason::LowConfidence))
                .await;
            self.ctx.persist_atom(&id).await;
        }
        Ok(())
    }

    async fn enqueue_review(&self, item: ReviewItem) {
        tracing::info!(
            atom_id = %item.atom_id,
            confidence = item.confidence,
            reason = ?item.reason,
            "queued for review"
        );
        self.ctx.review_queue().enqueue(item.clone());
        self.ctx.emit(EngineEvent::ReviewEnqueued {
            atom_id: item.atom_id.clone(),
            confidence: item.confidence,
            reason: item.reason,
        });
        self.ctx.persist_review(&item).await;
    }

    /// Put unpromoted candidates back so a resumed run regenerates them
    async fn release_candidates(&self, progress: &mut RunProgress) {
        for id in std::mem::take(&mut progress.candidates).into_keys() {
            let store = self.ctx.store();
            if store.status(&id).ok() == Some(AtomStatus::Validating) {
                if let Err(err) = store.transition(&id, AtomStatus::Pending) {
                    tracing::warn!(atom_id = %id, error = %err, "could not release candidate");
                    continue;
                }
                self.ctx.persist_atom(&id).await;
            }
        }
    }

    async fn abort(
        &self,
        err: &EngineError,
        stats: Option<GraphStats>,
        mut progress: RunProgress,
        started: Instant,
    ) -> RunReport {
        self.release_candidates(&mut progress).await;
        self.set_state(RunState::Aborted);
        let abort = AbortInfo::from_error(err);
        if matches!(err, EngineError::Cancelled) {
            tracing::info!("run cancelled");
        } else {
            tracing::error!(kind = ?abort.kind, error = %err, "run aborted");
        }
        self.ctx.emit(EngineEvent::RunFinished {
            state: RunState::Aborted,
        });
        self.report(RunState::Aborted, Some(abort), stats, progress, started)
    }

    fn report(
        &self,
        state: RunState,
        abort: Option<AbortInfo>,
        graph: Option<GraphStats>,
        progress: RunProgress,
        started: Instant,
    ) -> RunReport {
        let store = self.ctx.store();
        let queue = self.ctx.review_queue();
        let atoms = store.snapshot();

        let mut outcomes = BTreeMap::new();
        let mut total_attempts = 0u64;
        for atom in &atoms {
            total_attempts += u64::from(atom.attempt_count());
            let outcome = match atom.status() {
                AtomStatus::Validated => AtomOutcome::Validated,
                AtomStatus::Resolved => AtomOutcome::Resolved,
                AtomStatus::Failed => AtomOutcome::Review(
                    queue
                        .get(&atom.id)
                        .map_or(ReviewReason::RetriesExhausted, |item| item.reason),
                ),
                AtomStatus::InReview => AtomOutcome::Review(
                    queue
                        .get(&atom.id)
                        .map_or(ReviewReason::LowConfidence, |item| item.reason),
                ),
                AtomStatus::Pending if progress.blocked.contains(&atom.id) => AtomOutcome::Blocked,
                AtomStatus::Pending | AtomStatus::Generating | AtomStatus::Validating => AtomOutcome::Cancelled,
            };
            outcomes.insert(atom.id.clone(), outcome);
        }

        RunReport {
            run_id: self.ctx.run_id(),
            state,
            abort,
            graph,
            waves: progress.waves,
            gates: progress.gates,
            blocked: progress.blocked.into_iter().collect(),
            outcomes,
            status_counts: store.status_counts(),
            review_queue: queue.pending(),
            total_attempts,
            persistence_failures: self.ctx.persistence_failures(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn set_state(&self, state: RunState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(from = %*current, to = %state, "run state");
            *current = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::generator::{AttemptContext, GenerationError, MockGenerator};
    use aee_atom::{AtomSpec, AtomStore, AtomicUnit, Language, Signature};
    use pretty_assertions::assert_eq;

    fn spec(name: &str) -> AtomSpec {
        AtomSpec::new(format!("produce {name}"))
            .in_module("core", "math")
            .with_output(Signature::new(name, "fn() -> u64"))
    }

    fn unit(id: &str, deps: &[&str]) -> AtomicUnit {
        deps.iter()
            .fold(AtomicUnit::new(id, "task", spec(id)), |atom, dep| atom.depends_on(*dep))
    }

    fn echo(spec: &AtomSpec, _: &BTreeMap<AtomId, Artifact>, _: &AttemptContext) -> Result<Artifact, GenerationError> {
        let name = &spec.outputs[0].name;
        Ok(Artifact::new(Language::Rust, format!("pub fn {name}() -> u64 {{ 1 }}"))
            .with_export(Signature::new(name.clone(), "fn() -> u64")))
    }

    fn executor(atoms: Vec<AtomicUnit>, generator: MockGenerator, config: EngineConfig) -> WaveExecutor {
        let store = Arc::new(AtomStore::from_atoms(atoms).unwrap());
        let ctx = Arc::new(EngineContext::new(config, store));
        WaveExecutor::new(ctx, Arc::new(generator))
    }

    #[test]
    fn integration_defaults_to_one_until_covered() {
        let mut progress = RunProgress::default();
        let id = AtomId::new("a");
        assert!((progress.integration(&id) - 1.0).abs() < f64::EPSILON);
        progress.cover(&id, true);
        progress.cover(&id, false);
        assert!((progress.integration(&id) - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn independent_atoms_share_one_wave() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().times(3).returning(echo);
        let atoms = vec![unit("a", &[]), unit("b", &[]), unit("c", &[])];
        let exec = executor(atoms, generator, EngineConfig::default());

        let report = exec.run().await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.wave_sizes(), vec![3]);
        assert_eq!(report.waves[0].dispatched, 3);
        assert_eq!(report.total_attempts, 3);
        assert_eq!(exec.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn cycle_aborts_before_any_attempt() {
        let generator = MockGenerator::new();
        let atoms = vec![unit("a", &["c"]), unit("b", &["a"]), unit("c", &["b"])];
        let exec = executor(atoms, generator, EngineConfig::default());

        let report = exec.run().await;

        assert_eq!(report.state, RunState::Aborted);
        let abort = report.abort.expect("abort info");
        assert_eq!(abort.kind, crate::error::AbortKind::CycleDetected);
        assert_eq!(abort.members, vec![AtomId::new("a"), AtomId::new("b"), AtomId::new("c")]);
        assert_eq!(report.total_attempts, 0);
        assert!(report.waves.is_empty());
    }

    #[tokio::test]
    async fn failed_dependency_blocks_dependents() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|spec, deps, ctx| {
                if spec.outputs[0].name == "a" {
                    Ok(Artifact::new(Language::Rust, "pub fn a( {"))
                } else {
                    echo(spec, deps, ctx)
                }
            });
        let atoms = vec![unit("a", &[]), unit("b", &["a"])];
        let exec = executor(atoms, generator, EngineConfig::default().with_max_attempts(2));

        let report = exec.run().await;

        assert!(report.is_completed());
        assert_eq!(report.outcome(&AtomId::new("a")), Some(AtomOutcome::Review(ReviewReason::RetriesExhausted)));
        assert_eq!(report.outcome(&AtomId::new("b")), Some(AtomOutcome::Blocked));
        assert_eq!(report.blocked, vec![AtomId::new("b")]);
        assert_eq!(report.total_attempts, 2);
    }
}
