//! Module, component and system gates
//!
//! A gate validates a scope, and on failure bisects to the atoms that
//! broke it. Culprits still waiting as candidates get one more attempt
//! with the violations as feedback (while budget lasts); the rest are
//! quarantined into the review queue. The scope is then validated again
//! without them until it passes.

use super::{Candidate, GateRecord, RunProgress, WaveExecutor};
use crate::confidence::ConfidenceInputs;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::retry::AttemptResult;
use crate::review::{ReviewItem, ReviewReason};
use aee_atom::{AtomId, AtomStatus, AtomicUnit};
use aee_graph::{DependencyGraph, ExecutionWave};
use aee_validation::{Localization, Scope, ScopeValidation, Subject, ValidationLevel};
use std::collections::{BTreeMap, BTreeSet};

/// What happened to one culprit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    /// Regenerated and accepted at the atomic level again
    Retried,
    Quarantined,
    /// Already settled elsewhere; left out of further evaluations
    Excluded,
}

/// One validation of a scope and, when it failed, its localization
struct Evaluation {
    validation: ScopeValidation,
    localization: Option<Localization>,
    subjects: Vec<AtomId>,
}

/// Atoms whose artifacts take part in gating
///
/// Candidates are paired with their pending artifact; everything else
/// contributes its stored artifact if it feeds dependents. Atoms under
/// review contribute nothing and count as missing at the system gate.
fn gated_subjects<'a>(atoms: &'a [AtomicUnit], candidates: &'a BTreeMap<AtomId, Candidate>) -> Vec<Subject<'a>> {
    atoms
        .iter()
        .filter_map(|atom| match candidates.get(&atom.id) {
            Some(candidate) => Some(Subject::new(atom, &candidate.artifact)),
            None if atom.feeds_dependents() => Subject::from_atom(atom),
            None => None,
        })
        .collect()
}

fn scope_members(graph: &DependencyGraph, scope: &Scope) -> BTreeSet<AtomId> {
    match scope {
        Scope::Atom(id) => BTreeSet::from([id.clone()]),
        Scope::Module(module) => graph.module_members(module).into_iter().collect(),
        Scope::Component(component) => graph.component_members(component).into_iter().collect(),
        Scope::System => graph.waves().iter().flat_map(|w| w.atoms.iter().cloned()).collect(),
    }
}

impl WaveExecutor {
    /// Fire the module and component gates due after `wave`
    ///
    /// Returns how many atoms were quarantined.
    pub(super) async fn gate_wave(
        &self,
        graph: &DependencyGraph,
        wave: &ExecutionWave,
        progress: &mut RunProgress,
    ) -> Result<usize, EngineError> {
        let level = wave.level;
        let interval = self.ctx.config().gate.component_check_interval.max(1);
        let mut modules = BTreeSet::new();
        let mut components = BTreeSet::new();

        let candidates: Vec<AtomId> = progress.candidates.keys().cloned().collect();
        for id in &candidates {
            let boundary = graph.boundary(id);
            if let Some(module) = graph.qualified_module_of(id) {
                if boundary.module || graph.module_completion_level(&module) == Some(level) {
                    modules.insert(module);
                }
            }
            if let Some(component) = graph.component_of(id) {
                let component = component.to_string();
                *progress.component_backlog.entry(component.clone()).or_default() += 1;
                if boundary.component || graph.component_completion_level(&component) == Some(level) {
                    components.insert(component);
                }
            }
        }
        for (component, backlog) in &progress.component_backlog {
            if *backlog >= interval {
                components.insert(component.clone());
            }
        }

        let mut quarantined = 0;
        for module in modules {
            let scope = Scope::Module(module);
            quarantined += self
                .enforce(graph, ValidationLevel::Module, scope, Some(level), progress)
                .await?;
        }
        for component in components {
            progress.component_backlog.insert(component.clone(), 0);
            let scope = Scope::Component(component);
            quarantined += self
                .enforce(graph, ValidationLevel::Component, scope, Some(level), progress)
                .await?;
        }
        Ok(quarantined)
    }

    /// Validate the whole generated set once after the final wave
    pub(super) async fn system_gate(&self, graph: &DependencyGraph, progress: &mut RunProgress) -> Result<(), EngineError> {
        self.enforce(graph, ValidationLevel::System, Scope::System, None, progress)
            .await
            .map(|_| ())
    }

    /// Validate `scope` until it passes, repairing localized culprits
    ///
    /// # Errors
    /// `GateFailedFatal` on a system-level `must` failure, `Validation`
    /// when a lower-level failure cannot be pinned on any atom, and
    /// `Cancelled` when a gate retry observes cancellation.
    async fn enforce(
        &self,
        graph: &DependencyGraph,
        level: ValidationLevel,
        scope: Scope,
        wave: Option<usize>,
        progress: &mut RunProgress,
    ) -> Result<usize, EngineError> {
        let members = scope_members(graph, &scope);
        let rounds = self.ctx.config().gate.retry_rounds as usize;
        let cap = members.len() * (rounds + 1) + 2;
        let mut record = GateRecord::new(level, scope.clone(), wave);
        let mut excluded: BTreeSet<AtomId> = BTreeSet::new();
        let mut implicated: BTreeSet<AtomId> = BTreeSet::new();

        loop {
            if self.ctx.is_cancelled() {
                progress.gates.push(record);
                return Err(EngineError::Cancelled);
            }
            record.evaluations += 1;
            let evaluation = self.evaluate(level, &scope, &members, &excluded, &progress.candidates);
            self.ctx.persist_validation(&evaluation.validation.result).await;

            if evaluation.validation.passed() {
                for id in &evaluation.subjects {
                    progress.cover(id, !implicated.contains(id));
                }
                record.passed = true;
                tracing::info!(%level, %scope, evaluations = record.evaluations, "gate passed");
                self.ctx.emit(EngineEvent::GatePassed {
                    level,
                    scope: scope.clone(),
                });
                break;
            }

            let violations = evaluation.validation.result.violations().count();
            let Some(localization) = evaluation.localization else {
                let culprits: Vec<AtomId> = evaluation.validation.result.implicated_atoms().into_iter().collect();
                tracing::error!(%scope, violations, "system gate failed a must rule");
                self.ctx.emit(EngineEvent::GateFailed {
                    level,
                    scope: scope.clone(),
                    culprits,
                    violations,
                });
                progress.gates.push(record);
                return Err(EngineError::GateFailedFatal {
                    level,
                    scope,
                    violations: evaluation.validation.result.violated_rules(),
                });
            };

            record.method = Some(localization.method);
            self.ctx.emit(EngineEvent::GateFailed {
                level,
                scope: scope.clone(),
                culprits: localization.culprits.iter().cloned().collect(),
                violations,
            });

            if !localization.is_localized() || record.evaluations > cap {
                for id in &evaluation.subjects {
                    progress.cover(id, false);
                }
                if level == ValidationLevel::System {
                    tracing::warn!(
                        %scope,
                        violations,
                        fraction = evaluation.validation.verdict.should_fraction,
                        "system gate failure could not be localized"
                    );
                    break;
                }
                progress.gates.push(record);
                return Err(EngineError::Validation {
                    level,
                    scope,
                    message: format!(
                        "{violations} violations could not be attributed to any atom ({})",
                        evaluation.validation.result.violated_rules().join(", ")
                    ),
                });
            }

            tracing::warn!(
                %scope,
                culprits = localization.culprits.len(),
                method = ?localization.method,
                probes = localization.probes,
                "gate failed, culprits localized"
            );
            for culprit in &localization.culprits {
                implicated.insert(culprit.clone());
                if !record.culprits.contains(culprit) {
                    record.culprits.push(culprit.clone());
                }
                let notes: Vec<String> = evaluation
                    .validation
                    .result
                    .violations()
                    .filter(|v| v.atoms.is_empty() || v.atoms.contains(culprit))
                    .map(ToString::to_string)
                    .collect();
                match self.repair(graph, culprit, notes, level, progress).await? {
                    Repair::Retried => record.retried.push(culprit.clone()),
                    Repair::Quarantined => {
                        record.quarantined.push(culprit.clone());
                        excluded.insert(culprit.clone());
                    }
                    Repair::Excluded => {
                        excluded.insert(culprit.clone());
                    }
                }
            }
        }

        let quarantined = record.quarantined.len();
        progress.gates.push(record);
        Ok(quarantined)
    }

    /// Run the scope's checkers once; bisect unless the failure is fatal
    fn evaluate(
        &self,
        level: ValidationLevel,
        scope: &Scope,
        members: &BTreeSet<AtomId>,
        excluded: &BTreeSet<AtomId>,
        candidates: &BTreeMap<AtomId, Candidate>,
    ) -> Evaluation {
        let validator = self.orchestrator.validator();
        let atoms = self.ctx.store().snapshot();
        let available = gated_subjects(&atoms, candidates);
        let subjects: Vec<Subject<'_>> = available
            .iter()
            .copied()
            .filter(|s| members.contains(s.id) && !excluded.contains(s.id))
            .collect();
        let missing: Vec<AtomId> = if level == ValidationLevel::System {
            let present: BTreeSet<&AtomId> = available.iter().map(|s| s.id).collect();
            atoms
                .iter()
                .filter(|a| !present.contains(&a.id) && !excluded.contains(&a.id))
                .map(|a| a.id.clone())
                .collect()
        } else {
            Vec::new()
        };

        let validation = validator.validate_scope(level, scope.clone(), &subjects, &available, &missing);
        let localization = if validation.passed()
            || (level == ValidationLevel::System && validation.verdict.is_must_failure())
        {
            None
        } else {
            let fresh: BTreeSet<AtomId> = candidates.keys().cloned().collect();
            Some(validator.bisect_preferring(&validation.result, &subjects, &available, &missing, &fresh))
        };

        Evaluation {
            validation,
            localization,
            subjects: subjects.iter().map(|s| s.id.clone()).collect(),
        }
    }

    /// Retry or quarantine one localized culprit
    async fn repair(
        &self,
        graph: &DependencyGraph,
        culprit: &AtomId,
        notes: Vec<String>,
        level: ValidationLevel,
        progress: &mut RunProgress,
    ) -> Result<Repair, EngineError> {
        let store = self.ctx.store();
        let reason = if level == ValidationLevel::System {
            ReviewReason::SystemGate
        } else {
            ReviewReason::GateQuarantine
        };
        let max_attempts = self.ctx.config().retry.max_attempts;

        match store.status(culprit)? {
            AtomStatus::Validating if progress.candidates.contains_key(culprit) => {
                let rounds = progress.gate_rounds.entry(culprit.clone()).or_insert(0);
                let used = store.get(culprit).map_or(max_attempts, |a| a.attempt_count());
                let dependencies = graph.dependencies_of(culprit);
                if *rounds < self.ctx.config().gate.retry_rounds
                    && used < max_attempts
                    && store.dependencies_ready(&dependencies)
                {
                    *rounds += 1;
                    tracing::info!(atom_id = %culprit, %level, "regenerating gate culprit");
                    let dependencies = store.dependency_artifacts(culprit, dependencies)?;
                    match self
                        .orchestrator
                        .attempt_once(&self.ctx, culprit, &dependencies, notes.clone(), None)
                        .await?
                    {
                        AttemptResult::Passed { artifact, assessment } => {
                            progress
                                .candidates
                                .insert(culprit.clone(), Candidate { artifact, assessment });
                            return Ok(Repair::Retried);
                        }
                        AttemptResult::Cancelled => {
                            progress.candidates.remove(culprit);
                            return Err(EngineError::Cancelled);
                        }
                        AttemptResult::Failed { .. } => {}
                    }
                }
                self.quarantine_candidate(culprit, notes, reason, progress).await?;
                Ok(Repair::Quarantined)
            }
            AtomStatus::Validated => {
                store.transition(culprit, AtomStatus::InReview)?;
                let score = store.get(culprit).and_then(|a| a.confidence_score()).unwrap_or(0.0);
                self.ctx.emit(EngineEvent::AtomSettled {
                    atom_id: culprit.clone(),
                    status: AtomStatus::InReview,
                    confidence: Some(score),
                });
                let consumers = self.withdraw(graph, culprit, progress);
                let mut item = ReviewItem::new(culprit.clone(), score, reason);
                item.suggestions = notes;
                if !consumers.is_empty() {
                    let names: Vec<&str> = consumers.iter().map(AtomId::as_str).collect();
                    item.suggestions
                        .push(format!("artifact already consumed by {}", names.join(", ")));
                }
                self.enqueue_review(item).await;
                self.ctx.persist_atom(culprit).await;
                Ok(Repair::Quarantined)
            }
            status => {
                tracing::warn!(atom_id = %culprit, %status, "gate culprit already settled, excluding");
                Ok(Repair::Excluded)
            }
        }
    }

    /// Block the pending dependents of an atom pulled out of circulation
    ///
    /// Returns the dependents that were already generated against it.
    fn withdraw(&self, graph: &DependencyGraph, id: &AtomId, progress: &mut RunProgress) -> Vec<AtomId> {
        let store = self.ctx.store();
        let mut consumers = Vec::new();
        for dependent in graph.transitive_dependents(id) {
            match store.status(&dependent) {
                Ok(AtomStatus::Pending) => {
                    progress.blocked.insert(dependent);
                }
                Ok(AtomStatus::Failed) | Err(_) => {}
                Ok(_) => consumers.push(dependent),
            }
        }
        tracing::warn!(
            atom_id = %id,
            blocked = progress.blocked.len(),
            consumers = consumers.len(),
            "validated atom withdrawn for review"
        );
        consumers
    }

    async fn quarantine_candidate(
        &self,
        culprit: &AtomId,
        notes: Vec<String>,
        reason: ReviewReason,
        progress: &mut RunProgress,
    ) -> Result<(), EngineError> {
        let store = self.ctx.store();
        let candidate = progress.candidates.remove(culprit);
        store.transition(culprit, AtomStatus::InReview)?;

        let attempts = store.get(culprit).map_or(1, |a| a.attempt_count());
        let score = self.scorer.score(&ConfidenceInputs {
            validation_pass_ratio: candidate.as_ref().map_or(0.0, |c| c.assessment.pass_ratio()),
            attempt_count: attempts,
            max_attempts: self.ctx.config().retry.max_attempts,
            complexity_norm: candidate.as_ref().map_or(1.0, |c| c.assessment.complexity_norm),
            integration_score: 0.0,
        });
        store.set_confidence(culprit, score)?;
        self.ctx.emit(EngineEvent::AtomSettled {
            atom_id: culprit.clone(),
            status: AtomStatus::InReview,
            confidence: Some(score),
        });

        let mut item = ReviewItem::new(culprit.clone(), score, reason);
        item.suggestions = notes;
        if let Some(candidate) = candidate {
            item = item.with_candidate(candidate.artifact);
        }
        self.enqueue_review(item).await;
        self.ctx.persist_atom(culprit).await;
        Ok(())
    }
}
