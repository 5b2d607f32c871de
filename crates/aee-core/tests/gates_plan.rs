//! Scenario Plan: hierarchical gates and fault localization
//!
//! - A cyclic plan aborts during planning, naming the cycle, before any
//!   generator call.
//! - A module gate failure is bisected to the offending atom, which is
//!   regenerated with the violations as feedback.
//! - A culprit that keeps breaking the gate is quarantined for review with
//!   its candidate artifact, and the rest of the module is promoted.
//! - When a fresh atom clashes with a settled one, the fresh atom is
//!   blamed and regenerated.
//! - A settled atom pulled into review stops supplying its dependents.
//! - Persistence failures are counted but never stop a run.

use aee_atom::{AtomId, AtomStatus, AtomStore, StoreError};
use aee_core::{
    AbortKind, AtomOutcome, EngineContext, ReviewDecisionKind, ReviewReason, RetryOrchestrator, RunState,
    WaveExecutor,
};
use aee_test_utils::{
    assert_status, atom, atom_in, cycle, engine, fast_config, independent, FailingRepository, ScriptedGenerator,
    Step,
};
use aee_validation::{
    CheckInput, Checker, HierarchicalValidator, LocalizationMethod, Scope, Severity, ValidationLevel, Violation,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn module_gate(report: &aee_core::RunReport) -> &aee_core::GateRecord {
    report
        .gates
        .iter()
        .find(|g| g.level == ValidationLevel::Module)
        .expect("module gate fired")
}

#[tokio::test]
async fn cycle_aborts_before_generation() {
    let (ctx, sink) = engine(cycle(), fast_config());
    let generator = Arc::new(ScriptedGenerator::new());
    let executor = WaveExecutor::new(ctx, generator.clone());

    let report = executor.run().await;

    assert_eq!(report.state, RunState::Aborted);
    let abort = report.abort.expect("abort info");
    assert_eq!(abort.kind, AbortKind::CycleDetected);
    assert_eq!(abort.members, vec![AtomId::new("a"), AtomId::new("b"), AtomId::new("c")]);
    assert!(generator.calls().is_empty());
    assert_eq!(report.total_attempts, 0);
    assert_eq!(sink.kinds(), vec!["run_finished"]);
}

#[tokio::test]
async fn module_gate_culprit_is_regenerated() {
    let (ctx, _) = engine(vec![atom("x", &[]), atom("y", &[])], fast_config());
    let generator = Arc::new(ScriptedGenerator::new().script("x", [Step::Duplicate("y".into())]));
    let executor = WaveExecutor::new(ctx.clone(), generator.clone());

    let report = executor.run().await;

    assert!(report.is_completed());
    let gate = module_gate(&report);
    assert_eq!(gate.scope, Scope::Module("core/main".into()));
    assert!(gate.passed);
    assert_eq!(gate.evaluations, 2);
    assert_eq!(gate.method, Some(LocalizationMethod::Halving));
    assert_eq!(gate.culprits, vec![AtomId::new("x")]);
    assert_eq!(gate.retried, vec![AtomId::new("x")]);
    assert!(gate.quarantined.is_empty());

    assert_status(&ctx, "x", AtomStatus::Validated);
    assert_status(&ctx, "y", AtomStatus::Validated);
    let retry = generator.calls_for("x").pop().unwrap();
    assert_eq!(retry.attempt, 2);
    assert!(retry.feedback.iter().any(|f| f.contains("duplicate-symbol")));
}

#[tokio::test]
async fn persistent_culprit_is_quarantined_with_its_candidate() {
    let (ctx, sink) = engine(vec![atom("x", &[]), atom("y", &[])], fast_config());
    let generator =
        ScriptedGenerator::new().script("x", [Step::Duplicate("y".into()), Step::Duplicate("y".into())]);
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(generator));

    let report = executor.run().await;

    assert!(report.is_completed());
    let gate = module_gate(&report);
    assert!(gate.passed);
    assert_eq!(gate.quarantined, vec![AtomId::new("x")]);
    assert_status(&ctx, "x", AtomStatus::InReview);
    assert_status(&ctx, "y", AtomStatus::Validated);
    assert_eq!(
        report.outcome(&AtomId::new("x")),
        Some(AtomOutcome::Review(ReviewReason::GateQuarantine))
    );
    assert_eq!(report.waves[0].review, 1);
    assert!(sink.count("gate_failed") >= 2);

    let item = ctx.review_queue().get(&AtomId::new("x")).expect("queued");
    assert!(item.candidate.is_some());
    assert!(!item.suggestions.is_empty());

    let resolved = executor.review().approve(&AtomId::new("x")).await.unwrap();
    assert_eq!(resolved.decision, Some(ReviewDecisionKind::Approve));
    assert_status(&ctx, "x", AtomStatus::Resolved);
    assert_eq!(ctx.store().artifact(&AtomId::new("x")), item.candidate);
}

#[tokio::test]
async fn gates_fire_on_module_boundaries() {
    let atoms = vec![
        atom_in("p", "core", "lib", &[]),
        atom_in("q", "core", "app", &["p"]),
    ];
    let (ctx, _) = engine(atoms, fast_config());
    let executor = WaveExecutor::new(ctx, Arc::new(ScriptedGenerator::new()));

    let report = executor.run().await;

    assert!(report.is_completed());
    let fired: Vec<(Option<usize>, Scope)> = report
        .gates
        .iter()
        .filter(|g| g.level == ValidationLevel::Module)
        .map(|g| (g.wave, g.scope.clone()))
        .collect();
    assert_eq!(
        fired,
        vec![
            (Some(0), Scope::Module("core/lib".into())),
            (Some(1), Scope::Module("core/app".into())),
        ]
    );
    let system = report.gates.last().expect("system gate");
    assert_eq!(system.level, ValidationLevel::System);
    assert!(system.passed);
}

/// Flags whatever exports `shadowed` once `by` is in scope
struct ShadowedExport {
    shadowed: &'static str,
    by: &'static str,
}

impl Checker for ShadowedExport {
    fn name(&self) -> &'static str {
        "shadowed-export"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Module
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        if !input.subjects.iter().any(|s| s.id.as_str() == self.by) {
            return Vec::new();
        }
        input
            .subjects
            .iter()
            .filter(|s| s.artifact.export(self.shadowed).is_some())
            .map(|s| {
                Violation::must("shadowed-export", format!("`{}` shadowed by {}", self.shadowed, self.by)).on(s.id)
            })
            .collect()
    }
}

#[tokio::test]
async fn later_wave_offender_is_regenerated() {
    let atoms = vec![
        atom("a", &[]),
        atom("b", &["a"]),
        atom_in("c", "web", "ui", &["a", "b"]),
    ];
    let (ctx, _) = engine(atoms, fast_config());
    let generator = Arc::new(ScriptedGenerator::new().script("b", [Step::Duplicate("a".into())]));
    let executor = WaveExecutor::new(ctx.clone(), generator.clone());

    let report = executor.run().await;

    assert!(report.is_completed());
    let gate = report
        .gates
        .iter()
        .find(|g| g.level == ValidationLevel::Module && g.wave == Some(1))
        .expect("module gate at wave 1");
    assert_eq!(gate.scope, Scope::Module("core/main".into()));
    assert!(gate.passed);
    assert_eq!(gate.method, Some(LocalizationMethod::Halving));
    assert_eq!(gate.culprits, vec![AtomId::new("b")]);
    assert_eq!(gate.retried, vec![AtomId::new("b")]);
    assert!(gate.quarantined.is_empty());

    assert_status(&ctx, "a", AtomStatus::Validated);
    assert_status(&ctx, "b", AtomStatus::Validated);
    assert_status(&ctx, "c", AtomStatus::Validated);
    assert_eq!(generator.calls_for("a").len(), 1);
    assert_eq!(generator.calls_for("b").len(), 2);
    assert!(report.gates.last().is_some_and(|g| g.level == ValidationLevel::System && g.passed));
}

#[tokio::test]
async fn settled_atom_under_review_blocks_its_dependents() {
    let atoms = vec![
        atom("a", &[]),
        atom("b", &["a"]),
        atom_in("c", "web", "ui", &["a", "b"]),
    ];
    let (ctx, _) = engine(atoms, fast_config());
    let generator = Arc::new(ScriptedGenerator::new());
    let config = ctx.config();
    let mut validator = HierarchicalValidator::with_builtins(config.validation.clone(), config.gate.policy());
    validator
        .register(Arc::new(ShadowedExport { shadowed: "a", by: "b" }))
        .unwrap();
    let orchestrator = RetryOrchestrator::new(generator.clone(), Arc::new(validator), config.backoff.clone());
    let executor = WaveExecutor::with_orchestrator(ctx.clone(), orchestrator);

    let report = executor.run().await;

    assert!(report.is_completed());
    let gate = report
        .gates
        .iter()
        .find(|g| g.level == ValidationLevel::Module && g.wave == Some(1))
        .expect("module gate at wave 1");
    assert!(gate.culprits.contains(&AtomId::new("a")));

    assert_status(&ctx, "a", AtomStatus::InReview);
    assert_status(&ctx, "b", AtomStatus::InReview);
    assert_status(&ctx, "c", AtomStatus::Pending);
    assert_eq!(report.outcome(&AtomId::new("c")), Some(AtomOutcome::Blocked));
    assert!(generator.calls_for("c").is_empty());

    let a = AtomId::new("a");
    assert!(!ctx.store().dependencies_ready([&a]));
    assert!(matches!(
        ctx.store().dependency_artifacts(&AtomId::new("c"), [a.clone()]),
        Err(StoreError::DependencyNotReady { .. })
    ));
    let item = ctx.review_queue().get(&a).expect("queued");
    assert!(item.suggestions.iter().any(|s| s.contains("consumed by b")));
}

#[tokio::test]
async fn persistence_failures_do_not_stop_the_run() {
    let store = Arc::new(AtomStore::from_atoms(independent(2)).unwrap());
    let ctx = Arc::new(EngineContext::new(fast_config(), store).with_repository(Arc::new(FailingRepository)));
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(ScriptedGenerator::new()));

    let report = executor.run().await;

    assert!(report.is_completed());
    assert_eq!(report.count(AtomStatus::Validated), 2);
    assert!(report.persistence_failures > 0);
    assert_eq!(report.persistence_failures, ctx.persistence_failures());
}
