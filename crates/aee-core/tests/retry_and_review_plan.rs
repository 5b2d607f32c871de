//! Scenario Plan: retries, exhaustion and human review
//!
//! - A failed attempt is retried with the violations as feedback.
//! - An atom that spends its budget ends Failed and is queued for review
//!   with its full attempt log.
//! - Reviewers approve, edit or regenerate queued atoms; resolved atoms
//!   unblock their dependents on the next run.
//! - The lowest-confidence share of promoted atoms is sampled for review.

use aee_atom::{AtomId, AtomStatus, AttemptOutcome};
use aee_core::{
    AtomOutcome, RegenerateOutcome, ReviewDecisionKind, ReviewError, ReviewReason, RunState, WaveExecutor,
};
use aee_test_utils::{
    artifact_for, assert_status, atom, engine, fast_config, independent, ScriptedGenerator, Step,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn exhausted_a() -> ScriptedGenerator {
    ScriptedGenerator::new().script("a", [Step::Syntax, Step::Syntax, Step::Syntax])
}

#[tokio::test]
async fn violations_feed_the_next_attempt() {
    let (ctx, _) = engine(vec![atom("a", &[])], fast_config());
    let generator = Arc::new(ScriptedGenerator::new().script("a", [Step::Syntax, Step::Good]));
    let executor = WaveExecutor::new(ctx.clone(), generator.clone());

    let report = executor.run().await;

    assert!(report.is_completed());
    assert_status(&ctx, "a", AtomStatus::Validated);
    let calls = generator.calls_for("a");
    assert_eq!(calls.len(), 2);
    assert!(calls[0].feedback.is_empty());
    assert!(!calls[1].feedback.is_empty());
    assert_eq!(calls[1].attempt, 2);

    let log = ctx.store().attempts(&AtomId::new("a")).unwrap();
    let outcomes: Vec<AttemptOutcome> = log.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AttemptOutcome::ValidationFailed, AttemptOutcome::Succeeded]);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (ctx, _) = engine(vec![atom("a", &[])], fast_config());
    let generator = ScriptedGenerator::new().script("a", [Step::Outage, Step::Reject, Step::Good]);
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(generator));

    executor.run().await;

    assert_status(&ctx, "a", AtomStatus::Validated);
    assert_eq!(ctx.store().attempts(&AtomId::new("a")).unwrap().len(), 3);
}

#[tokio::test]
async fn exhausted_atom_is_failed_and_queued() {
    let (ctx, sink) = engine(vec![atom("a", &[]), atom("b", &["a"])], fast_config());
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(exhausted_a()));

    let report = executor.run().await;

    assert_eq!(report.state, RunState::Completed);
    assert_status(&ctx, "a", AtomStatus::Failed);
    assert_eq!(ctx.store().attempts(&AtomId::new("a")).unwrap().len(), 3);

    let item = ctx.review_queue().get(&AtomId::new("a")).expect("queued");
    assert_eq!(item.reason, ReviewReason::RetriesExhausted);
    assert!(item.confidence < 0.7);
    assert_eq!(report.review_queue.len(), 1);
    assert_eq!(
        report.outcome(&AtomId::new("a")),
        Some(AtomOutcome::Review(ReviewReason::RetriesExhausted))
    );
    assert_eq!(sink.count("review_enqueued"), 1);
}

#[tokio::test]
async fn edit_resolves_and_unblocks_dependents() {
    let (ctx, _) = engine(vec![atom("a", &[]), atom("b", &["a"])], fast_config());
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(exhausted_a()));
    executor.run().await;

    let review = executor.review();
    let a = AtomId::new("a");
    assert!(matches!(review.approve(&a).await, Err(ReviewError::NoArtifact(_))));

    let spec = ctx.store().get(&a).unwrap().spec;
    let item = review.edit(&a, artifact_for(&spec)).await.unwrap();
    assert_eq!(item.decision, Some(ReviewDecisionKind::Edit));
    assert!(item.resolved_at.is_some());
    assert_status(&ctx, "a", AtomStatus::Resolved);
    assert!(review.queue().is_empty());

    let second = executor.run().await;
    assert!(second.is_completed());
    assert_eq!(second.outcome(&a), Some(AtomOutcome::Resolved));
    assert_eq!(second.outcome(&AtomId::new("b")), Some(AtomOutcome::Validated));
    assert_eq!(second.waves[0].skipped, 1);
}

#[tokio::test]
async fn edit_with_broken_code_is_rejected() {
    let (ctx, _) = engine(vec![atom("a", &[])], fast_config());
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(exhausted_a()));
    executor.run().await;

    let broken = aee_atom::Artifact::new(aee_atom::Language::Rust, "pub fn a( {");
    let err = executor.review().edit(&AtomId::new("a"), broken).await.unwrap_err();

    assert!(matches!(err, ReviewError::EditRejected { .. }));
    assert_status(&ctx, "a", AtomStatus::Failed);
    assert!(ctx.review_queue().contains(&AtomId::new("a")));
}

#[tokio::test]
async fn regenerate_passes_reviewer_guidance() {
    let (ctx, sink) = engine(vec![atom("a", &[])], fast_config());
    let generator = Arc::new(exhausted_a());
    let executor = WaveExecutor::new(ctx.clone(), generator.clone());
    executor.run().await;

    let outcome = executor
        .review()
        .regenerate(&AtomId::new("a"), "return a constant")
        .await
        .unwrap();

    let RegenerateOutcome::Resolved(item) = outcome else {
        panic!("expected a resolution, got {outcome:?}");
    };
    assert_eq!(item.decision, Some(ReviewDecisionKind::Regenerate));
    assert_status(&ctx, "a", AtomStatus::Resolved);
    let last = generator.calls().pop().unwrap();
    assert_eq!(last.human_feedback.as_deref(), Some("return a constant"));
    assert_eq!(last.attempt, 4);
    assert_eq!(sink.count("review_resolved"), 1);
}

#[tokio::test]
async fn failed_regeneration_goes_back_to_review() {
    let (ctx, _) = engine(vec![atom("a", &[])], fast_config());
    let generator = ScriptedGenerator::new().script("a", [Step::Syntax, Step::Syntax, Step::Syntax, Step::Syntax]);
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(generator));
    executor.run().await;

    let outcome = executor.review().regenerate(&AtomId::new("a"), "try harder").await.unwrap();

    assert!(matches!(outcome, RegenerateOutcome::Requeued { .. }));
    assert_status(&ctx, "a", AtomStatus::InReview);
    assert!(ctx.review_queue().contains(&AtomId::new("a")));
}

#[tokio::test]
async fn lowest_confidence_share_is_sampled() {
    let (ctx, _) = engine(independent(10), fast_config());
    let executor = WaveExecutor::new(ctx.clone(), Arc::new(ScriptedGenerator::new()));

    let report = executor.run().await;

    assert!(report.is_completed());
    assert_eq!(report.review_queue.len(), 1);
    assert_eq!(report.review_queue[0].reason, ReviewReason::LowConfidence);
    assert_eq!(report.count(AtomStatus::InReview), 1);
    assert_eq!(report.count(AtomStatus::Validated), 9);
}
