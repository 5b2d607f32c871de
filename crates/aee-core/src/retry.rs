//! Retry orchestration
//!
//! Drives one atom through generate, then atomic validation, up to the
//! attempt budget. Each attempt is a small state machine
//! ([`AttemptState`]): `Pending -> Running -> Succeeded | Failed`.
//!
//! Between attempts:
//! - later attempts carry the previous violations as feedback and a
//!   perturbed [`AttemptStrategy`]
//! - attempts that reached the generator and failed (unavailable or timed
//!   out) are followed by an exponential backoff slept on the context's
//!   [`Clock`](crate::clock::Clock)
//! - attempts rejected by local validation retry immediately

use crate::config::{BackoffConfig, RetryConfig};
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::generator::{AttemptContext, Generator};
use aee_atom::{Artifact, AtomId, AtomStatus, AtomicUnit, AttemptOutcome, AttemptStrategy, RetryAttempt};
use aee_validation::{AtomicAssessment, HierarchicalValidator, Subject};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Chooses the strategy parameters of attempt `n`
///
/// Implementations must be strictly monotonic in `n` and bounded, so no
/// attempt repeats the parameters of an earlier one.
pub trait StrategyPolicy: Send + Sync + std::fmt::Debug {
    fn strategy(&self, attempt: u32, config: &RetryConfig) -> AttemptStrategy;
}

/// Halves the remaining distance to the bound on every attempt
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometricPerturbation;

impl StrategyPolicy for GeometricPerturbation {
    fn strategy(&self, attempt: u32, config: &RetryConfig) -> AttemptStrategy {
        let attempt = attempt.max(1);
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let decay = 0.5_f64.powi(exponent);
        AttemptStrategy {
            attempt,
            temperature: config.max_temperature - (config.max_temperature - config.base_temperature) * decay,
            strictness: config.min_strictness + (config.base_strictness - config.min_strictness) * decay,
        }
    }
}

/// Exponential backoff with symmetric jitter
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    rng: Mutex<StdRng>,
}

impl Backoff {
    /// Seeded from `config.seed` when set, otherwise from the OS
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Undithered delay after the `failures`-th consecutive failure
    #[must_use]
    pub fn nominal(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.max(1) - 1).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.config.base_ms as f64 * self.config.factor.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.config.max_ms as f64);
        duration_from_ms(capped)
    }

    /// Delay with jitter applied, never above the cap
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let nominal = self.nominal(failures).as_secs_f64() * 1000.0;
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + self.rng.lock().random_range(-jitter..=jitter)
        } else {
            1.0
        };
        #[allow(clippy::cast_precision_loss)]
        let max = self.config.max_ms as f64;
        duration_from_ms((nominal * factor).clamp(0.0, max))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn duration_from_ms(ms: f64) -> Duration {
    Duration::from_millis(ms.max(0.0).round() as u64)
}

/// Lifecycle of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Running,
    Succeeded,
    Failed(AttemptOutcome),
}

impl AttemptState {
    /// Pending to Running
    #[must_use]
    pub fn start(self) -> Self {
        match self {
            Self::Pending => Self::Running,
            other => other,
        }
    }

    /// Running to a terminal state; terminal states are sticky
    #[must_use]
    pub fn finish(self, outcome: AttemptOutcome) -> Self {
        match (self, outcome) {
            (Self::Running, AttemptOutcome::Succeeded) => Self::Succeeded,
            (Self::Running, failed) => Self::Failed(failed),
            (other, _) => other,
        }
    }

    /// Whether no further attempt follows
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Result of a single attempt
#[derive(Debug, Clone)]
pub enum AttemptResult {
    /// Atomic validation passed; the atom is left Validating
    Passed {
        artifact: Artifact,
        assessment: AtomicAssessment,
    },
    Failed {
        outcome: AttemptOutcome,
        /// Violations or the generator error, as feedback for the next try
        feedback: Vec<String>,
        assessment: Option<AtomicAssessment>,
    },
    /// Cancellation observed; the atom was put back to Pending
    Cancelled,
}

/// Result of running an atom through its budget
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// The atom is Validating with a candidate artifact awaiting gates
    Passed {
        artifact: Artifact,
        assessment: AtomicAssessment,
        attempts: u32,
    },
    /// Budget used up; the atom is Failed
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
        last_assessment: Option<AtomicAssessment>,
    },
    Cancelled,
}

/// Bounded generate-and-validate loop for one atom
pub struct RetryOrchestrator {
    generator: Arc<dyn Generator>,
    validator: Arc<HierarchicalValidator>,
    policy: Box<dyn StrategyPolicy>,
    backoff: Backoff,
}

impl std::fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("validator", &self.validator)
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryOrchestrator {
    /// Orchestrator with the [`GeometricPerturbation`] policy
    #[must_use]
    pub fn new(
        generator: Arc<dyn Generator>,
        validator: Arc<HierarchicalValidator>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            generator,
            validator,
            policy: Box::new(GeometricPerturbation),
            backoff: Backoff::new(backoff),
        }
    }

    /// Replace the strategy policy
    #[must_use]
    pub fn with_policy(mut self, policy: impl StrategyPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Validator shared with the gates
    #[must_use]
    pub fn validator(&self) -> &Arc<HierarchicalValidator> {
        &self.validator
    }

    /// Run `atom_id` until an attempt passes or the budget is spent
    ///
    /// `dependencies` must hold the artifact of every dependency, taken
    /// from Validated or Resolved atoms.
    ///
    /// # Errors
    /// Store errors only; generation and validation failures are absorbed.
    pub async fn attempt(
        &self,
        ctx: &EngineContext,
        atom_id: &AtomId,
        dependencies: &BTreeMap<AtomId, Artifact>,
    ) -> Result<RetryOutcome, EngineError> {
        let max = ctx.config().retry.max_attempts;
        let mut feedback = Vec::new();
        let mut last_error = None;
        let mut last_assessment = None;
        let mut consecutive_transient = 0;

        loop {
            let used = ctx.store().get(atom_id).map_or(0, |a| a.attempt_count());
            if used >= max {
                break;
            }
            match self.attempt_once(ctx, atom_id, dependencies, feedback.clone(), None).await? {
                AttemptResult::Passed { artifact, assessment } => {
                    return Ok(RetryOutcome::Passed {
                        artifact,
                        assessment,
                        attempts: used + 1,
                    });
                }
                AttemptResult::Cancelled => return Ok(RetryOutcome::Cancelled),
                AttemptResult::Failed {
                    outcome,
                    feedback: next,
                    assessment,
                } => {
                    last_error = next.last().cloned();
                    last_assessment = assessment;
                    feedback = next;
                    if outcome.is_transient() {
                        consecutive_transient += 1;
                        if used + 1 < max && !self.back_off(ctx, atom_id, consecutive_transient).await {
                            reset_to_pending(ctx, atom_id);
                            ctx.persist_atom(atom_id).await;
                            return Ok(RetryOutcome::Cancelled);
                        }
                    } else {
                        consecutive_transient = 0;
                    }
                }
            }
        }

        let attempts = ctx.store().get(atom_id).map_or(0, |a| a.attempt_count());
        let status = ctx.store().status(atom_id)?;
        if status != AtomStatus::Failed {
            ctx.store().transition(atom_id, AtomStatus::Failed)?;
        }
        ctx.persist_atom(atom_id).await;
        tracing::warn!(%atom_id, attempts, error = ?last_error, "retry budget exhausted");
        Ok(RetryOutcome::Exhausted {
            attempts,
            last_error,
            last_assessment,
        })
    }

    /// Run exactly one attempt, numbered after the atom's existing log
    ///
    /// Used by the retry loop, gate retries and reviewer regeneration.
    /// The atom may be Pending, Validating, Failed or InReview on entry.
    ///
    /// # Errors
    /// Store errors for illegal transitions or unknown atoms.
    pub async fn attempt_once(
        &self,
        ctx: &EngineContext,
        atom_id: &AtomId,
        dependencies: &BTreeMap<AtomId, Artifact>,
        feedback: Vec<String>,
        human_feedback: Option<String>,
    ) -> Result<AttemptResult, EngineError> {
        let token = ctx.cancellation();
        if token.is_cancelled() {
            reset_to_pending(ctx, atom_id);
            return Ok(AttemptResult::Cancelled);
        }

        let atom = ctx
            .store()
            .get(atom_id)
            .ok_or_else(|| EngineError::Store(aee_atom::StoreError::UnknownAtom(atom_id.clone())))?;
        let number = atom.attempt_count() + 1;
        let strategy = self.policy.strategy(number, &ctx.config().retry);

        if atom.status() != AtomStatus::Generating {
            ctx.store().transition(atom_id, AtomStatus::Generating)?;
        }
        ctx.emit(EngineEvent::AttemptStarted {
            atom_id: atom_id.clone(),
            attempt: number,
        });
        tracing::debug!(%atom_id, attempt = number, temperature = strategy.temperature, "attempt started");

        let mut context = AttemptContext::new(ctx.run_id(), atom_id.clone(), strategy).with_feedback(feedback);
        if let Some(human) = human_feedback {
            context = context.with_human_feedback(human);
        }

        let mut state = AttemptState::Pending.start();
        let started_at = ctx.clock().now();
        let started = Instant::now();
        let generation = tokio::time::timeout(
            ctx.config().retry.attempt_timeout(),
            self.generator.generate(&atom.spec, dependencies, &context),
        );
        let generated = tokio::select! {
            () = token.cancelled() => None,
            result = generation => Some(result),
        };
        let Some(generated) = generated else {
            reset_to_pending(ctx, atom_id);
            ctx.persist_atom(atom_id).await;
            tracing::debug!(%atom_id, attempt = number, "attempt cancelled");
            return Ok(AttemptResult::Cancelled);
        };

        let (outcome, feedback, error, assessment, artifact) = match generated {
            Err(_elapsed) => {
                let message = format!(
                    "attempt timed out after {}ms",
                    ctx.config().retry.attempt_timeout_ms
                );
                (AttemptOutcome::TimedOut, vec![message.clone()], Some(message), None, None)
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                (AttemptOutcome::GenerationFailed, vec![message.clone()], Some(message), None, None)
            }
            Ok(Ok(artifact)) => {
                ctx.store().transition(atom_id, AtomStatus::Validating)?;
                let assessment = self.assess(ctx, &atom, &artifact, dependencies);
                if assessment.passed() {
                    (AttemptOutcome::Succeeded, Vec::new(), None, Some(assessment), Some(artifact))
                } else {
                    let rules = assessment.violated_rules();
                    (AttemptOutcome::ValidationFailed, rules, None, Some(assessment), None)
                }
            }
        };
        state = state.finish(outcome);
        debug_assert!(state.is_terminal());

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut record = RetryAttempt::new(atom_id.clone(), strategy, outcome).with_timing(started_at, elapsed);
        if let Some(error) = error {
            record = record.with_error(error);
        }
        if outcome == AttemptOutcome::ValidationFailed {
            record = record.with_violations(feedback.clone());
        }
        ctx.store().record_attempt(record.clone())?;
        ctx.persist_attempt(&record).await;
        ctx.emit(EngineEvent::AttemptResolved {
            atom_id: atom_id.clone(),
            attempt: number,
            outcome,
        });

        match (state, artifact, assessment) {
            (AttemptState::Succeeded, Some(artifact), Some(assessment)) => {
                tracing::debug!(%atom_id, attempt = number, hash = %artifact.hash().short(), "attempt passed");
                Ok(AttemptResult::Passed { artifact, assessment })
            }
            (_, _, assessment) => {
                tracing::warn!(%atom_id, attempt = number, ?outcome, "attempt failed");
                Ok(AttemptResult::Failed {
                    outcome,
                    feedback,
                    assessment,
                })
            }
        }
    }

    fn assess(
        &self,
        ctx: &EngineContext,
        atom: &AtomicUnit,
        artifact: &Artifact,
        dependencies: &BTreeMap<AtomId, Artifact>,
    ) -> AtomicAssessment {
        let dep_atoms: Vec<AtomicUnit> = dependencies.keys().filter_map(|id| ctx.store().get(id)).collect();
        let available: Vec<Subject<'_>> = dep_atoms
            .iter()
            .filter_map(|dep| dependencies.get(&dep.id).map(|art| Subject::new(dep, art)))
            .collect();
        self.validator.validate_atomic(Subject::new(atom, artifact), &available)
    }

    /// Sleep before the next attempt; false if cancelled meanwhile
    async fn back_off(&self, ctx: &EngineContext, atom_id: &AtomId, failures: u32) -> bool {
        let delay = self.backoff.delay(failures);
        tracing::debug!(%atom_id, delay_ms = delay.as_millis(), "backing off");
        let token = ctx.cancellation();
        tokio::select! {
            () = token.cancelled() => false,
            () = ctx.clock().sleep(delay) => true,
        }
    }
}

/// Put an in-flight atom back so a later run can pick it up
fn reset_to_pending(ctx: &EngineContext, atom_id: &AtomId) {
    if let Ok(status) = ctx.store().status(atom_id) {
        if status.is_in_flight() {
            if let Err(err) = ctx.store().transition(atom_id, AtomStatus::Pending) {
                tracing::warn!(%atom_id, error = %err, "could not reset cancelled atom");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::generator::{GenerationError, MockGenerator};
    use aee_atom::{AtomSpec, AtomStore, Language};

    fn setup(generator: MockGenerator, config: EngineConfig) -> (EngineContext, RetryOrchestrator, Arc<ManualClock>) {
        let store = Arc::new(AtomStore::from_atoms([AtomicUnit::new("a", "t", AtomSpec::new("a"))]).unwrap());
        let clock = Arc::new(ManualClock::new());
        let ctx = EngineContext::new(config.clone(), store).with_clock(clock.clone());
        let orchestrator = RetryOrchestrator::new(
            Arc::new(generator),
            Arc::new(HierarchicalValidator::default()),
            BackoffConfig {
                seed: Some(7),
                ..config.backoff
            },
        );
        (ctx, orchestrator, clock)
    }

    fn good() -> Artifact {
        Artifact::new(Language::Rust, "pub fn a() -> u64 { 1 }")
    }

    #[test]
    fn geometric_perturbation_is_monotonic_and_bounded() {
        let config = RetryConfig::default();
        let policy = GeometricPerturbation;
        let strategies: Vec<AttemptStrategy> = (1..=8).map(|n| policy.strategy(n, &config)).collect();
        assert!((strategies[0].temperature - config.base_temperature).abs() < 1e-12);
        for pair in strategies.windows(2) {
            assert!(pair[1].temperature > pair[0].temperature);
            assert!(pair[1].strictness < pair[0].strictness);
            assert!(pair[1].temperature <= config.max_temperature);
            assert!(pair[1].strictness >= config.min_strictness);
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff::new(BackoffConfig {
            base_ms: 100,
            factor: 2.0,
            max_ms: 1_000,
            jitter: 0.0,
            seed: Some(1),
        });
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let backoff = Backoff::new(BackoffConfig {
            seed: Some(3),
            ..BackoffConfig::default()
        });
        for _ in 0..100 {
            let ms = backoff.delay(1).as_millis();
            assert!((160..=240).contains(&ms), "{ms}");
        }
    }

    #[test]
    fn attempt_state_transitions() {
        let state = AttemptState::Pending;
        assert_eq!(state.finish(AttemptOutcome::Succeeded), AttemptState::Pending);
        let running = state.start();
        assert_eq!(running, AttemptState::Running);
        let done = running.finish(AttemptOutcome::TimedOut);
        assert_eq!(done, AttemptState::Failed(AttemptOutcome::TimedOut));
        assert_eq!(done.finish(AttemptOutcome::Succeeded), done);
        assert!(done.is_terminal());
    }

    #[tokio::test]
    async fn first_success_stops_the_loop() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().times(1).returning(|_, _, _| Ok(good()));
        let (ctx, orchestrator, clock) = setup(generator, EngineConfig::default());

        let outcome = orchestrator.attempt(&ctx, &AtomId::new("a"), &BTreeMap::new()).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::Passed { attempts: 1, .. }));
        assert_eq!(ctx.store().status(&AtomId::new("a")).unwrap(), AtomStatus::Validating);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn validation_failures_retry_without_sleeping() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(3)
            .returning(|_, _, _| Ok(Artifact::new(Language::Rust, "pub fn a( {")));
        let (ctx, orchestrator, clock) = setup(generator, EngineConfig::default());

        let outcome = orchestrator.attempt(&ctx, &AtomId::new("a"), &BTreeMap::new()).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(ctx.store().status(&AtomId::new("a")).unwrap(), AtomStatus::Failed);
        assert!(clock.sleeps().is_empty());

        let log = ctx.store().attempts(&AtomId::new("a")).unwrap();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|a| a.outcome == AttemptOutcome::ValidationFailed));
        assert!(log.iter().all(|a| !a.violations.is_empty()));
    }

    #[tokio::test]
    async fn later_attempts_carry_feedback() {
        let mut generator = MockGenerator::new();
        let mut seq = mockall::Sequence::new();
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, _, ctx| ctx.feedback.is_empty())
            .returning(|_, _, _| Ok(Artifact::new(Language::Rust, "pub fn a( {")));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, _, ctx| ctx.attempt() == 2 && ctx.feedback.iter().any(|f| f.contains("syntax")))
            .returning(|_, _, _| Ok(good()));
        let (ctx, orchestrator, _) = setup(generator, EngineConfig::default());

        let outcome = orchestrator.attempt(&ctx, &AtomId::new("a"), &BTreeMap::new()).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::Passed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn transient_failures_back_off_between_attempts() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(3)
            .returning(|_, _, _| Err(GenerationError::Unavailable("busy".into())));
        let config = EngineConfig::default().with_backoff(BackoffConfig {
            base_ms: 100,
            factor: 2.0,
            max_ms: 10_000,
            jitter: 0.0,
            seed: Some(1),
        });
        let (ctx, orchestrator, clock) = setup(generator, config);

        let outcome = orchestrator.attempt(&ctx, &AtomId::new("a"), &BTreeMap::new()).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        // no sleep after the final attempt
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generator_times_out_and_counts() {
        let config = EngineConfig::default().with_attempt_timeout(Duration::from_millis(50));
        let (ctx, _, _) = setup(MockGenerator::new(), config.clone());

        struct Slow;
        #[async_trait::async_trait]
        impl Generator for Slow {
            async fn generate(
                &self,
                _spec: &aee_atom::AtomSpec,
                _deps: &BTreeMap<AtomId, Artifact>,
                _ctx: &AttemptContext,
            ) -> Result<Artifact, GenerationError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(good())
            }
        }
        let orchestrator = RetryOrchestrator::new(
            Arc::new(Slow),
            Arc::new(HierarchicalValidator::default()),
            config.backoff,
        );
        let outcome = orchestrator.attempt(&ctx, &AtomId::new("a"), &BTreeMap::new()).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        let log = ctx.store().attempts(&AtomId::new("a")).unwrap();
        assert!(log.iter().all(|a| a.outcome == AttemptOutcome::TimedOut));
    }

    #[tokio::test]
    async fn cancelled_context_resets_to_pending() {
        let generator = MockGenerator::new();
        let (ctx, orchestrator, _) = setup(generator, EngineConfig::default());
        ctx.cancel();
        let outcome = orchestrator.attempt(&ctx, &AtomId::new("a"), &BTreeMap::new()).await.unwrap();
        assert!(matches!(outcome, RetryOutcome::Cancelled));
        assert_eq!(ctx.store().status(&AtomId::new("a")).unwrap(), AtomStatus::Pending);
        assert!(ctx.store().attempts(&AtomId::new("a")).unwrap().is_empty());
    }
}
