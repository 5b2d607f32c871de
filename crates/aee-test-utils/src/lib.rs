//! Testing utilities for the AEE workspace
//!
//! Plan fixtures, scripted generators, and sinks and repositories that
//! record or fail on purpose.

#![allow(missing_docs)]

use aee_atom::{Artifact, AtomId, AtomSpec, AtomStatus, AtomStore, AtomicUnit, Language, RetryAttempt, Signature};
use aee_core::{
    AttemptContext, BackoffConfig, EngineConfig, EngineContext, EventSink, GenerationError, Generator, Repository,
    RepositoryError, ReviewItem, SequencedEvent,
};
use aee_validation::{ValidationLevel, ValidationResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SHAPE: &str = "fn() -> u64";

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// Atom in `core/main` exporting a function named after its id
///
/// Dependencies are declared and their outputs listed as inputs.
pub fn atom(id: &str, deps: &[&str]) -> AtomicUnit {
    atom_in(id, "core", "main", deps)
}

pub fn atom_in(id: &str, component: &str, module: &str, deps: &[&str]) -> AtomicUnit {
    let mut spec = AtomSpec::new(format!("produce {id}"))
        .in_module(component, module)
        .with_output(Signature::new(id, SHAPE));
    for dep in deps {
        spec = spec.with_input(Signature::new(*dep, SHAPE));
    }
    deps.iter()
        .fold(AtomicUnit::new(id, "fixture", spec), |atom, dep| atom.depends_on(*dep))
}

/// `n` atoms without dependencies: `a0`, `a1`, ...
pub fn independent(n: usize) -> Vec<AtomicUnit> {
    (0..n).map(|i| atom(&format!("a{i}"), &[])).collect()
}

/// Each atom depends on the one before it
pub fn chain(ids: &[&str]) -> Vec<AtomicUnit> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| if i == 0 { atom(id, &[]) } else { atom(id, &[ids[i - 1]]) })
        .collect()
}

/// `a` feeds `b` and `c`, which both feed `d`
pub fn diamond() -> Vec<AtomicUnit> {
    vec![atom("a", &[]), atom("b", &["a"]), atom("c", &["a"]), atom("d", &["b", "c"])]
}

/// `a -> b -> c -> a`
pub fn cycle() -> Vec<AtomicUnit> {
    vec![atom("a", &["c"]), atom("b", &["a"]), atom("c", &["b"])]
}

pub fn store(atoms: Vec<AtomicUnit>) -> Arc<AtomStore> {
    Arc::new(AtomStore::from_atoms(atoms).unwrap())
}

/// Defaults with millisecond backoff and a fixed jitter seed
pub fn fast_config() -> EngineConfig {
    EngineConfig::default().with_backoff(BackoffConfig {
        base_ms: 1,
        max_ms: 10,
        seed: Some(7),
        ..BackoffConfig::default()
    })
}

/// Context over `atoms` with a recording sink attached
pub fn engine(atoms: Vec<AtomicUnit>, config: EngineConfig) -> (Arc<EngineContext>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let ctx = EngineContext::new(config, store(atoms)).with_sink(sink.clone());
    (Arc::new(ctx), sink)
}

/// Well-formed artifact satisfying `spec`: exports its outputs, imports its inputs
pub fn artifact_for(spec: &AtomSpec) -> Artifact {
    let calls: Vec<String> = spec.inputs.iter().map(|i| format!("{}()", i.name)).collect();
    let body = if calls.is_empty() { "1".to_string() } else { format!("{} + 1", calls.join(" + ")) };
    let source: String = spec
        .outputs
        .iter()
        .map(|o| format!("pub fn {}() -> u64 {{ {body} }}\n", o.name))
        .collect();
    let artifact = spec
        .outputs
        .iter()
        .fold(Artifact::new(spec.language, source), |a, o| a.with_export(o.clone()));
    spec.inputs.iter().fold(artifact, |a, i| a.with_import(i.clone()))
}

pub fn assert_status(ctx: &EngineContext, id: &str, expected: AtomStatus) {
    let actual = ctx.store().status(&AtomId::new(id)).unwrap();
    assert_eq!(actual, expected, "status of {id}");
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// One scripted response
#[derive(Debug, Clone)]
pub enum Step {
    /// [`artifact_for`] the spec
    Good,
    /// Source that does not parse
    Syntax,
    /// Parses, but exports an extra symbol
    Duplicate(String),
    /// Transient outage
    Outage,
    Reject,
    /// Never returns
    Hang,
    Artifact(Artifact),
}

/// Arguments of one generator call
#[derive(Debug, Clone)]
pub struct Call {
    pub atom_id: AtomId,
    pub attempt: u32,
    pub feedback: Vec<String>,
    pub human_feedback: Option<String>,
}

/// Generator replaying per-atom scripts; unscripted calls are [`Step::Good`]
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<BTreeMap<AtomId, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
    hold: Duration,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn script(self, id: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .entry(AtomId::new(id))
            .or_default()
            .extend(steps);
        self
    }

    /// Sleep this long inside every call
    #[must_use]
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<Call> {
        let id = AtomId::new(id);
        self.calls.lock().iter().filter(|c| c.atom_id == id).cloned().collect()
    }

    /// Atom ids in the order they were first generated
    pub fn first_calls(&self) -> Vec<AtomId> {
        let mut seen = Vec::new();
        for call in self.calls.lock().iter() {
            if !seen.contains(&call.atom_id) {
                seen.push(call.atom_id.clone());
            }
        }
        seen
    }
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        spec: &AtomSpec,
        _dependencies: &BTreeMap<AtomId, Artifact>,
        context: &AttemptContext,
    ) -> Result<Artifact, GenerationError> {
        self.calls.lock().push(Call {
            atom_id: context.atom_id.clone(),
            attempt: context.attempt(),
            feedback: context.feedback.clone(),
            human_feedback: context.human_feedback.clone(),
        });
        let step = self
            .scripts
            .lock()
            .get_mut(&context.atom_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Good);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }

        match step {
            Step::Good => Ok(artifact_for(spec)),
            Step::Syntax => Ok(Artifact::new(Language::Rust, "pub fn broken( -> u64 {")),
            Step::Duplicate(symbol) => {
                let base = artifact_for(spec);
                let source = format!("{}pub fn {symbol}() -> u64 {{ 0 }}\n", base.source());
                let artifact = Artifact::new(spec.language, source).with_export(Signature::new(symbol, SHAPE));
                let artifact = base.exports().iter().fold(artifact, |a, e| a.with_export(e.clone()));
                Ok(base.imports().iter().fold(artifact, |a, i| a.with_import(i.clone())))
            }
            Step::Outage => Err(GenerationError::Unavailable("scripted outage".into())),
            Step::Reject => Err(GenerationError::Rejected("scripted rejection".into())),
            Step::Hang => std::future::pending().await,
            Step::Artifact(artifact) => Ok(artifact),
        }
    }
}

/// Generator that holds each call and tracks how many overlap
#[derive(Debug, Default)]
pub struct ProbeGenerator {
    hold: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: Mutex<Vec<AtomId>>,
}

impl ProbeGenerator {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Atom ids in completion order
    pub fn finished(&self) -> Vec<AtomId> {
        self.finished.lock().clone()
    }
}

#[async_trait::async_trait]
impl Generator for ProbeGenerator {
    async fn generate(
        &self,
        spec: &AtomSpec,
        _dependencies: &BTreeMap<AtomId, Artifact>,
        context: &AttemptContext,
    ) -> Result<Artifact, GenerationError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().push(context.atom_id.clone());
        Ok(artifact_for(spec))
    }
}

// ---------------------------------------------------------------------------
// Sinks and repositories
// ---------------------------------------------------------------------------

/// Keeps every event it sees
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SequencedEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SequencedEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.event.kind() == kind).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &SequencedEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Repository whose every write and read fails
#[derive(Debug, Default)]
pub struct FailingRepository;

fn down() -> RepositoryError {
    RepositoryError::Backend("storage offline".into())
}

#[async_trait::async_trait]
impl Repository for FailingRepository {
    async fn save_atom(&self, _atom: &AtomicUnit) -> Result<(), RepositoryError> {
        Err(down())
    }

    async fn load_atom(&self, _id: &AtomId) -> Result<Option<AtomicUnit>, RepositoryError> {
        Err(down())
    }

    async fn atoms_by_status(&self, _status: AtomStatus) -> Result<Vec<AtomId>, RepositoryError> {
        Err(down())
    }

    async fn append_attempt(&self, _attempt: &RetryAttempt) -> Result<(), RepositoryError> {
        Err(down())
    }

    async fn attempts(&self, _id: &AtomId) -> Result<Vec<RetryAttempt>, RepositoryError> {
        Err(down())
    }

    async fn save_validation(&self, _result: &ValidationResult) -> Result<(), RepositoryError> {
        Err(down())
    }

    async fn validations_by_level(&self, _level: ValidationLevel) -> Result<Vec<ValidationResult>, RepositoryError> {
        Err(down())
    }

    async fn save_review(&self, _item: &ReviewItem) -> Result<(), RepositoryError> {
        Err(down())
    }

    async fn load_review(&self, _id: &AtomId) -> Result<Option<ReviewItem>, RepositoryError> {
        Err(down())
    }

    async fn pending_reviews(&self) -> Result<Vec<ReviewItem>, RepositoryError> {
        Err(down())
    }
}
