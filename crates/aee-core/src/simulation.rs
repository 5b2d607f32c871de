//! Deterministic stand-in generator and synthetic plans
//!
//! Used by the `aee simulate` command and the integration tests. Every
//! decision the simulated generator makes is derived from a hash of the
//! seed, the atom and the attempt number, so a run is reproducible no
//! matter how attempts interleave across workers.

use crate::generator::{AttemptContext, GenerationError, Generator};
use aee_atom::{Artifact, AtomId, AtomSpec, AtomicUnit, ContentHash, Language, Signature};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::time::Duration;

const SHAPE: &str = "fn() -> u64";

/// Generator that writes tiny summing functions
///
/// Each declared output becomes `pub fn name() -> u64`, calling every
/// declared input. With `failure_rate` an attempt fails as if the service
/// were unavailable; with `bad_output_rate / attempt` it returns code
/// that does not parse. Attempts carrying reviewer feedback always succeed.
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    seed: u64,
    failure_rate: f64,
    bad_output_rate: f64,
    latency: Duration,
}

impl SimulatedGenerator {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            failure_rate: 0.0,
            bad_output_rate: 0.0,
            latency: Duration::ZERO,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = probability(rate);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_bad_output_rate(mut self, rate: f64) -> Self {
        self.bad_output_rate = probability(rate);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn rng_for(&self, atom: &AtomId, attempt: u32) -> StdRng {
        let seed = self.seed.to_le_bytes();
        let attempt = attempt.to_le_bytes();
        let hash = ContentHash::compute_parts([&seed[..], atom.as_str().as_bytes(), &attempt[..]]);
        StdRng::from_seed(*hash.as_bytes())
    }
}

#[async_trait::async_trait]
impl Generator for SimulatedGenerator {
    async fn generate(
        &self,
        spec: &AtomSpec,
        _dependencies: &BTreeMap<AtomId, Artifact>,
        context: &AttemptContext,
    ) -> Result<Artifact, GenerationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let attempt = context.attempt().max(1);
        let mut rng = self.rng_for(&context.atom_id, attempt);
        let guided = context.human_feedback.is_some();

        if !guided && rng.random_bool(self.failure_rate) {
            return Err(GenerationError::Unavailable(format!(
                "simulated outage on attempt {attempt}"
            )));
        }
        let bad = self.bad_output_rate / f64::from(attempt);
        if !guided && rng.random_bool(probability(bad)) {
            let name = spec.outputs.first().map_or("broken", |s| s.name.as_str());
            return Ok(Artifact::new(spec.language, format!("pub fn {name}( -> u64 {{")));
        }

        Ok(render(spec, rng.random_range(1..=9u64)))
    }
}

fn render(spec: &AtomSpec, constant: u64) -> Artifact {
    let calls: Vec<String> = spec.inputs.iter().map(|i| format!("{}()", i.name)).collect();
    let body = if calls.is_empty() {
        constant.to_string()
    } else {
        format!("{} + {constant}", calls.join(" + "))
    };

    let mut source = String::new();
    for output in &spec.outputs {
        let _ = writeln!(source, "pub fn {}() -> u64 {{ {body} }}", output.name);
    }
    let artifact = spec
        .outputs
        .iter()
        .fold(Artifact::new(spec.language, source), |artifact, output| {
            artifact.with_export(output.clone())
        });
    spec.inputs
        .iter()
        .fold(artifact, |artifact, input| artifact.with_import(input.clone()))
}

fn probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Shape of a generated plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanShape {
    pub atoms: usize,
    pub modules: usize,
    /// Upper bound on dependencies per atom
    pub fan_in: usize,
    pub seed: u64,
}

impl Default for PlanShape {
    fn default() -> Self {
        Self {
            atoms: 200,
            modules: 8,
            fan_in: 3,
            seed: 0,
        }
    }
}

/// Modules grouped into one component
pub const MODULES_PER_COMPONENT: usize = 4;

/// Build an acyclic plan of `shape.atoms` atoms
///
/// Atoms are laid out in contiguous module blocks (`mNN.aNNNNN`), four
/// modules to a component. Each atom depends on up to `fan_in` earlier
/// atoms and imports their outputs, so the plan levels cleanly.
#[must_use]
pub fn synthetic_plan(shape: PlanShape) -> Vec<AtomicUnit> {
    let mut rng = StdRng::seed_from_u64(shape.seed);
    let modules = shape.modules.max(1);
    let total = shape.atoms;
    let mut atoms: Vec<AtomicUnit> = Vec::with_capacity(total);

    for index in 0..total {
        let module = index * modules / total.max(1);
        let component = module / MODULES_PER_COMPONENT;
        let id = format!("m{module:02}.a{index:05}");
        let name = format!("f{index}");

        let mut dependencies = BTreeSet::new();
        if index > 0 && shape.fan_in > 0 {
            let count = rng.random_range(0..=shape.fan_in.min(index));
            for _ in 0..count {
                dependencies.insert(rng.random_range(0..index));
            }
        }

        let mut spec = AtomSpec::new(format!("compute {name}"))
            .in_module(format!("c{component:02}"), format!("m{module:02}"))
            .with_language(Language::Rust)
            .with_line_estimates([rng.random_range(1..=4u32)])
            .with_output(Signature::new(name.clone(), SHAPE));
        spec.provides.push(name);
        for &dep in &dependencies {
            spec = spec.with_input(Signature::new(format!("f{dep}"), SHAPE));
        }

        let atom = dependencies
            .iter()
            .fold(AtomicUnit::new(id, "simulation", spec), |atom, &dep| {
                atom.depends_on(atoms[dep].id.clone())
            });
        atoms.push(atom);
    }
    atoms
}
