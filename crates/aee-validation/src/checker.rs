//! Checker plugin interface

use crate::config::ValidationConfig;
use crate::outcome::{CheckOutcome, Scope, Severity, ValidationLevel, Violation};
use aee_atom::{AtomId, AtomSpec, AtomicUnit, Artifact};
use std::collections::{BTreeMap, BTreeSet};

/// One atom together with the artifact under inspection
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub id: &'a AtomId,
    pub spec: &'a AtomSpec,
    pub dependencies: &'a BTreeSet<AtomId>,
    pub artifact: &'a Artifact,
}

impl<'a> Subject<'a> {
    /// Pair an atom with a candidate artifact that is not stored yet
    #[must_use]
    pub fn new(atom: &'a AtomicUnit, artifact: &'a Artifact) -> Self {
        Self {
            id: &atom.id,
            spec: &atom.spec,
            dependencies: &atom.dependencies,
            artifact,
        }
    }

    /// Pair an atom with its effective artifact, if it has one
    #[must_use]
    pub fn from_atom(atom: &'a AtomicUnit) -> Option<Self> {
        atom.effective_artifact().map(|artifact| Self::new(atom, artifact))
    }

    #[must_use]
    pub fn qualified_module(&self) -> String {
        format!("{}/{}", self.spec.component, self.spec.module)
    }
}

/// Everything a checker sees for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    pub scope: &'a Scope,
    /// Atoms in scope that have an artifact
    pub subjects: &'a [Subject<'a>],
    /// Every atom with an artifact so far, for cross-scope resolution
    pub available: &'a [Subject<'a>],
    /// Atoms in scope that have no artifact (failed or not yet generated)
    pub missing: &'a [AtomId],
    pub config: &'a ValidationConfig,
}

impl<'a> CheckInput<'a> {
    /// Exported name to the atoms exporting it, over `available`
    #[must_use]
    pub fn export_index(&self) -> BTreeMap<&'a str, Vec<Subject<'a>>> {
        let mut index: BTreeMap<&'a str, Vec<Subject<'a>>> = BTreeMap::new();
        for subject in self.available {
            for export in subject.artifact.exports() {
                index.entry(export.name.as_str()).or_default().push(*subject);
            }
        }
        index
    }
}

/// Last segment of a qualified name (`auth::hash` and `auth.hash` give `hash`)
#[must_use]
pub fn local_name(name: &str) -> &str {
    name.rsplit(|c| c == ':' || c == '.').next().unwrap_or(name)
}

/// A validation rule set bound to one level
///
/// Checkers are pure: they read the input and report violations, and
/// never touch engine state.
pub trait Checker: Send + Sync {
    /// Unique name, used in results and for registration
    fn name(&self) -> &'static str;

    fn level(&self) -> ValidationLevel;

    /// Tag of the rules this checker enforces
    fn severity(&self) -> Severity;

    /// Whether evaluations count towards the should fraction
    fn counts_towards_should(&self) -> bool {
        self.severity() == Severity::Should
    }

    /// Report violations for the given scope
    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation>;

    /// Run and wrap into an outcome
    fn run(&self, input: &CheckInput<'_>) -> CheckOutcome {
        CheckOutcome {
            checker: self.name().to_string(),
            level: self.level(),
            evaluated: input.subjects.len() + input.missing.len(),
            should_scope: self.counts_towards_should(),
            violations: self.check(input),
        }
    }
}
