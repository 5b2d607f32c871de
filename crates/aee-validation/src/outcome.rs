//! Validation levels, violations and results

use aee_atom::AtomId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The four escalating validation levels, in firing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationLevel {
    /// Every atom, right after generation
    Atomic,
    /// Atoms of one module compose
    Module,
    /// Modules of one component integrate
    Component,
    /// Whole generated set, once after the final wave
    System,
}

impl ValidationLevel {
    pub const ALL: [ValidationLevel; 4] = [
        ValidationLevel::Atomic,
        ValidationLevel::Module,
        ValidationLevel::Component,
        ValidationLevel::System,
    ];
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a failed rule weighs on the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Any failure fails the gate
    Must,
    /// Failures count towards the tolerated fraction
    Should,
}

/// What a validation run covered
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Atom(AtomId),
    /// Qualified as `component/module`
    Module(String),
    Component(String),
    System,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Atom(id) => write!(f, "atom {id}"),
            Scope::Module(m) => write!(f, "module {m}"),
            Scope::Component(c) => write!(f, "component {c}"),
            Scope::System => f.write_str("system"),
        }
    }
}

/// A broken rule, naming the atoms it implicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub atoms: Vec<AtomId>,
}

impl Violation {
    #[must_use]
    pub fn must(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule, Severity::Must, message)
    }

    #[must_use]
    pub fn should(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule, Severity::Should, message)
    }

    fn new(rule: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            atoms: Vec::new(),
        }
    }

    /// Attach an implicated atom
    #[must_use]
    pub fn on(mut self, atom: &AtomId) -> Self {
        if !self.atoms.contains(atom) {
            self.atoms.push(atom.clone());
            self.atoms.sort();
        }
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.rule, self.message)
    }
}

/// Result of one checker over one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub checker: String,
    pub level: ValidationLevel,
    /// Subjects the checker looked at
    pub evaluated: usize,
    /// Whether this checker's evaluations count towards the should fraction
    pub should_scope: bool,
    pub violations: Vec<Violation>,
}

impl CheckOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn has_must_failure(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Must)
    }

    /// Distinct subjects that broke a should rule
    ///
    /// A should violation that names no atom still counts once.
    #[must_use]
    pub fn should_failures(&self) -> usize {
        let mut atoms: BTreeSet<&AtomId> = BTreeSet::new();
        let mut anonymous = 0;
        for violation in self.violations.iter().filter(|v| v.severity == Severity::Should) {
            if violation.atoms.is_empty() {
                anonymous += 1;
            }
            atoms.extend(violation.atoms.iter());
        }
        (atoms.len() + anonymous).min(self.evaluated.max(1))
    }

    /// Distinct subjects that broke any rule
    #[must_use]
    pub fn failing_subjects(&self) -> usize {
        let atoms: BTreeSet<&AtomId> = self.violations.iter().flat_map(|v| v.atoms.iter()).collect();
        if atoms.is_empty() && !self.violations.is_empty() {
            1
        } else {
            atoms.len()
        }
    }
}

/// Outcome of validating one scope at one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub scope: Scope,
    pub level: ValidationLevel,
    pub checks: Vec<CheckOutcome>,
    /// Aggregate pass under the gate policy in force
    pub passed: bool,
}

impl ValidationResult {
    /// The atom this result is about, for atom-scoped results
    #[must_use]
    pub fn atom_id(&self) -> Option<&AtomId> {
        match &self.scope {
            Scope::Atom(id) => Some(id),
            _ => None,
        }
    }

    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.checks.iter().flat_map(|c| c.violations.iter())
    }

    /// Violated rules rendered for generator feedback
    #[must_use]
    pub fn violated_rules(&self) -> Vec<String> {
        self.violations().map(ToString::to_string).collect()
    }

    #[must_use]
    pub fn has_must_failure(&self) -> bool {
        self.checks.iter().any(CheckOutcome::has_must_failure)
    }

    /// Atoms named by any violation, sorted
    #[must_use]
    pub fn implicated_atoms(&self) -> BTreeSet<AtomId> {
        self.violations().flat_map(|v| v.atoms.iter().cloned()).collect()
    }

    /// Share of (checker, subject) evaluations that passed, in [0,1]
    #[must_use]
    pub fn pass_ratio(&self) -> f64 {
        let total: usize = self.checks.iter().map(|c| c.evaluated).sum();
        if total == 0 {
            return 1.0;
        }
        let failed: usize = self
            .checks
            .iter()
            .map(|c| c.failing_subjects().min(c.evaluated))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let ratio = (total - failed) as f64 / total as f64;
        ratio.clamp(0.0, 1.0)
    }
}
