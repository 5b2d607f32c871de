//! Hierarchical validator
//!
//! Holds the registered checkers per level and applies the gate policy.
//! The atomic level is judged per atom on `must` rules only; `should`
//! findings there are quality flags that feed the confidence score. The
//! module, component and system levels are judged by the full gate policy.

use crate::checker::{CheckInput, Checker, Subject};
use crate::checkers;
use crate::config::ValidationConfig;
use crate::error::ValidationError;
use crate::gate::{GatePolicy, GateVerdict};
use crate::outcome::{Scope, ValidationLevel, ValidationResult};
use crate::syntax;
use aee_atom::AtomId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Atomic-level verdict for one artifact
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicAssessment {
    pub result: ValidationResult,
    /// Atomicity heuristic in [0,1]: 0 is a tiny single definition
    pub complexity_norm: f64,
}

impl AtomicAssessment {
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.result.passed
    }

    #[inline]
    #[must_use]
    pub fn pass_ratio(&self) -> f64 {
        self.result.pass_ratio()
    }

    #[must_use]
    pub fn violated_rules(&self) -> Vec<String> {
        self.result.violated_rules()
    }
}

/// Gate evaluation of one scope
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeValidation {
    pub result: ValidationResult,
    pub verdict: GateVerdict,
}

impl ScopeValidation {
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }
}

/// Runs registered checkers level by level
#[derive(Clone)]
pub struct HierarchicalValidator {
    checkers: BTreeMap<ValidationLevel, Vec<Arc<dyn Checker>>>,
    config: ValidationConfig,
    policy: GatePolicy,
}

impl fmt::Debug for HierarchicalValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: BTreeMap<&ValidationLevel, Vec<&str>> = self
            .checkers
            .iter()
            .map(|(level, list)| (level, list.iter().map(|c| c.name()).collect()))
            .collect();
        f.debug_struct("HierarchicalValidator")
            .field("checkers", &names)
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for HierarchicalValidator {
    fn default() -> Self {
        Self::with_builtins(ValidationConfig::default(), GatePolicy::default())
    }
}

impl HierarchicalValidator {
    /// Validator with no checkers registered
    #[must_use]
    pub fn new(config: ValidationConfig, policy: GatePolicy) -> Self {
        Self {
            checkers: BTreeMap::new(),
            config,
            policy,
        }
    }

    /// Validator with every built-in checker registered
    #[must_use]
    pub fn with_builtins(config: ValidationConfig, policy: GatePolicy) -> Self {
        let mut validator = Self::new(config, policy);
        for checker in checkers::builtin() {
            validator.insert(checker);
        }
        validator
    }

    /// Add a checker
    ///
    /// # Errors
    /// `DuplicateChecker` if a checker with the same name already runs at
    /// that level.
    pub fn register(&mut self, checker: Arc<dyn Checker>) -> Result<(), ValidationError> {
        let level = checker.level();
        if self.checker_names(level).any(|name| name == checker.name()) {
            return Err(ValidationError::DuplicateChecker {
                name: checker.name().to_string(),
                level,
            });
        }
        tracing::debug!(checker = checker.name(), %level, "checker registered");
        self.insert(checker);
        Ok(())
    }

    fn insert(&mut self, checker: Arc<dyn Checker>) {
        self.checkers.entry(checker.level()).or_default().push(checker);
    }

    pub fn checker_names(&self, level: ValidationLevel) -> impl Iterator<Item = &'static str> + '_ {
        self.checkers
            .get(&level)
            .into_iter()
            .flat_map(|list| list.iter().map(|c| c.name()))
    }

    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    #[must_use]
    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Level 1 on a freshly generated artifact
    #[must_use]
    pub fn validate_atomic(&self, subject: Subject<'_>, available: &[Subject<'_>]) -> AtomicAssessment {
        let scope = Scope::Atom(subject.id.clone());
        let subjects = [subject];
        let input = CheckInput {
            scope: &scope,
            subjects: &subjects,
            available,
            missing: &[],
            config: &self.config,
        };
        let checks: Vec<_> = self
            .checkers
            .get(&ValidationLevel::Atomic)
            .map(|list| list.iter().map(|c| c.run(&input)).collect())
            .unwrap_or_default();
        let passed = !checks.iter().any(|c| c.has_must_failure());

        AtomicAssessment {
            complexity_norm: self.complexity_norm(&subject),
            result: ValidationResult {
                scope,
                level: ValidationLevel::Atomic,
                checks,
                passed,
            },
        }
    }

    /// Levels 2 to 4 over a scope, judged by the gate policy
    #[must_use]
    pub fn validate_scope(
        &self,
        level: ValidationLevel,
        scope: Scope,
        subjects: &[Subject<'_>],
        available: &[Subject<'_>],
        missing: &[AtomId],
    ) -> ScopeValidation {
        let input = CheckInput {
            scope: &scope,
            subjects,
            available,
            missing,
            config: &self.config,
        };
        let checks: Vec<_> = self
            .checkers
            .get(&level)
            .map(|list| list.iter().map(|c| c.run(&input)).collect())
            .unwrap_or_default();
        let verdict = self.policy.evaluate(&checks);

        tracing::debug!(
            %scope,
            %level,
            passed = verdict.passed,
            must_failures = verdict.must_failures,
            should_fraction = verdict.should_fraction,
            "scope validated"
        );

        ScopeValidation {
            result: ValidationResult {
                scope,
                level,
                checks,
                passed: verdict.passed,
            },
            verdict,
        }
    }

    /// Atomicity heuristic: size against twice the ceiling, blended with
    /// definitions beyond the first
    #[must_use]
    pub fn complexity_norm(&self, subject: &Subject<'_>) -> f64 {
        let report = syntax::inspect(subject.artifact);
        let ceiling = f64::from(self.config.size_ceiling.max(1));
        #[allow(clippy::cast_precision_loss)]
        let size = (report.lines as f64 / (2.0 * ceiling)).min(1.0);
        #[allow(clippy::cast_precision_loss)]
        let spread = (report.definitions.saturating_sub(1) as f64
            / self.config.max_definitions.max(1) as f64)
            .min(1.0);
        (0.7 * size + 0.3 * spread).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Severity, Violation};
    use aee_atom::{Artifact, AtomSpec, AtomicUnit, Language};

    struct NoTodo;

    impl Checker for NoTodo {
        fn name(&self) -> &'static str {
            "no-todo"
        }
        fn level(&self) -> ValidationLevel {
            ValidationLevel::Atomic
        }
        fn severity(&self) -> Severity {
            Severity::Must
        }
        fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
            input
                .subjects
                .iter()
                .filter(|s| s.artifact.source().contains("todo!()"))
                .map(|s| Violation::must("no-todo", "placeholder body").on(s.id))
                .collect()
        }
    }

    #[test]
    fn oversized_atom_still_passes_atomic() {
        let validator = HierarchicalValidator::default();
        let atom = AtomicUnit::new("a", "t", AtomSpec::new("a"));
        let body: String = (0..15).map(|i| format!("    let v{i} = {i};\n")).collect();
        let artifact = Artifact::new(Language::Rust, format!("fn a() {{\n{body}}}\n"));
        let assessment = validator.validate_atomic(Subject::new(&atom, &artifact), &[]);
        assert!(assessment.passed());
        assert!(assessment.pass_ratio() < 1.0);
        assert!(assessment.complexity_norm > 0.5);
    }

    #[test]
    fn registered_checker_runs() {
        let mut validator = HierarchicalValidator::default();
        validator.register(Arc::new(NoTodo)).unwrap();
        let atom = AtomicUnit::new("a", "t", AtomSpec::new("a"));
        let artifact = Artifact::new(Language::Rust, "fn a() { todo!() }");
        let assessment = validator.validate_atomic(Subject::new(&atom, &artifact), &[]);
        assert!(!assessment.passed());
        assert!(assessment.violated_rules()[0].contains("no-todo"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut validator = HierarchicalValidator::default();
        let err = validator.register(Arc::new(crate::checkers::SyntaxCheck)).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateChecker { .. }));
    }

    #[test]
    fn tiny_atom_has_low_complexity() {
        let validator = HierarchicalValidator::default();
        let atom = AtomicUnit::new("a", "t", AtomSpec::new("a"));
        let artifact = Artifact::new(Language::Rust, "fn a() {}");
        let norm = validator.complexity_norm(&Subject::new(&atom, &artifact));
        assert!(norm < 0.1);
    }

    #[test]
    fn empty_level_passes_gate() {
        let validator = HierarchicalValidator::new(ValidationConfig::default(), GatePolicy::default());
        let outcome = validator.validate_scope(ValidationLevel::System, Scope::System, &[], &[], &[]);
        assert!(outcome.passed());
    }
}
