//! Fault localization after a failed gate
//!
//! Shrinks the blast radius of a failed scope to the smallest atom subset
//! whose removal lets the gate pass. Atomic diagnostics are tried first;
//! if they do not explain the failure, the suspect set is halved until
//! neither half alone accounts for it.

use crate::checker::Subject;
use crate::outcome::{ValidationLevel, ValidationResult};
use crate::validator::HierarchicalValidator;
use aee_atom::AtomId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the culprits were found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalizationMethod {
    /// Re-running atomic checks exposed them
    AtomicDiagnostics,
    /// Repeated halving of the suspect set
    Halving,
    /// No proper subset explains the failure
    Unlocalized,
}

/// Result of bisecting one failed scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localization {
    pub culprits: BTreeSet<AtomId>,
    pub method: LocalizationMethod,
    /// Gate evaluations spent localizing
    pub probes: usize,
}

impl Localization {
    #[inline]
    #[must_use]
    pub fn is_localized(&self) -> bool {
        self.method != LocalizationMethod::Unlocalized
    }
}

impl HierarchicalValidator {
    /// Localize the atoms responsible for a failed scope validation
    ///
    /// `subjects` are the scope members that were gated, `available` and
    /// `missing` are passed through unchanged to every probe.
    #[must_use]
    pub fn bisect(
        &self,
        failed: &ValidationResult,
        subjects: &[Subject<'_>],
        available: &[Subject<'_>],
        missing: &[AtomId],
    ) -> Localization {
        self.bisect_preferring(failed, subjects, available, missing, &BTreeSet::new())
    }

    /// [`bisect`](Self::bisect), suspecting `preferred` atoms first
    ///
    /// When removing the preferred suspects alone lets the scope pass,
    /// halving stays inside that subset and the other members are never
    /// blamed. Gates pass the wave's fresh candidates here so that atoms
    /// accepted by earlier gates are implicated only as a last resort.
    #[must_use]
    pub fn bisect_preferring(
        &self,
        failed: &ValidationResult,
        subjects: &[Subject<'_>],
        available: &[Subject<'_>],
        missing: &[AtomId],
        preferred: &BTreeSet<AtomId>,
    ) -> Localization {
        let mut probe = Probe {
            validator: self,
            failed,
            subjects,
            available,
            missing,
            probes: 0,
        };

        let all: BTreeSet<AtomId> = subjects.iter().map(|s| s.id.clone()).collect();
        let named: BTreeSet<AtomId> = failed
            .implicated_atoms()
            .into_iter()
            .filter(|id| all.contains(id))
            .collect();
        let candidates = if named.is_empty() { &all } else { &named };

        let diagnosed: BTreeSet<AtomId> = subjects
            .iter()
            .filter(|s| candidates.contains(s.id))
            .filter(|s| !self.validate_atomic(**s, available).passed())
            .map(|s| s.id.clone())
            .collect();
        if !diagnosed.is_empty() && probe.passes_without(&diagnosed) {
            tracing::info!(
                scope = %failed.scope,
                culprits = diagnosed.len(),
                "fault localized by atomic diagnostics"
            );
            return probe.finish(diagnosed, LocalizationMethod::AtomicDiagnostics);
        }

        let fresh: BTreeSet<AtomId> = candidates.intersection(preferred).cloned().collect();
        let mut suspects: Vec<AtomId> = if !fresh.is_empty()
            && fresh.len() < candidates.len()
            && probe.passes_without(&fresh)
        {
            fresh.into_iter().collect()
        } else if !named.is_empty() && probe.passes_without(&named) {
            named.into_iter().collect()
        } else if probe.passes_without(&all) {
            all.iter().cloned().collect()
        } else {
            tracing::warn!(scope = %failed.scope, "failure persists without any scope member");
            return probe.finish(all, LocalizationMethod::Unlocalized);
        };

        while suspects.len() > 1 {
            let right = suspects.split_off(suspects.len() / 2);
            let left = std::mem::take(&mut suspects);
            if probe.passes_without(&left.iter().cloned().collect()) {
                suspects = left;
            } else if probe.passes_without(&right.iter().cloned().collect()) {
                suspects = right;
            } else {
                suspects = left.into_iter().chain(right).collect();
                break;
            }
        }

        let culprits: BTreeSet<AtomId> = suspects.into_iter().collect();
        let shrunk = culprits.len() < all.len() || all.len() == 1;
        let method = if shrunk {
            LocalizationMethod::Halving
        } else {
            LocalizationMethod::Unlocalized
        };
        tracing::info!(
            scope = %failed.scope,
            culprits = culprits.len(),
            of = all.len(),
            ?method,
            "bisection finished"
        );
        probe.finish(culprits, method)
    }
}

struct Probe<'v, 'a> {
    validator: &'v HierarchicalValidator,
    failed: &'v ValidationResult,
    subjects: &'v [Subject<'a>],
    available: &'v [Subject<'a>],
    missing: &'v [AtomId],
    probes: usize,
}

impl Probe<'_, '_> {
    /// Re-gate the scope with `excluded` removed from the subjects
    fn passes_without(&mut self, excluded: &BTreeSet<AtomId>) -> bool {
        self.probes += 1;
        let kept: Vec<Subject<'_>> = self
            .subjects
            .iter()
            .filter(|s| !excluded.contains(s.id))
            .copied()
            .collect();
        if self.failed.level == ValidationLevel::Atomic {
            return kept
                .iter()
                .all(|s| self.validator.validate_atomic(*s, self.available).passed());
        }
        self.validator
            .validate_scope(
                self.failed.level,
                self.failed.scope.clone(),
                &kept,
                self.available,
                self.missing,
            )
            .passed()
    }

    fn finish(self, culprits: BTreeSet<AtomId>, method: LocalizationMethod) -> Localization {
        Localization {
            culprits,
            method,
            probes: self.probes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Scope;
    use aee_atom::{Artifact, AtomSpec, AtomicUnit, Language, Signature};

    fn module_atom(id: &str) -> AtomicUnit {
        AtomicUnit::new(id, "t", AtomSpec::new(id).in_module("app", "core"))
    }

    fn exporting(name: &str) -> Artifact {
        Artifact::new(Language::Rust, format!("pub fn {name}() {{}}")).with_export(Signature::new(name, "fn()"))
    }

    #[test]
    fn duplicate_symbol_is_localized_to_one_atom() {
        let validator = HierarchicalValidator::default();
        let atoms: Vec<AtomicUnit> = ["a", "b", "c", "d"].iter().map(|id| module_atom(id)).collect();
        let artifacts = [exporting("one"), exporting("two"), exporting("dup"), exporting("dup")];
        let subjects: Vec<Subject<'_>> = atoms.iter().zip(&artifacts).map(|(a, art)| Subject::new(a, art)).collect();

        let gated = validator.validate_scope(
            ValidationLevel::Module,
            Scope::Module("app/core".into()),
            &subjects,
            &subjects,
            &[],
        );
        assert!(!gated.passed());

        let found = validator.bisect(&gated.result, &subjects, &subjects, &[]);
        assert_eq!(found.method, LocalizationMethod::Halving);
        assert_eq!(found.culprits.len(), 1);
        let culprit = found.culprits.iter().next().unwrap();
        assert!(culprit.as_str() == "c" || culprit.as_str() == "d");
    }

    #[test]
    fn broken_syntax_is_found_by_atomic_diagnostics() {
        let validator = HierarchicalValidator::default();
        let atoms: Vec<AtomicUnit> = ["a", "b"].iter().map(|id| module_atom(id)).collect();
        let artifacts = [
            exporting("x"),
            Artifact::new(Language::Rust, "pub fn x( {").with_export(Signature::new("x", "fn()")),
        ];
        let subjects: Vec<Subject<'_>> = atoms.iter().zip(&artifacts).map(|(a, art)| Subject::new(a, art)).collect();

        let gated = validator.validate_scope(
            ValidationLevel::Module,
            Scope::Module("app/core".into()),
            &subjects,
            &subjects,
            &[],
        );
        let found = validator.bisect(&gated.result, &subjects, &subjects, &[]);
        assert_eq!(found.method, LocalizationMethod::AtomicDiagnostics);
        assert_eq!(found.culprits, BTreeSet::from([AtomId::new("b")]));
    }

    #[test]
    fn preferred_suspects_are_blamed_before_settled_ones() {
        let validator = HierarchicalValidator::default();
        let atoms: Vec<AtomicUnit> = ["a", "b"].iter().map(|id| module_atom(id)).collect();
        let artifacts = [exporting("dup"), exporting("dup")];
        let subjects: Vec<Subject<'_>> = atoms.iter().zip(&artifacts).map(|(a, art)| Subject::new(a, art)).collect();
        let gated = validator.validate_scope(
            ValidationLevel::Module,
            Scope::Module("app/core".into()),
            &subjects,
            &subjects,
            &[],
        );

        let plain = validator.bisect(&gated.result, &subjects, &subjects, &[]);
        assert_eq!(plain.culprits, BTreeSet::from([AtomId::new("a")]));

        let fresh = BTreeSet::from([AtomId::new("b")]);
        let found = validator.bisect_preferring(&gated.result, &subjects, &subjects, &[], &fresh);
        assert_eq!(found.method, LocalizationMethod::Halving);
        assert_eq!(found.culprits, fresh);
    }

    #[test]
    fn settled_atoms_are_blamed_when_fresh_ones_do_not_explain_the_failure() {
        let validator = HierarchicalValidator::default();
        let atoms: Vec<AtomicUnit> = ["a", "b", "c"].iter().map(|id| module_atom(id)).collect();
        let artifacts = [exporting("dup"), exporting("dup"), exporting("c")];
        let subjects: Vec<Subject<'_>> = atoms.iter().zip(&artifacts).map(|(a, art)| Subject::new(a, art)).collect();
        let gated = validator.validate_scope(
            ValidationLevel::Module,
            Scope::Module("app/core".into()),
            &subjects,
            &subjects,
            &[],
        );

        let fresh = BTreeSet::from([AtomId::new("c")]);
        let found = validator.bisect_preferring(&gated.result, &subjects, &subjects, &[], &fresh);
        assert!(found.is_localized());
        assert!(!found.culprits.contains(&AtomId::new("c")));
    }

    #[test]
    fn failure_without_members_is_unlocalized() {
        let validator = HierarchicalValidator::default();
        let atoms = [module_atom("a")];
        let artifacts = [exporting("a")];
        let subjects: Vec<Subject<'_>> = atoms.iter().zip(&artifacts).map(|(a, art)| Subject::new(a, art)).collect();
        // a failed atom with no artifact breaks coverage regardless of members
        let missing = [AtomId::new("lost")];

        let gated = validator.validate_scope(ValidationLevel::System, Scope::System, &subjects, &subjects, &missing);
        assert!(!gated.passed());
        let found = validator.bisect(&gated.result, &subjects, &subjects, &missing);
        assert!(!found.is_localized());
    }
}
