//! Level 4: acceptance over the whole generated set

use crate::checker::{local_name, CheckInput, Checker};
use crate::outcome::{Severity, ValidationLevel, Violation};
use aee_atom::AtomId;
use std::collections::{BTreeMap, BTreeSet};

/// Each provided symbol is exported by exactly one atom (`must`)
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalUniquenessCheck;

impl Checker for GlobalUniquenessCheck {
    fn name(&self) -> &'static str {
        "global-uniqueness"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::System
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let provided: BTreeSet<&str> = input
            .subjects
            .iter()
            .flat_map(|s| s.spec.provides.iter().map(String::as_str))
            .collect();

        let mut exporters: BTreeMap<&str, BTreeSet<&AtomId>> = BTreeMap::new();
        for subject in input.subjects {
            for export in subject.artifact.exports() {
                if provided.contains(export.name.as_str()) {
                    exporters.entry(export.name.as_str()).or_default().insert(subject.id);
                }
            }
        }

        exporters
            .into_iter()
            .filter(|(_, atoms)| atoms.len() > 1)
            .map(|(symbol, atoms)| {
                atoms.into_iter().fold(
                    Violation::must("global-uniqueness", format!("`{symbol}` exported by several atoms")),
                    |v, id| v.on(id),
                )
            })
            .collect()
    }
}

/// Every atom produced an artifact covering its declared outputs (`should`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptanceCoverageCheck;

impl Checker for AcceptanceCoverageCheck {
    fn name(&self) -> &'static str {
        "acceptance-coverage"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::System
    }

    fn severity(&self) -> Severity {
        Severity::Should
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let mut violations: Vec<Violation> = input
            .missing
            .iter()
            .map(|id| Violation::should("acceptance-coverage", "no accepted artifact").on(id))
            .collect();

        for subject in input.subjects {
            let uncovered: Vec<&str> = subject
                .spec
                .outputs
                .iter()
                .filter(|o| subject.artifact.export(&o.name).is_none())
                .map(|o| o.name.as_str())
                .collect();
            if !uncovered.is_empty() {
                violations.push(
                    Violation::should(
                        "acceptance-coverage",
                        format!("declared outputs not delivered: {}", uncovered.join(", ")),
                    )
                    .on(subject.id),
                );
            }
        }
        violations
    }
}

/// Every non-external import resolves to a generated export (`must`)
///
/// Downgraded to `should` for subjects with a dependency that has no
/// accepted artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnresolvedImportCheck;

impl Checker for UnresolvedImportCheck {
    fn name(&self) -> &'static str {
        "unresolved-import"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::System
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let exports = input.export_index();
        let missing: BTreeSet<&AtomId> = input.missing.iter().collect();
        let mut violations = Vec::new();
        for subject in input.subjects {
            // An absent dependency already counts against coverage
            let absent: Vec<&str> = subject
                .dependencies
                .iter()
                .filter(|d| missing.contains(d))
                .map(AtomId::as_str)
                .collect();
            for import in subject.artifact.imports() {
                if input.config.is_external(&import.name) {
                    continue;
                }
                let resolved = exports.contains_key(import.name.as_str())
                    || exports.contains_key(local_name(&import.name));
                if resolved {
                    continue;
                }
                let violation = if absent.is_empty() {
                    Violation::must("unresolved-import", format!("`{}` does not resolve", import.name))
                } else {
                    Violation::should(
                        "unresolved-import",
                        format!(
                            "`{}` does not resolve while {} has no accepted artifact",
                            import.name,
                            absent.join(", ")
                        ),
                    )
                };
                violations.push(violation.on(subject.id));
            }
        }
        violations
    }
}
