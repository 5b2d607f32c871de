//! Level 2: atoms of one module compose

use crate::checker::{local_name, CheckInput, Checker};
use crate::outcome::{Severity, ValidationLevel, Violation};
use aee_atom::AtomId;
use std::collections::{BTreeMap, BTreeSet};

/// No symbol is exported by two atoms of the same module (`must`)
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateSymbolCheck;

impl Checker for DuplicateSymbolCheck {
    fn name(&self) -> &'static str {
        "duplicate-symbol"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Module
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let mut owners: BTreeMap<&str, BTreeSet<&AtomId>> = BTreeMap::new();
        for subject in input.subjects {
            for export in subject.artifact.exports() {
                owners.entry(export.name.as_str()).or_default().insert(subject.id);
            }
        }
        owners
            .into_iter()
            .filter(|(_, atoms)| atoms.len() > 1)
            .map(|(symbol, atoms)| {
                atoms.into_iter().fold(
                    Violation::must("duplicate-symbol", format!("`{symbol}` defined more than once in {}", input.scope)),
                    |v, id| v.on(id),
                )
            })
            .collect()
    }
}

/// Cross-atom interfaces inside a module line up
///
/// A shape mismatch between an import and the sibling that exports it is
/// a `must` violation naming both atoms. An import nothing provides is a
/// `should` violation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceConsistencyCheck;

impl Checker for InterfaceConsistencyCheck {
    fn name(&self) -> &'static str {
        "interface-consistency"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Module
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn counts_towards_should(&self) -> bool {
        true
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let exports = input.export_index();
        let mut violations = Vec::new();

        for subject in input.subjects {
            let module = subject.qualified_module();
            for import in subject.artifact.imports() {
                if input.config.is_external(&import.name) {
                    continue;
                }
                let name = local_name(&import.name);
                let providers = exports.get(import.name.as_str()).or_else(|| exports.get(name));
                let Some(providers) = providers else {
                    violations.push(
                        Violation::should(
                            "unresolved-import",
                            format!("`{}` is not provided by any generated atom", import.name),
                        )
                        .on(subject.id),
                    );
                    continue;
                };

                for provider in providers
                    .iter()
                    .filter(|p| p.id != subject.id && p.qualified_module() == module)
                {
                    let Some(export) = provider.artifact.export(name) else {
                        continue;
                    };
                    if !import.shape.is_empty() && !export.shape.is_empty() && import.shape != export.shape {
                        violations.push(
                            Violation::must(
                                "interface-mismatch",
                                format!(
                                    "`{}` imported as `{}` but exported as `{}`",
                                    import.name, import.shape, export.shape
                                ),
                            )
                            .on(subject.id)
                            .on(provider.id),
                        );
                    }
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Subject;
    use crate::config::ValidationConfig;
    use crate::outcome::Scope;
    use aee_atom::{Artifact, AtomSpec, AtomicUnit, Language, Signature};

    fn atom(id: &str) -> AtomicUnit {
        AtomicUnit::new(id, "t", AtomSpec::new(id).in_module("app", "auth"))
    }

    fn check(checker: &dyn Checker, pairs: &[(&AtomicUnit, &Artifact)]) -> Vec<Violation> {
        let config = ValidationConfig::default();
        let scope = Scope::Module("app/auth".into());
        let subjects: Vec<Subject<'_>> = pairs.iter().map(|(a, art)| Subject::new(a, art)).collect();
        checker.check(&CheckInput {
            scope: &scope,
            subjects: &subjects,
            available: &subjects,
            missing: &[],
            config: &config,
        })
    }

    #[test]
    fn duplicate_export_names_both_atoms() {
        let (a, b) = (atom("a"), atom("b"));
        let art_a = Artifact::new(Language::Rust, "fn x() {}").with_export(Signature::new("x", "fn()"));
        let art_b = Artifact::new(Language::Rust, "fn x() {}").with_export(Signature::new("x", "fn()"));
        let violations = check(&DuplicateSymbolCheck, &[(&a, &art_a), (&b, &art_b)]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].atoms, vec![a.id.clone(), b.id.clone()]);
    }

    #[test]
    fn shape_mismatch_is_must_and_names_both() {
        let (a, b) = (atom("a"), atom("b"));
        let art_a = Artifact::new(Language::Rust, "fn x() {}").with_export(Signature::new("x", "fn() -> u8"));
        let art_b = Artifact::new(Language::Rust, "fn y() {}").with_import(Signature::new("auth::x", "fn() -> u16"));
        let violations = check(&InterfaceConsistencyCheck, &[(&a, &art_a), (&b, &art_b)]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Must);
        assert_eq!(violations[0].atoms.len(), 2);
    }

    #[test]
    fn unresolved_import_is_should() {
        let a = atom("a");
        let art = Artifact::new(Language::Rust, "fn y() {}")
            .with_import(Signature::new("ghost", ""))
            .with_import(Signature::new("std::fmt::Display", "trait"));
        let violations = check(&InterfaceConsistencyCheck, &[(&a, &art)]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Should);
    }
}
