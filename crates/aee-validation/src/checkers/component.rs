//! Level 3: modules of one component integrate

use crate::checker::{local_name, CheckInput, Checker};
use crate::outcome::{Severity, ValidationLevel, Violation};
use aee_atom::AtomId;
use std::collections::BTreeSet;

/// Imports across module lines resolve with the right shape (`should`)
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossModuleResolutionCheck;

impl Checker for CrossModuleResolutionCheck {
    fn name(&self) -> &'static str {
        "cross-module-resolution"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Component
    }

    fn severity(&self) -> Severity {
        Severity::Should
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let exports = input.export_index();
        let mut violations = Vec::new();
        for subject in input.subjects {
            let module = subject.qualified_module();
            for import in subject.artifact.imports() {
                let name = local_name(&import.name);
                let Some(providers) = exports.get(import.name.as_str()).or_else(|| exports.get(name)) else {
                    continue;
                };
                let foreign: Vec<_> = providers
                    .iter()
                    .filter(|p| p.spec.component == subject.spec.component && p.qualified_module() != module)
                    .collect();
                for provider in foreign {
                    let Some(export) = provider.artifact.export(name) else {
                        continue;
                    };
                    if !import.shape.is_empty() && !export.shape.is_empty() && import.shape != export.shape {
                        violations.push(
                            Violation::should(
                                "cross-module-shape",
                                format!(
                                    "`{}` from {} imported as `{}` but exported as `{}`",
                                    import.name,
                                    provider.qualified_module(),
                                    import.shape,
                                    export.shape
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

/// Every declared dependency of the component has an artifact (`must`)
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyClosureCheck;

impl Checker for DependencyClosureCheck {
    fn name(&self) -> &'static str {
        "dependency-closure"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Component
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let present: BTreeSet<&AtomId> = input.available.iter().map(|s| s.id).collect();
        let mut violations = Vec::new();
        for subject in input.subjects {
            for dependency in subject.dependencies {
                if !present.contains(dependency) {
                    violations.push(
                        Violation::must(
                            "dependency-closure",
                            format!("depends on {dependency}, which has no artifact"),
                        )
                        .on(subject.id),
                    );
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

    #[test]
    fn cross_module_shape_mismatch_is_should() {
        let a = AtomicUnit::new("a", "t", AtomSpec::new("a").in_module("app", "auth"));
        let b = AtomicUnit::new("b", "t", AtomSpec::new("b").in_module("app", "api"));
        let art_a = Artifact::new(Language::Rust, "fn x() {}").with_export(Signature::new("x", "fn() -> u8"));
        let art_b = Artifact::new(Language::Rust, "fn y() {}").with_import(Signature::new("auth::x", "fn() -> i8"));
        let subjects = [Subject::new(&a, &art_a), Subject::new(&b, &art_b)];
        let config = ValidationConfig::default();
        let scope = Scope::Component("app".into());
        let violations = CrossModuleResolutionCheck.check(&CheckInput {
            scope: &scope,
            subjects: &subjects,
            available: &subjects,
            missing: &[],
            config: &config,
        });
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Should);
    }

    #[test]
    fn missing_dependency_artifact_breaks_closure() {
        let a = AtomicUnit::new("a", "t", AtomSpec::new("a")).depends_on("gone");
        let art_a = Artifact::new(Language::Rust, "fn a() {}");
        let subjects = [Subject::new(&a, &art_a)];
        let config = ValidationConfig::default();
        let scope = Scope::Component("root".into());
        let violations = DependencyClosureCheck.check(&CheckInput {
            scope: &scope,
            subjects: &subjects,
            available: &subjects,
            missing: &[],
            config: &config,
        });
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].atoms, vec![a.id.clone()]);
    }
}
