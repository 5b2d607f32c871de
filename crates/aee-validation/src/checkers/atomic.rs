//! Level 1: structural checks on a single artifact

use crate::checker::{CheckInput, Checker};
use crate::outcome::{Severity, ValidationLevel, Violation};
use crate::syntax;

/// Source must parse (`must`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxCheck;

impl Checker for SyntaxCheck {
    fn name(&self) -> &'static str {
        "syntax"
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
            .filter_map(|subject| {
                let report = syntax::inspect(subject.artifact);
                report.syntax_error.map(|(line, what)| {
                    Violation::must(
                        "syntax",
                        format!("{} source invalid at line {line}: {what}", subject.artifact.language()),
                    )
                    .on(subject.id)
                })
            })
            .collect()
    }
}

/// Artifact stays under the line ceiling (`should`)
///
/// Size is a quality signal, so an oversized atom is flagged, not rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeCeilingCheck;

impl Checker for SizeCeilingCheck {
    fn name(&self) -> &'static str {
        "size-ceiling"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Atomic
    }

    fn severity(&self) -> Severity {
        Severity::Should
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let ceiling = input.config.size_ceiling as usize;
        input
            .subjects
            .iter()
            .filter(|subject| subject.artifact.line_count() > ceiling)
            .map(|subject| {
                Violation::should(
                    "size-ceiling",
                    format!("{} lines exceeds ceiling of {ceiling}", subject.artifact.line_count()),
                )
                .on(subject.id)
            })
            .collect()
    }
}

/// At most `max_definitions` top-level definitions (`should`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleResponsibilityCheck;

impl Checker for SingleResponsibilityCheck {
    fn name(&self) -> &'static str {
        "single-responsibility"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Atomic
    }

    fn severity(&self) -> Severity {
        Severity::Should
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let max = input.config.max_definitions;
        input
            .subjects
            .iter()
            .filter_map(|subject| {
                let definitions = syntax::inspect(subject.artifact).definitions;
                (definitions > max).then(|| {
                    Violation::should(
                        "single-responsibility",
                        format!("{definitions} top-level definitions, at most {max} expected"),
                    )
                    .on(subject.id)
                })
            })
            .collect()
    }
}

/// Exports and imports agree with the declared interface (`must`)
///
/// Every declared output must be exported with the declared shape; an
/// import that names a declared input must use the declared shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureCheck;

impl Checker for SignatureCheck {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn level(&self) -> ValidationLevel {
        ValidationLevel::Atomic
    }

    fn severity(&self) -> Severity {
        Severity::Must
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        for subject in input.subjects {
            for declared in &subject.spec.outputs {
                match subject.artifact.export(&declared.name) {
                    None => violations.push(
                        Violation::must("signature", format!("declared output `{}` is not exported", declared.name))
                            .on(subject.id),
                    ),
                    Some(actual) if !declared.shape.is_empty() && actual.shape != declared.shape => {
                        violations.push(
                            Violation::must(
                                "signature",
                                format!(
                                    "`{}` exported as `{}`, declared `{}`",
                                    declared.name, actual.shape, declared.shape
                                ),
                            )
                            .on(subject.id),
                        );
                    }
                    Some(_) => {}
                }
            }
            for import in subject.artifact.imports() {
                let declared = subject.spec.inputs.iter().find(|i| i.name == import.name);
                if let Some(declared) = declared {
                    if !declared.shape.is_empty() && !import.shape.is_empty() && declared.shape != import.shape {
                        violations.push(
                            Violation::must(
                                "signature",
                                format!(
                                    "input `{}` used as `{}`, declared `{}`",
                                    import.name, import.shape, declared.shape
                                ),
                            )
                            .on(subject.id),
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

    fn run(checker: &dyn Checker, atom: &AtomicUnit, artifact: &Artifact) -> Vec<Violation> {
        let config = ValidationConfig::default();
        let scope = Scope::Atom(atom.id.clone());
        let subjects = [Subject::new(atom, artifact)];
        checker.check(&CheckInput {
            scope: &scope,
            subjects: &subjects,
            available: &subjects,
            missing: &[],
            config: &config,
        })
    }

    #[test]
    fn syntax_failure_names_atom() {
        let atom = AtomicUnit::new("a", "t", AtomSpec::new("a"));
        let artifact = Artifact::new(Language::Rust, "fn a( {");
        let violations = run(&SyntaxCheck, &atom, &artifact);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].atoms, vec![atom.id.clone()]);
        assert_eq!(violations[0].severity, Severity::Must);
    }

    #[test]
    fn oversized_artifact_is_flagged_as_should() {
        let atom = AtomicUnit::new("a", "t", AtomSpec::new("a"));
        let body: String = (0..12).map(|i| format!("    let x{i} = {i};\n")).collect();
        let artifact = Artifact::new(Language::Rust, format!("fn a() {{\n{body}}}\n"));
        let violations = run(&SizeCeilingCheck, &atom, &artifact);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Should);
    }

    #[test]
    fn too_many_definitions_are_flagged() {
        let atom = AtomicUnit::new("a", "t", AtomSpec::new("a"));
        let artifact = Artifact::new(Language::Rust, "fn a() {}\nfn b() {}\nfn c() {}\n");
        assert_eq!(run(&SingleResponsibilityCheck, &atom, &artifact).len(), 1);
    }

    #[test]
    fn signature_mismatch_is_must() {
        let atom = AtomicUnit::new(
            "a",
            "t",
            AtomSpec::new("a")
                .with_output(Signature::new("hash", "fn(&str) -> String"))
                .with_output(Signature::new("verify", "fn(&str) -> bool")),
        );
        let artifact = Artifact::new(Language::Rust, "fn hash() {}")
            .with_export(Signature::new("hash", "fn() -> ()"));
        let violations = run(&SignatureCheck, &atom, &artifact);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.severity == Severity::Must));
    }

    #[test]
    fn matching_signature_passes() {
        let atom = AtomicUnit::new(
            "a",
            "t",
            AtomSpec::new("a")
                .with_input(Signature::new("Salt", "struct"))
                .with_output(Signature::new("hash", "fn(&str) -> String")),
        );
        let artifact = Artifact::new(Language::Rust, "fn hash(s: &str) -> String { s.into() }")
            .with_export(Signature::new("hash", "fn(&str) -> String"))
            .with_import(Signature::new("Salt", "struct"));
        assert!(run(&SignatureCheck, &atom, &artifact).is_empty());
    }
}
