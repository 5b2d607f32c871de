//! Error types for the execution engine
//!
//! Classification follows how the engine reacts:
//! - retryable failures are absorbed by the retry orchestrator
//! - fatal failures abort the run with a [`Diagnostic`]
//! - defects (`DependencyNotReady`, store misuse) abort without retry
//!
//! Routing an atom to human review is not an error; see
//! [`AtomOutcome::Review`](crate::executor::AtomOutcome::Review).

use crate::config::ConfigError;
use crate::generator::GenerationError;
use crate::repository::RepositoryError;
use aee_atom::{AtomId, AtomStatus, StoreError};
use aee_graph::GraphError;
use aee_validation::{Scope, ValidationLevel};
use serde::{Deserialize, Serialize};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The dependency graph has a cycle; nothing was scheduled
    #[error("dependency cycle among {members:?}")]
    CycleDetected { members: Vec<AtomId> },

    /// Malformed atom set (unknown or self dependency, duplicate id)
    #[error("graph construction failed: {0}")]
    Graph(GraphError),

    /// A worker was handed an atom whose dependency is not validated
    #[error("dependency {dependency} of {atom} is {status}, not validated")]
    DependencyNotReady {
        atom: AtomId,
        dependency: AtomId,
        status: AtomStatus,
    },

    /// The generator failed
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// A gate failed and could not be localized
    #[error("{level} validation of {scope} failed: {message}")]
    Validation {
        level: ValidationLevel,
        scope: Scope,
        message: String,
    },

    /// A system-level must check failed
    #[error("{level} gate failed fatally on {scope}: {violations:?}")]
    GateFailedFatal {
        level: ValidationLevel,
        scope: Scope,
        violations: Vec<String>,
    },

    /// The run was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Atom store misuse
    #[error("store error: {0}")]
    Store(StoreError),

    /// Persistence failed
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected { members } => Self::CycleDetected { members },
            other => Self::Graph(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DependencyNotReady {
                atom,
                dependency,
                status,
            } => Self::DependencyNotReady {
                atom,
                dependency,
                status,
            },
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    /// Whether the error ends the run
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected { .. }
                | Self::Graph(_)
                | Self::DependencyNotReady { .. }
                | Self::GateFailedFatal { .. }
                | Self::Validation { .. }
                | Self::Store(_)
                | Self::Config(_)
        )
    }

    /// Whether another attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Generation(err) if err.is_transient())
    }

    /// Whether a human must look at the outcome
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(self, Self::GateFailedFatal { .. } | Self::Validation { .. })
    }

    /// Structured description for reports
    #[must_use]
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            Self::CycleDetected { members } => Diagnostic::new(ErrorType::Graph, Location::Graph)
                .with_context(Context::empty().add("members", join(members)))
                .with_suggestions(vec![SuggestedFix::new(
                    "remove one dependency edge between the listed atoms",
                    0.8,
                )]),
            Self::Graph(err) => Diagnostic::new(ErrorType::Graph, Location::Graph)
                .with_context(Context::empty().add("error", err.to_string())),
            Self::DependencyNotReady {
                atom,
                dependency,
                status,
            } => Diagnostic::new(ErrorType::Store, Location::Atom(atom.to_string()))
                .with_context(
                    Context::empty()
                        .add("dependency", dependency.to_string())
                        .add("status", status.to_string()),
                ),
            Self::Generation(err) => Diagnostic::new(ErrorType::Generation, Location::Unknown)
                .with_context(Context::empty().add("error", err.to_string()))
                .with_suggestions(vec![SuggestedFix::new("retry with a fresh attempt", 0.6)]),
            Self::Validation {
                level,
                scope,
                message,
            } => Diagnostic::new(ErrorType::Validation, Location::Scope(scope.to_string()))
                .with_context(
                    Context::empty()
                        .add("level", level.to_string())
                        .add("message", message.clone()),
                )
                .with_suggestions(vec![SuggestedFix::new(
                    "inspect the scope manually; no subset of atoms explains the failure",
                    0.5,
                )]),
            Self::GateFailedFatal {
                level,
                scope,
                violations,
            } => Diagnostic::new(ErrorType::Gate, Location::Scope(scope.to_string()))
                .with_context(
                    violations
                        .iter()
                        .fold(Context::empty().add("level", level.to_string()), |ctx, v| {
                            ctx.add("violation", v.clone())
                        }),
                )
                .with_suggestions(vec![SuggestedFix::new(
                    "regenerate the atoms named by the violations",
                    0.7,
                )]),
            Self::Cancelled => Diagnostic::new(ErrorType::Cancellation, Location::Run),
            Self::Store(err) => Diagnostic::new(ErrorType::Store, Location::Unknown)
                .with_context(Context::empty().add("error", err.to_string())),
            Self::Repository(err) => Diagnostic::new(ErrorType::Persistence, Location::Unknown)
                .with_context(Context::empty().add("error", err.to_string())),
            Self::Config(err) => Diagnostic::new(ErrorType::Config, Location::Run)
                .with_context(Context::empty().add("error", err.to_string())),
        }
    }
}

fn join(ids: &[AtomId]) -> String {
    ids.iter().map(AtomId::as_str).collect::<Vec<_>>().join(", ")
}

/// Why a run aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortKind {
    CycleDetected,
    GateFailedFatal,
    /// A gate failure could not be narrowed to a subset of atoms
    Unlocalized,
    Cancelled,
    /// Invariant violation inside the engine
    Defect,
}

/// Fatal cause attached to an aborted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortInfo {
    pub kind: AbortKind,
    pub message: String,
    /// Atoms named by the cause (cycle members, violating atoms)
    pub members: Vec<AtomId>,
    pub diagnostic: Diagnostic,
}

impl AbortInfo {
    #[must_use]
    pub fn from_error(err: &EngineError) -> Self {
        let (kind, members) = match err {
            EngineError::CycleDetected { members } => (AbortKind::CycleDetected, members.clone()),
            EngineError::GateFailedFatal { .. } => (AbortKind::GateFailedFatal, Vec::new()),
            EngineError::Validation { .. } => (AbortKind::Unlocalized, Vec::new()),
            EngineError::Cancelled => (AbortKind::Cancelled, Vec::new()),
            EngineError::DependencyNotReady { atom, dependency, .. } => {
                (AbortKind::Defect, vec![atom.clone(), dependency.clone()])
            }
            _ => (AbortKind::Defect, Vec::new()),
        };
        Self {
            kind,
            message: err.to_string(),
            members,
            diagnostic: err.diagnostic(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_members(mut self, members: Vec<AtomId>) -> Self {
        self.members = members;
        self
    }
}

/// Diagnostic information for failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub error_type: ErrorType,
    pub location: Location,
    pub context: Context,
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl Diagnostic {
    #[inline]
    #[must_use]
    pub fn new(error_type: ErrorType, location: Location) -> Self {
        Self {
            error_type,
            location,
            context: Context::empty(),
            suggested_fixes: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_suggestions(mut self, fixes: Vec<SuggestedFix>) -> Self {
        self.suggested_fixes = fixes;
        self
    }
}

/// Error type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    Graph,
    Generation,
    Validation,
    Gate,
    Store,
    Persistence,
    Config,
    Cancellation,
}

/// Where a failure happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Graph,
    Atom(String),
    Wave(usize),
    Scope(String),
    Run,
    Unknown,
}

/// Key/value context for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub entries: Vec<(String, String)>,
}

impl Context {
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// First value stored under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Suggested fix for recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub description: String,
    /// Confidence in [0,1]
    pub confidence: f64,
}

impl SuggestedFix {
    #[inline]
    #[must_use]
    pub fn new(description: impl Into<String>, confidence: f64) -> Self {
        Self {
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_cycle_maps_to_cycle_detected() {
        let err: EngineError = GraphError::CycleDetected {
            members: vec![AtomId::new("a"), AtomId::new("b")],
        }
        .into();
        assert!(matches!(err, EngineError::CycleDetected { ref members } if members.len() == 2));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_dependency_error_maps_to_defect() {
        let err: EngineError = StoreError::DependencyNotReady {
            atom: AtomId::new("b"),
            dependency: AtomId::new("a"),
            status: AtomStatus::Pending,
        }
        .into();
        assert!(matches!(err, EngineError::DependencyNotReady { .. }));
        let abort = AbortInfo::from_error(&err);
        assert_eq!(abort.kind, AbortKind::Defect);
        assert_eq!(abort.members, vec![AtomId::new("b"), AtomId::new("a")]);
    }

    #[test]
    fn transient_generation_is_retryable() {
        let err = EngineError::from(GenerationError::Unavailable("rate limited".into()));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert!(!EngineError::from(GenerationError::Rejected("policy".into())).is_retryable());
    }

    #[test]
    fn fatal_gate_requires_human() {
        let err = EngineError::GateFailedFatal {
            level: ValidationLevel::System,
            scope: Scope::System,
            violations: vec!["unresolved-import".into()],
        };
        assert!(err.requires_human());
        let diag = err.diagnostic();
        assert_eq!(diag.error_type, ErrorType::Gate);
        assert_eq!(diag.context.get("violation"), Some("unresolved-import"));
    }

    #[test]
    fn suggested_fix_clamps_confidence() {
        assert!((SuggestedFix::new("x", 1.7).confidence - 1.0).abs() < f64::EPSILON);
        assert!(SuggestedFix::new("x", -0.2).confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn cycle_diagnostic_lists_members() {
        let err = EngineError::CycleDetected {
            members: vec![AtomId::new("a"), AtomId::new("b"), AtomId::new("c")],
        };
        let diag = err.diagnostic();
        assert_eq!(diag.context.get("members"), Some("a, b, c"));
        assert_eq!(diag.location, Location::Graph);
    }
}
