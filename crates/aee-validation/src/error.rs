use crate::outcome::ValidationLevel;

/// Validation setup errors
///
/// Rule violations are data (`Violation`), never errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("checker {name} already registered at level {level}")]
    DuplicateChecker { name: String, level: ValidationLevel },

    #[error("invalid gate fraction {0}: must be within [0, 1]")]
    InvalidFraction(String),
}
