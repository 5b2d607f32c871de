//! Gate S: the pass/fail rule applied to every validation level

use crate::error::ValidationError;
use crate::outcome::CheckOutcome;
use serde::{Deserialize, Serialize};

/// A level fails its gate if any `must` check fails, or if more than
/// `max_should_fraction` of the `should` evaluations fail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub max_should_fraction: f64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            max_should_fraction: 0.05,
        }
    }
}

impl GatePolicy {
    #[must_use]
    pub fn new(max_should_fraction: f64) -> Self {
        Self {
            max_should_fraction: max_should_fraction.clamp(0.0, 1.0),
        }
    }

    /// Checked constructor
    ///
    /// # Errors
    /// `InvalidFraction` unless the fraction lies in [0, 1].
    pub fn try_new(max_should_fraction: f64) -> Result<Self, ValidationError> {
        if (0.0..=1.0).contains(&max_should_fraction) {
            Ok(Self { max_should_fraction })
        } else {
            Err(ValidationError::InvalidFraction(max_should_fraction.to_string()))
        }
    }

    /// Tally the outcomes of one gate evaluation
    #[must_use]
    pub fn evaluate(&self, outcomes: &[CheckOutcome]) -> GateVerdict {
        let must_failures = outcomes.iter().filter(|c| c.has_must_failure()).count();
        let should_total: usize = outcomes
            .iter()
            .filter(|c| c.should_scope)
            .map(|c| c.evaluated)
            .sum();
        let should_failures: usize = outcomes.iter().map(CheckOutcome::should_failures).sum();

        #[allow(clippy::cast_precision_loss)]
        let should_fraction = if should_total == 0 {
            if should_failures == 0 { 0.0 } else { 1.0 }
        } else {
            (should_failures as f64 / should_total as f64).min(1.0)
        };

        let passed = must_failures == 0 && should_fraction <= self.max_should_fraction;
        GateVerdict {
            passed,
            must_failures,
            should_failures,
            should_total,
            should_fraction,
        }
    }
}

/// Tally produced by [`GatePolicy::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    /// Checkers that reported at least one must violation
    pub must_failures: usize,
    pub should_failures: usize,
    pub should_total: usize,
    pub should_fraction: f64,
}

impl GateVerdict {
    /// Whether the failure is driven by a must rule
    #[inline]
    #[must_use]
    pub fn is_must_failure(&self) -> bool {
        self.must_failures > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{ValidationLevel, Violation};
    use aee_atom::AtomId;

    fn should_outcome(evaluated: usize, failing: usize) -> CheckOutcome {
        CheckOutcome {
            checker: "size".into(),
            level: ValidationLevel::Component,
            evaluated,
            should_scope: true,
            violations: (0..failing)
                .map(|i| Violation::should("size", "big").on(&AtomId::new(format!("a{i}"))))
                .collect(),
        }
    }

    #[test]
    fn should_fraction_at_threshold_passes() {
        let policy = GatePolicy::default();
        let verdict = policy.evaluate(&[should_outcome(100, 5)]);
        assert!(verdict.passed);
        assert!((verdict.should_fraction - 0.05).abs() < 1e-12);
    }

    #[test]
    fn should_fraction_over_threshold_fails() {
        let verdict = GatePolicy::default().evaluate(&[should_outcome(100, 6)]);
        assert!(!verdict.passed);
        assert!(!verdict.is_must_failure());
    }

    #[test]
    fn any_must_failure_fails() {
        let mut outcome = should_outcome(100, 0);
        outcome.violations.push(Violation::must("dup", "x"));
        let verdict = GatePolicy::default().evaluate(&[outcome]);
        assert!(!verdict.passed);
        assert_eq!(verdict.must_failures, 1);
    }

    #[test]
    fn fraction_out_of_range_is_rejected() {
        assert!(GatePolicy::try_new(1.5).is_err());
        assert!(GatePolicy::try_new(f64::NAN).is_err());
        assert!(GatePolicy::try_new(0.0).is_ok());
    }

    #[test]
    fn empty_gate_passes() {
        assert!(GatePolicy::default().evaluate(&[]).passed);
    }
}
