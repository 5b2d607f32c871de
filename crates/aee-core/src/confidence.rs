//! Confidence scoring
//!
//! `confidence = w_v * pass_ratio + w_r * retry_penalty
//!             + w_c * (1 - complexity_norm) + w_i * integration`
//!
//! The scorer is a pure function of its inputs.

use crate::config::ConfidenceWeights;
use serde::{Deserialize, Serialize};

/// Signals feeding one score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInputs {
    /// Share of atomic checks that passed on the accepted artifact
    pub validation_pass_ratio: f64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Atomicity heuristic, 0 is simplest
    pub complexity_norm: f64,
    /// Share of covering gates the atom passed without being implicated
    pub integration_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConfidenceScorer {
    weights: ConfidenceWeights,
}

impl ConfidenceScorer {
    #[must_use]
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub fn weights(&self) -> ConfidenceWeights {
        self.weights
    }

    /// 1.0 on first-attempt success, falling by `1/max` per extra attempt
    #[must_use]
    pub fn retry_penalty(attempt_count: u32, max_attempts: u32) -> f64 {
        let extra = f64::from(attempt_count.max(1) - 1);
        let max = f64::from(max_attempts.max(1));
        (1.0 - extra / max).clamp(0.0, 1.0)
    }

    /// Score in [0,1]; NaN inputs count as 0
    #[must_use]
    pub fn score(&self, inputs: &ConfidenceInputs) -> f64 {
        let w = &self.weights;
        let total = w.validation * unit(inputs.validation_pass_ratio)
            + w.retry * Self::retry_penalty(inputs.attempt_count, inputs.max_attempts)
            + w.complexity * (1.0 - unit(inputs.complexity_norm))
            + w.integration * unit(inputs.integration_score);
        unit(total)
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
