//! Engine configuration
//!
//! Every tunable has a default; a TOML file only needs the keys it
//! overrides:
//!
//! ```toml
//! concurrency = 32
//!
//! [retry]
//! max_attempts = 4
//!
//! [review]
//! cutoff = 0.65
//! ```

use aee_validation::{GatePolicy, ValidationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-atom retry budget and strategy perturbation bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    /// Temperature of the first attempt
    pub base_temperature: f64,
    /// Upper bound approached by later attempts
    pub max_temperature: f64,
    /// Strictness of the first attempt
    pub base_strictness: f64,
    /// Lower bound approached by later attempts
    pub min_strictness: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 60_000,
            base_temperature: 0.2,
            max_temperature: 1.0,
            base_strictness: 1.0,
            min_strictness: 0.5,
        }
    }
}

impl RetryConfig {
    #[inline]
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Exponential backoff between attempts that called the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
    /// Relative jitter, 0.2 means +/-20%
    pub jitter: f64,
    /// Fixed seed for the jitter source
    pub seed: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 200,
            factor: 2.0,
            max_ms: 30_000,
            jitter: 0.2,
            seed: None,
        }
    }
}

/// Gate S thresholds and gate scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_should_fraction: f64,
    /// Component gate fires at least every this many new atoms per component
    pub component_check_interval: usize,
    /// Retries granted to localized culprits before quarantine
    pub retry_rounds: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_should_fraction: 0.05,
            component_check_interval: 75,
            retry_rounds: 1,
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn policy(&self) -> GatePolicy {
        GatePolicy::new(self.max_should_fraction)
    }
}

/// Confidence weights; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub validation: f64,
    pub retry: f64,
    pub complexity: f64,
    pub integration: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            validation: 0.40,
            retry: 0.30,
            complexity: 0.20,
            integration: 0.10,
        }
    }
}

impl ConfidenceWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.validation + self.retry + self.complexity + self.integration
    }
}

/// Which validated atoms go to human review
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    /// Validated atoms scoring below this are review candidates
    pub cutoff: f64,
    /// Lower edge of the selection band, as a share of validated atoms
    pub min_fraction: f64,
    /// Upper edge of the selection band
    pub max_fraction: f64,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            cutoff: 0.70,
            min_fraction: 0.15,
            max_fraction: 0.20,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size
    pub concurrency: usize,
    /// Derive edges from `requires`/`provides` in addition to declared ones
    pub derive_symbol_edges: bool,
    pub retry: RetryConfig,
    pub backoff: BackoffConfig,
    pub gate: GateConfig,
    pub confidence: ConfidenceWeights,
    pub review: ReviewPolicy,
    pub validation: ValidationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            derive_symbol_edges: true,
            retry: RetryConfig::default(),
            backoff: BackoffConfig::default(),
            gate: GateConfig::default(),
            confidence: ConfidenceWeights::default(),
            review: ReviewPolicy::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl EngineConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.retry.attempt_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_review_policy(mut self, review: ReviewPolicy) -> Self {
        self.review = review;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_confidence_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.confidence = weights;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_symbol_edges(mut self, enabled: bool) -> Self {
        self.derive_symbol_edges = enabled;
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `Parse` on malformed TOML, `Invalid` if [`Self::validate`] rejects it.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise as [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `Render` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot honour
    ///
    /// # Errors
    /// `Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(name: &str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {value}")))
            }
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if retry.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid("retry.attempt_timeout_ms must be positive".into()));
        }
        unit("retry.base_temperature", retry.base_temperature)?;
        unit("retry.max_temperature", retry.max_temperature)?;
        unit("retry.base_strictness", retry.base_strictness)?;
        unit("retry.min_strictness", retry.min_strictness)?;
        if retry.max_temperature <= retry.base_temperature {
            return Err(ConfigError::Invalid(
                "retry.max_temperature must exceed retry.base_temperature".into(),
            ));
        }
        if retry.min_strictness > retry.base_strictness {
            return Err(ConfigError::Invalid(
                "retry.min_strictness must not exceed retry.base_strictness".into(),
            ));
        }

        let backoff = &self.backoff;
        if !(backoff.factor >= 1.0) {
            return Err(ConfigError::Invalid("backoff.factor must be at least 1".into()));
        }
        if backoff.base_ms > backoff.max_ms {
            return Err(ConfigError::Invalid("backoff.base_ms must not exceed backoff.max_ms".into()));
        }
        unit("backoff.jitter", backoff.jitter)?;

        unit("gate.max_should_fraction", self.gate.max_should_fraction)?;
        if self.gate.component_check_interval == 0 {
            return Err(ConfigError::Invalid("gate.component_check_interval must be at least 1".into()));
        }

        let weights = &self.confidence;
        for (name, w) in [
            ("confidence.validation", weights.validation),
            ("confidence.retry", weights.retry),
            ("confidence.complexity", weights.complexity),
            ("confidence.integration", weights.integration),
        ] {
            unit(name, w)?;
        }
        if (weights.sum() - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "confidence weights must sum to 1, got {}",
                weights.sum()
            )));
        }

        unit("review.cutoff", self.review.cutoff)?;
        unit("review.min_fraction", self.review.min_fraction)?;
        unit("review.max_fraction", self.review.max_fraction)?;
        if self.review.min_fraction > self.review.max_fraction {
            return Err(ConfigError::Invalid(
                "review.min_fraction must not exceed review.max_fraction".into(),
            ));
        }

        if self.validation.size_ceiling == 0 {
            return Err(ConfigError::Invalid("validation.size_ceiling must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.concurrency, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.gate.component_check_interval, 75);
        assert!((config.confidence.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            concurrency = 8

            [retry]
            max_attempts = 4

            [review]
            cutoff = 0.6
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.attempt_timeout_ms, 60_000);
        assert!((config.review.cutoff - 0.6).abs() < 1e-12);
        assert!((config.review.max_fraction - 0.20).abs() < 1e-12);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = EngineConfig::from_toml_str("[confidence]\nvalidation = 0.9").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("sum to 1")));
    }

    #[test]
    fn inverted_band_is_rejected() {
        let config = EngineConfig::default().with_review_policy(ReviewPolicy {
            cutoff: 0.7,
            min_fraction: 0.3,
            max_fraction: 0.2,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(EngineConfig::default().with_concurrency(0).validate().is_err());
    }

    #[test]
    fn toml_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let config = EngineConfig::default().with_concurrency(7).with_max_attempts(5);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
