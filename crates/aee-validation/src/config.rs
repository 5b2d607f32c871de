//! Tunables shared by the built-in checkers

use serde::{Deserialize, Serialize};

/// Thresholds for the built-in checkers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Non-blank lines above which an artifact is flagged as oversized
    pub size_ceiling: u32,
    /// Top-level definitions above which an atom is flagged as doing too much
    pub max_definitions: usize,
    /// Import prefixes that resolve outside the generated set
    pub external_prefixes: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            size_ceiling: 10,
            max_definitions: 2,
            external_prefixes: ["std", "core", "alloc", "tokio", "serde", "os", "sys", "fmt"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl ValidationConfig {
    #[inline]
    #[must_use]
    pub fn with_size_ceiling(mut self, lines: u32) -> Self {
        self.size_ceiling = lines;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_definitions(mut self, max: usize) -> Self {
        self.max_definitions = max;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_external_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.external_prefixes.push(prefix.into());
        self
    }

    /// Whether an imported name lives outside the generated set
    #[must_use]
    pub fn is_external(&self, name: &str) -> bool {
        self.external_prefixes.iter().any(|prefix| {
            name == prefix
                || name
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with("::") || rest.starts_with('.') || rest.starts_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_prefix_matches_whole_segments() {
        let config = ValidationConfig::default();
        assert!(config.is_external("std::collections::HashMap"));
        assert!(config.is_external("os.path"));
        assert!(!config.is_external("stdlib_helper"));
        assert!(!config.is_external("auth::hash"));
    }
}
