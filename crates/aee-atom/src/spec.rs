//! Atom specifications
//!
//! An [`AtomSpec`] is what the upstream decomposition step says an atom
//! must produce: where it lives (module / component), its declared
//! inputs and outputs, the symbols it provides and requires, and its
//! estimated size.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source language of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Rust,
    Python,
    TypeScript,
    Go,
    /// Anything without a dedicated parser
    Other,
}

impl Language {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Other => "other",
        }
    }

    /// Detect from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.') {
            "rs" => Language::Rust,
            "py" => Language::Python,
            "ts" | "tsx" => Language::TypeScript,
            "go" => Language::Go,
            _ => Language::Other,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, typed interface point (`name: shape`)
///
/// `shape` is an opaque, normalized type signature string such as
/// `fn(&str) -> bool` or `struct { id: u64 }`. Two signatures are
/// compatible when both fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub shape: String,
}

impl Signature {
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, shape: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.shape)
    }
}

/// Declared shape of an atom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomSpec {
    /// What the atom must do
    pub description: String,
    /// Declared module (e.g. `auth::session`)
    pub module: String,
    /// Declared component (e.g. `auth`)
    pub component: String,
    pub language: Language,
    /// Ordered source-line estimates for the atom's parts; their sum is
    /// the declared size budget and should stay within ten lines.
    pub line_estimates: Vec<u32>,
    /// Symbols the atom consumes
    pub inputs: Vec<Signature>,
    /// Symbols the atom must export
    pub outputs: Vec<Signature>,
    /// Identifiers other atoms may depend on
    pub provides: Vec<String>,
    /// Identifiers this atom needs from elsewhere
    pub requires: Vec<String>,
}

impl AtomSpec {
    /// Target ceiling for the summed line estimates
    pub const TARGET_LINES: u32 = 10;

    /// Create a spec in the default module/component
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            module: "root".to_string(),
            component: "root".to_string(),
            language: Language::Rust,
            line_estimates: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            provides: Vec::new(),
            requires: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn in_module(mut self, component: impl Into<String>, module: impl Into<String>) -> Self {
        self.component = component.into();
        self.module = module.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_line_estimates(mut self, estimates: impl IntoIterator<Item = u32>) -> Self {
        self.line_estimates = estimates.into_iter().collect();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_input(mut self, signature: Signature) -> Self {
        self.inputs.push(signature);
        self
    }

    /// Declare an exported symbol; it is also added to `provides`
    #[inline]
    #[must_use]
    pub fn with_output(mut self, signature: Signature) -> Self {
        if !self.provides.contains(&signature.name) {
            self.provides.push(signature.name.clone());
        }
        self.outputs.push(signature);
        self
    }

    #[inline]
    #[must_use]
    pub fn requiring(mut self, symbol: impl Into<String>) -> Self {
        self.requires.push(symbol.into());
        self
    }

    /// Sum of the line estimates
    #[inline]
    #[must_use]
    pub fn estimated_lines(&self) -> u32 {
        self.line_estimates.iter().sum()
    }

    /// True when the declared estimate already exceeds the target
    #[inline]
    #[must_use]
    pub fn over_target(&self) -> bool {
        self.estimated_lines() > Self::TARGET_LINES
    }
}
