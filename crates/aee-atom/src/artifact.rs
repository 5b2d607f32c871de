//! Generated artifacts
//!
//! An [`Artifact`] is the opaque payload a generator returns for an atom:
//! source text plus the interface it claims to export and import. The
//! content hash is computed on construction and after every builder call,
//! so `hash == compute(content)` always holds for a freshly built value;
//! [`Artifact::verify`] re-checks it after deserialization.

use crate::hash::ContentHash;
use crate::spec::{Language, Signature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generated payload for one atom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    language: Language,
    source: String,
    exports: Vec<Signature>,
    imports: Vec<Signature>,
    metadata: BTreeMap<String, String>,
    hash: ContentHash,
}

impl Artifact {
    /// Create an artifact from source text
    #[must_use]
    pub fn new(language: Language, source: impl Into<String>) -> Self {
        let mut artifact = Self {
            language,
            source: source.into(),
            exports: Vec::new(),
            imports: Vec::new(),
            metadata: BTreeMap::new(),
            hash: ContentHash::ZERO,
        };
        artifact.rehash();
        artifact
    }

    /// Declare an exported symbol
    #[must_use]
    pub fn with_export(mut self, signature: Signature) -> Self {
        self.exports.push(signature);
        self.rehash();
        self
    }

    /// Declare an imported symbol
    #[must_use]
    pub fn with_import(mut self, signature: Signature) -> Self {
        self.imports.push(signature);
        self.rehash();
        self
    }

    /// Attach generator metadata (model, seed, ...). Not part of the hash.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    #[must_use]
    pub fn exports(&self) -> &[Signature] {
        &self.exports
    }

    #[inline]
    #[must_use]
    pub fn imports(&self) -> &[Signature] {
        &self.imports
    }

    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Number of non-blank source lines
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.source.lines().filter(|l| !l.trim().is_empty()).count()
    }

    /// Look up an export by name
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&Signature> {
        self.exports.iter().find(|s| s.name == name)
    }

    /// True when the stored hash matches the content
    #[inline]
    #[must_use]
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }

    fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    fn compute_hash(&self) -> ContentHash {
        let mut parts: Vec<Vec<u8>> = vec![
            self.language.name().as_bytes().to_vec(),
            self.source.as_bytes().to_vec(),
        ];
        for export in &self.exports {
            parts.push(format!("export {export}").into_bytes());
        }
        for import in &self.imports {
            parts.push(format!("import {import}").into_bytes());
        }
        ContentHash::compute_parts(parts.iter().map(Vec::as_slice))
    }
}
