//! AEE Hierarchical Validation
//!
//! Four escalating validation levels with a shared gate rule:
//!
//! 1. **Atomic**: every artifact, right after generation
//! 2. **Module**: atoms of one module compose
//! 3. **Component**: modules of one component integrate
//! 4. **System**: full acceptance after the final wave
//!
//! # Core Concepts
//!
//! - [`Checker`]: pluggable rule set bound to one level
//! - [`GatePolicy`]: "Gate S", any `must` failure or too many `should` failures
//! - [`HierarchicalValidator`]: registry of checkers, runs levels and gates
//! - [`Localization`]: result of bisecting a failed gate down to culprits
//!
//! # Example
//!
//! ```rust,ignore
//! use aee_validation::{HierarchicalValidator, Subject};
//!
//! let validator = HierarchicalValidator::default();
//! let assessment = validator.validate_atomic(Subject::new(&atom, &artifact), &[]);
//! if !assessment.passed() {
//!     feedback.extend(assessment.violated_rules());
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod bisect;
mod checker;
pub mod checkers;
mod config;
mod error;
mod gate;
mod outcome;
pub mod syntax;
mod validator;

pub use bisect::{Localization, LocalizationMethod};
pub use checker::{local_name, CheckInput, Checker, Subject};
pub use config::ValidationConfig;
pub use error::ValidationError;
pub use gate::{GatePolicy, GateVerdict};
pub use outcome::{CheckOutcome, Scope, Severity, ValidationLevel, ValidationResult, Violation};
pub use validator::{AtomicAssessment, HierarchicalValidator, ScopeValidation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
