//! AEE Atom Model
//!
//! The leaf of the engine: what an atom is, what it produces, and where
//! its mutable state lives.
//!
//! # Core Concepts
//!
//! - [`AtomicUnit`]: smallest independently generatable unit of work
//! - [`AtomSpec`]: declared module, interface and size of an atom
//! - [`Artifact`]: content-addressed generated payload
//! - [`AtomStatus`]: lifecycle with an explicit transition table
//! - [`RetryAttempt`]: append-only attempt log entry
//! - [`AtomStore`]: sharded concurrent registry enforcing the single-writer rules
//!
//! # Example
//!
//! ```rust,ignore
//! use aee_atom::{AtomicUnit, AtomSpec, AtomStore, Signature};
//!
//! let store = AtomStore::from_atoms([
//!     AtomicUnit::new("auth.hash", "auth", AtomSpec::new("hash a password")
//!         .with_output(Signature::new("hash_password", "fn(&str) -> String"))),
//!     AtomicUnit::new("auth.login", "auth", AtomSpec::new("log in"))
//!         .depends_on("auth.hash"),
//! ])?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod atom;
mod hash;
mod ids;
mod spec;
mod status;
mod store;

pub use artifact::Artifact;
pub use atom::{AtomicUnit, AttemptOutcome, AttemptStrategy, RetryAttempt};
pub use hash::{ContentHash, HashError};
pub use ids::{AtomId, RunId, TaskId};
pub use spec::{AtomSpec, Language, Signature};
pub use status::AtomStatus;
pub use store::{AtomStore, StoreError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
