//! AEE Dependency Graph
//!
//! Turns a set of atoms into an acyclic graph and groups it into waves of
//! mutually independent atoms.
//!
//! # Core Concepts
//!
//! - [`GraphBuilder`]: collects atoms and edge policies, then builds
//! - [`DependencyGraph`]: leveled, queryable result (only for acyclic input)
//! - [`ExecutionWave`]: one topological level, sorted by atom id
//! - [`Boundary`]: whether an atom's output crosses a module or component
//! - [`EdgePolicy`]: pluggable edge derivation beyond declared dependencies
//!
//! # Example
//!
//! ```rust,ignore
//! use aee_graph::{GraphBuilder, SharedSymbols};
//!
//! let graph = GraphBuilder::new()
//!     .with_policy(SharedSymbols)
//!     .add_atoms(atoms.iter())?
//!     .build()?;
//! assert_eq!(graph.waves()[0].level, 0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod builder;
mod edge;
mod error;
mod graph;

pub use builder::GraphBuilder;
pub use edge::{AtomNode, DependencyEdge, EdgeKind, EdgePolicy, SharedSymbols};
pub use error::GraphError;
pub use graph::{Boundary, DependencyGraph, ExecutionWave, GraphStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
