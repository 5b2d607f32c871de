//! AEE Core - the Atomic Execution Engine
//!
//! Takes a plan of atomic units and drives each one from `Pending` to an
//! accepted artifact or a human review item:
//! - Levels the dependency graph into waves and runs them in order
//! - Runs ready atoms on a bounded worker pool, with per-attempt timeouts
//! - Retries failed attempts with perturbed strategies and backoff
//! - Gates module, component and system scopes, bisecting failures to culprits
//! - Scores confidence and routes low-confidence work to a review queue
//!
//! # Core Concepts
//!
//! - **[`WaveExecutor`]**: the scheduler; owns the run state machine
//! - **[`RetryOrchestrator`]**: bounded generate-and-validate loop for one atom
//! - **[`Generator`]**: the code-synthesis capability the engine calls out to
//! - **[`ReviewQueue`]** and **[`ReviewManager`]**: human-in-the-loop routing
//! - **[`EngineContext`]**: everything a worker touches, passed by reference
//!
//! # Example
//!
//! ```rust,ignore
//! use aee_core::prelude::*;
//! use aee_core::simulation::{synthetic_plan, PlanShape, SimulatedGenerator};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(AtomStore::from_atoms(synthetic_plan(PlanShape::default()))?);
//! let ctx = Arc::new(EngineContext::new(EngineConfig::default(), store));
//! let executor = WaveExecutor::new(ctx, Arc::new(SimulatedGenerator::new(7)));
//!
//! let report = executor.run().await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Engine modules
pub mod clock;
pub mod confidence;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod generator;
pub mod repository;
pub mod retry;
pub mod review;
pub mod simulation;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, TokioClock};
pub use confidence::{ConfidenceInputs, ConfidenceScorer};
pub use config::{
    BackoffConfig, ConfidenceWeights, ConfigError, EngineConfig, GateConfig, RetryConfig, ReviewPolicy,
};
pub use context::EngineContext;
pub use error::{AbortInfo, AbortKind, Diagnostic, EngineError, ErrorType, Location, SuggestedFix};
pub use events::{
    ChannelSink, EngineEvent, EventBus, EventSink, FanoutSink, NullSink, SequencedEvent, TracingSink,
};
pub use executor::{AtomOutcome, GateRecord, RunReport, RunState, WaveExecutor, WaveSummary};
pub use generator::{AttemptContext, GenerationError, Generator};
pub use repository::{InMemoryRepository, Repository, RepositoryError};
pub use retry::{
    AttemptResult, AttemptState, Backoff, GeometricPerturbation, RetryOrchestrator, RetryOutcome, StrategyPolicy,
};
pub use review::{
    select_for_review, RegenerateOutcome, ReviewDecisionKind, ReviewError, ReviewItem, ReviewManager, ReviewQueue,
    ReviewReason,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine
    pub use crate::{
        EngineConfig, EngineContext, EngineError, Generator, ReviewManager, ReviewQueue, RunReport, RunState,
        WaveExecutor,
    };
    pub use aee_atom::{Artifact, AtomId, AtomSpec, AtomStatus, AtomStore, AtomicUnit};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
