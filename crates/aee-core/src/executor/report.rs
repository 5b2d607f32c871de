//! Run state and the report handed back by the executor

use crate::error::AbortInfo;
use crate::review::{ReviewItem, ReviewReason};
use aee_atom::{AtomId, AtomStatus, RunId};
use aee_graph::GraphStats;
use aee_validation::{LocalizationMethod, Scope, ValidationLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Run state machine
///
/// `Planning -> Executing(0) -> Gating(0) -> Executing(1) -> ... -> Completed | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Executing { wave: usize },
    Gating { wave: usize },
    Completed,
    Aborted,
}

impl RunState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => f.write_str("planning"),
            Self::Executing { wave } => write!(f, "executing wave {wave}"),
            Self::Gating { wave } => write!(f, "gating wave {wave}"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Where an atom ended up after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum AtomOutcome {
    Validated,
    Resolved,
    Review(ReviewReason),
    /// A dependency never became usable; the atom is still Pending
    Blocked,
    /// Not reached before the run stopped
    Cancelled,
}

/// Per-wave counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveSummary {
    pub level: usize,
    pub atoms: usize,
    pub dispatched: usize,
    /// Members already settled by an earlier run
    pub skipped: usize,
    pub blocked: usize,
    pub validated: usize,
    pub review: usize,
    pub cancelled: usize,
    /// Most atoms in flight at once
    pub peak_concurrency: usize,
    pub elapsed_ms: u64,
}

/// One gate evaluation, including any repair rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRecord {
    pub level: ValidationLevel,
    pub scope: Scope,
    /// Wave after which the gate fired; `None` for the system gate
    pub wave: Option<usize>,
    pub passed: bool,
    /// Times the scope was validated
    pub evaluations: usize,
    pub method: Option<LocalizationMethod>,
    pub culprits: Vec<AtomId>,
    pub retried: Vec<AtomId>,
    pub quarantined: Vec<AtomId>,
}

impl GateRecord {
    pub(crate) fn new(level: ValidationLevel, scope: Scope, wave: Option<usize>) -> Self {
        Self {
            level,
            scope,
            wave,
            passed: false,
            evaluations: 0,
            method: None,
            culprits: Vec::new(),
            retried: Vec::new(),
            quarantined: Vec::new(),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    pub abort: Option<AbortInfo>,
    pub graph: Option<GraphStats>,
    pub waves: Vec<WaveSummary>,
    pub gates: Vec<GateRecord>,
    pub blocked: Vec<AtomId>,
    pub outcomes: BTreeMap<AtomId, AtomOutcome>,
    pub status_counts: BTreeMap<AtomStatus, usize>,
    /// Pending review items at the end of the run, in priority order
    pub review_queue: Vec<ReviewItem>,
    pub total_attempts: u64,
    pub persistence_failures: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    #[must_use]
    pub fn count(&self, status: AtomStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn outcome(&self, id: &AtomId) -> Option<AtomOutcome> {
        self.outcomes.get(id).copied()
    }

    /// Member count of each wave, in execution order
    #[must_use]
    pub fn wave_sizes(&self) -> Vec<usize> {
        self.waves.iter().map(|w| w.atoms).collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}: {}", self.run_id, self.state)?;
        if let Some(abort) = &self.abort {
            writeln!(f, "  Cause: {:?}: {}", abort.kind, abort.message)?;
            if !abort.members.is_empty() {
                let members: Vec<&str> = abort.members.iter().map(AtomId::as_str).collect();
                writeln!(f, "  Members: {}", members.join(", "))?;
            }
        }
        if let Some(graph) = &self.graph {
            writeln!(
                f,
                "  Graph: {} atoms, {} edges, {} waves (widest {})",
                graph.atoms, graph.edges, graph.waves, graph.widest_wave
            )?;
        }
        for (status, count) in &self.status_counts {
            writeln!(f, "  {:<10} {count}", status.to_string())?;
        }
        let failed_gates = self.gates.iter().filter(|g| !g.passed).count();
        writeln!(f, "  Gates: {} evaluated, {} failed", self.gates.len(), failed_gates)?;
        writeln!(f, "  Attempts: {}", self.total_attempts)?;
        writeln!(f, "  Review queue: {}", self.review_queue.len())?;
        if !self.blocked.is_empty() {
            writeln!(f, "  Blocked: {}", self.blocked.len())?;
        }
        if self.persistence_failures > 0 {
            writeln!(f, "  Persistence failures: {}", self.persistence_failures)?;
        }
        write!(f, "  Elapsed: {}ms", self.elapsed_ms)
    }
}
