//! Atom lifecycle
//!
//! ```text
//! Pending -> Generating -> Validating -> Validated -> InReview -> Resolved
//!                 ^            |    \
//!                 +------------+     +-> Failed -> Resolved
//! ```
//!
//! `Generating`/`Validating` may fall back to `Pending` on cancellation.
//! A `Pending` atom whose attempt budget is already spent goes straight
//! to `Failed`.
//! Failed and InReview atoms re-enter `Generating` when a reviewer asks
//! for regeneration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AtomStatus {
    Pending,
    Generating,
    Validating,
    Validated,
    Failed,
    InReview,
    Resolved,
}

impl AtomStatus {
    /// States reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [AtomStatus] {
        use AtomStatus::*;
        match self {
            Pending => &[Generating, Failed],
            Generating => &[Validating, Failed, Pending, InReview],
            Validating => &[Generating, Validated, Failed, Pending, InReview, Resolved],
            Validated => &[InReview],
            Failed => &[Generating, Resolved],
            InReview => &[Generating, Resolved],
            Resolved => &[],
        }
    }

    /// Whether `self -> to` is legal
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: AtomStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Dependents may consume this atom's artifact
    #[inline]
    #[must_use]
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, AtomStatus::Validated | AtomStatus::Resolved)
    }

    /// The atom is done for the current wave
    #[inline]
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            AtomStatus::Validated | AtomStatus::Failed | AtomStatus::InReview | AtomStatus::Resolved
        )
    }

    /// A worker currently owns the atom
    #[inline]
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, AtomStatus::Generating | AtomStatus::Validating)
    }
}

impl fmt::Display for AtomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
