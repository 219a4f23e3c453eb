//! Cascade Events
//!
//! Detonations produced while resolving a placement, in the exact order the
//! engine applied them. Replicas compare against this order for determinism.

use serde::{Serialize, Deserialize};

use crate::game::grid::Position;
use crate::game::state::PlayerId;

/// One cell reaching capacity and distributing its bombs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detonation {
    /// Zero-based index of this detonation within its cascade.
    pub sequence: u32,
    /// Cell that detonated.
    pub position: Position,
}

/// How a cascade stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeOutcome {
    /// Worklist drained; no reachable cell is at capacity.
    Settled,
    /// Detonation limit reached; the remaining worklist was discarded.
    Truncated,
}

/// Result of resolving one placement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    /// Player whose placement triggered the cascade.
    pub player: PlayerId,
    /// Cell the bomb was placed on.
    pub origin: Position,
    /// Detonations in application order.
    pub detonations: Vec<Detonation>,
    /// How the cascade stopped.
    pub outcome: CascadeOutcome,
}

impl CascadeReport {
    /// Number of detonations.
    pub fn detonation_count(&self) -> usize {
        self.detonations.len()
    }

    /// True if the detonation limit cut the cascade short.
    pub fn is_truncated(&self) -> bool {
        self.outcome == CascadeOutcome::Truncated
    }

    /// Detonated positions in order.
    pub fn positions(&self) -> Vec<Position> {
        self.detonations.iter().map(|d| d.position).collect()
    }
}
