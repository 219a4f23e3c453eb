//! Participant Replica
//!
//! A participant's local copy of a session. Moves arrive as coordinates only
//! and are re-run here with the staged cascade; snapshots replace the local
//! copy wholesale and report whether it had drifted from the authority.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::core::hash::hash_to_hex;
use crate::game::cascade::{add_bomb_staged, DetonationObserver};
use crate::game::events::CascadeReport;
use crate::game::grid::{Grid, GridError};
use crate::game::state::PlayerId;
use crate::network::protocol::StateSnapshot;

/// Replica errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicaError {
    /// A move arrived before any snapshot.
    #[error("no snapshot received yet")]
    NoSnapshot,

    /// The roster is empty, so no player can own the move.
    #[error("no current player")]
    NoCurrentPlayer,

    /// Snapshot grid or move coordinates were invalid.
    #[error("grid error: {0}")]
    Grid(#[from] GridError),
}

/// Result of applying a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotApplied {
    /// The local grid differed from the authority's.
    pub drifted: bool,
    /// The snapshot's `stateHash` did not match the grid it carried.
    pub hash_mismatch: bool,
}

/// Local copy of one session.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    grid: Option<Grid>,
    players: Vec<PlayerId>,
    turn: u64,
    current_player: Option<PlayerId>,
    active_players: BTreeSet<PlayerId>,
    winner: Option<PlayerId>,
}

impl Replica {
    /// Create an empty replica. Moves are refused until the first snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local grid, once a snapshot arrived.
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    /// Roster from the last snapshot.
    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    /// Turn index as tracked locally.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Player expected to move next.
    pub fn current_player(&self) -> Option<PlayerId> {
        self.current_player
    }

    /// Winner, either announced by the authority or detected locally.
    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    /// Replace local state with an authoritative snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &StateSnapshot) -> Result<SnapshotApplied, ReplicaError> {
        let grid = snapshot.to_grid()?;

        let hash_mismatch = !snapshot.state_hash.is_empty()
            && snapshot.state_hash != hash_to_hex(&grid.compute_hash());
        if hash_mismatch {
            warn!("Snapshot hash does not match its grid");
        }

        let drifted = self.grid.as_ref().is_some_and(|local| *local != grid);
        if drifted {
            warn!("Replica drifted from authority at turn {}, resynchronized", snapshot.turn);
        }

        self.grid = Some(grid);
        self.players = snapshot.players.clone();
        self.turn = snapshot.turn;
        self.current_player = snapshot.current_player;
        if snapshot.winner.is_some() {
            self.winner = snapshot.winner;
        }

        Ok(SnapshotApplied { drifted, hash_mismatch })
    }

    /// Replay a broadcast move for the current player, pausing on `observer`
    /// after every detonation.
    pub async fn apply_move<O>(
        &mut self,
        row: i64,
        column: i64,
        observer: &mut O,
    ) -> Result<CascadeReport, ReplicaError>
    where
        O: DetonationObserver,
    {
        let grid = self.grid.as_mut().ok_or(ReplicaError::NoSnapshot)?;
        let player = self.current_player.ok_or(ReplicaError::NoCurrentPlayer)?;
        let position = grid.position(row, column)?;

        let report = add_bomb_staged(grid, player, position, observer).await;
        debug!(
            "Replayed ({}, {}) for {}: {} detonations",
            row,
            column,
            player.short(),
            report.detonation_count()
        );

        self.active_players.insert(player);
        if self.winner.is_none() && self.active_players.len() > 1 {
            self.winner = grid.sole_owner();
        }

        self.turn += 1;
        self.current_player = if self.players.is_empty() {
            Some(player)
        } else {
            let idx = (self.turn % self.players.len() as u64) as usize;
            Some(self.players[idx])
        };

        Ok(report)
    }
}
