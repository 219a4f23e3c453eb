//! Move Transcript Recording
//!
//! Records every accepted move of a session so the final grid can be rebuilt
//! from an empty board and checked hash-for-hash. Serialized with bincode.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::game::cascade::add_bomb;
use crate::game::events::CascadeReport;
use crate::game::grid::{Grid, GridConfig, GridError, Position};
use crate::game::state::PlayerId;

/// Current transcript version.
pub const TRANSCRIPT_VERSION: u8 = 1;

/// One accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Turn index at which the move was accepted.
    pub turn: u64,
    /// Player who moved.
    pub player: PlayerId,
    /// Cell the bomb was placed on.
    pub position: Position,
    /// Detonations the move caused.
    pub detonations: u32,
    /// Grid hash after the cascade.
    pub grid_hash: StateHash,
}

/// Complete move history for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTranscript {
    /// Version for forward compatibility.
    pub version: u8,
    /// Room the session was played in.
    pub room: String,
    /// Grid dimensions.
    pub grid: GridConfig,
    /// Accepted moves in authority order.
    pub moves: Vec<MoveRecord>,
    /// Declared winner, if any.
    pub winner: Option<PlayerId>,
}

/// Transcript errors.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    /// Failed to encode.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to decode.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Unsupported version.
    #[error("unsupported transcript version {0}")]
    UnsupportedVersion(u8),

    /// Grid could not be built or a move fell outside it.
    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    /// A recorded move was not legal on the replayed grid.
    #[error("move {turn} is illegal for the replayed grid")]
    IllegalMove {
        /// Turn of the offending move.
        turn: u64,
    },

    /// Replayed grid diverged from the recorded hash.
    #[error("grid hash mismatch after move {turn}")]
    HashMismatch {
        /// Turn of the first diverging move.
        turn: u64,
    },
}

impl MoveTranscript {
    /// Start an empty transcript.
    pub fn new(room: impl Into<String>, grid: GridConfig) -> Self {
        Self {
            version: TRANSCRIPT_VERSION,
            room: room.into(),
            grid,
            moves: Vec::new(),
            winner: None,
        }
    }

    /// Record an accepted move.
    pub fn record(&mut self, turn: u64, report: &CascadeReport, grid_hash: StateHash) {
        self.moves.push(MoveRecord {
            turn,
            player: report.player,
            position: report.origin,
            detonations: report.detonation_count() as u32,
            grid_hash,
        });
    }

    /// Record the winner.
    pub fn set_winner(&mut self, winner: PlayerId) {
        self.winner = Some(winner);
    }

    /// Grid hash after the last move.
    pub fn final_hash(&self) -> Option<StateHash> {
        self.moves.last().map(|m| m.grid_hash)
    }

    /// Number of recorded moves.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// True if no move was recorded.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Digest over the whole move list.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_transcript();
        hasher.update_u8(self.version);
        hasher.update_bytes(self.room.as_bytes());
        hasher.update_u32(self.grid.rows as u32);
        hasher.update_u32(self.grid.columns as u32);
        for m in &self.moves {
            hasher.update_u64(m.turn);
            hasher.update_uuid(m.player.as_bytes());
            hasher.update_u32(m.position.row as u32);
            hasher.update_u32(m.position.column as u32);
            hasher.update_bytes(&m.grid_hash);
        }
        hasher.finalize()
    }

    /// Serialize to bytes using bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TranscriptError> {
        bincode::serialize(self).map_err(|e| TranscriptError::SerializationFailed(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TranscriptError> {
        let transcript: Self = bincode::deserialize(data)
            .map_err(|e| TranscriptError::DeserializationFailed(e.to_string()))?;
        if transcript.version != TRANSCRIPT_VERSION {
            return Err(TranscriptError::UnsupportedVersion(transcript.version));
        }
        Ok(transcript)
    }
}

/// Replay a transcript from an empty grid.
///
/// Every move is re-checked for legality and every intermediate grid hash must
/// match the recorded one.
pub fn replay_transcript(
    transcript: &MoveTranscript,
) -> Result<(Grid, Vec<CascadeReport>), TranscriptError> {
    let mut grid = Grid::new(transcript.grid)?;
    let mut reports = Vec::with_capacity(transcript.moves.len());

    for record in &transcript.moves {
        let pos = grid.position(record.position.row as i64, record.position.column as i64)?;
        if !grid.can_place(record.player, pos) {
            return Err(TranscriptError::IllegalMove { turn: record.turn });
        }

        let report = add_bomb(&mut grid, record.player, pos);
        if grid.compute_hash() != record.grid_hash {
            return Err(TranscriptError::HashMismatch { turn: record.turn });
        }
        reports.push(report);
    }

    Ok((grid, reports))
}
