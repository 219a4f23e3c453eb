//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames tagged by `type`.
//!
//! Moves are broadcast as coordinates only. The full grid travels solely in
//! `state` snapshots, which exist to reconcile replicas that drifted.

use serde::{Serialize, Deserialize};

use crate::core::hash::hash_to_hex;
use crate::game::grid::{Cell, Grid, GridConfig, GridError};
use crate::game::state::PlayerId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request to place a bomb.
    AddBomb {
        /// Target row.
        row: i64,
        /// Target column.
        column: i64,
    },

    /// Request a full snapshot.
    GetState,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect.
    Welcome {
        /// Id assigned to this connection.
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        /// Room the connection joined.
        room: String,
    },

    /// Accepted move, echoed to every member including the mover.
    AddBomb {
        /// Validated row.
        row: i64,
        /// Validated column.
        column: i64,
    },

    /// Full authoritative snapshot.
    State(StateSnapshot),

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason for shutdown.
        reason: String,
    },
}

/// One cell on the wire. Adjacency is never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCell {
    /// Bomb count.
    pub bombs: u8,
    /// Owner, absent when the cell is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerId>,
}

impl From<&Cell> for WireCell {
    fn from(cell: &Cell) -> Self {
        Self {
            bombs: cell.bombs(),
            player: cell.owner(),
        }
    }
}

impl From<WireCell> for Cell {
    fn from(cell: WireCell) -> Self {
        Cell::from_parts(cell.bombs, cell.player)
    }
}

/// Full session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Player whose turn it is. `None` only for an empty roster.
    pub current_player: Option<PlayerId>,
    /// Grid rows, each a list of cells.
    pub grid: Vec<Vec<WireCell>>,
    /// Roster in join order.
    #[serde(default)]
    pub players: Vec<PlayerId>,
    /// Accepted moves so far.
    #[serde(default)]
    pub turn: u64,
    /// Declared winner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
    /// Hex SHA-256 of the grid.
    #[serde(default)]
    pub state_hash: String,
}

impl StateSnapshot {
    /// Capture a grid plus turn state.
    pub fn capture(
        grid: &Grid,
        players: &[PlayerId],
        turn: u64,
        current_player: Option<PlayerId>,
        winner: Option<PlayerId>,
    ) -> Self {
        Self {
            current_player,
            grid: grid
                .row_slices()
                .map(|row| row.iter().map(WireCell::from).collect())
                .collect(),
            players: players.to_vec(),
            turn,
            winner,
            state_hash: hash_to_hex(&grid.compute_hash()),
        }
    }

    /// Rebuild the grid carried by this snapshot.
    ///
    /// Rejects ragged rows and cells that break the capacity or ownership
    /// invariants.
    pub fn to_grid(&self) -> Result<Grid, GridError> {
        let rows = self.grid.len();
        let columns = self.grid.first().map_or(0, Vec::len);
        let config = GridConfig::new(rows, columns);
        config.validate()?;

        let expected = rows * columns;
        let cells: Vec<Cell> = self.grid.iter().flatten().copied().map(Cell::from).collect();
        if cells.len() != expected || self.grid.iter().any(|row| row.len() != columns) {
            return Err(GridError::ShapeMismatch { expected, actual: cells.len() });
        }

        Grid::from_cells(config, cells)
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed.
    InvalidMessage,
    /// Coordinates outside the grid.
    InvalidPosition,
    /// Room does not exist.
    SessionNotFound,
    /// Sender is not a member of the room.
    NotInSession,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}
