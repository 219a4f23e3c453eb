//! Network Layer
//!
//! WebSocket server for turn-based multiplayer rooms, plus the participant
//! side that replays broadcasts on a local replica.
//! This layer is **non-deterministic** - all game rules run through `game/`.

pub mod protocol;
pub mod session;
pub mod replica;
pub mod client;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, StateSnapshot, WireCell, ErrorCode};
pub use session::{
    GameSession, SessionManager, SessionState, SessionError, MoveOutcome, RejectReason, RoomId,
};
pub use replica::{Replica, ReplicaError};
pub use client::{ParticipantClient, ClientEvent, ClientError};
pub use server::{GameServer, ServerConfig, GameServerError, ConfigError};
