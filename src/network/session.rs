//! Game Session Management
//!
//! One `GameSession` per room is the turn authority: it owns the roster, the
//! turn index and the authoritative grid, and accepts or rejects moves.
//! `SessionManager` is the room registry used by the connection layer.
//!
//! ## Locking
//!
//! The registry lock is never held while waiting for a session lock: the
//! registry only hands out `Arc` handles. A session that empties is marked
//! `Closed` under its own lock and then unlinked from the registry if the
//! registry still points at that same session. A joiner that finds a
//! `Closed` session unlinks it and retries with a fresh one.
//!
//! A move runs its cascade and its broadcast under the session write lock,
//! so every member receives moves in the order they were applied. Sends never
//! wait: a member whose queue is full or closed is evicted as if it had
//! disconnected, and the rest of the room gets a fresh snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::game::cascade::add_bomb;
use crate::game::events::CascadeReport;
use crate::game::grid::{Grid, GridConfig, GridError, Position};
use crate::game::state::PlayerId;
use crate::game::transcript::MoveTranscript;
use crate::network::protocol::{ErrorCode, ServerMessage, StateSnapshot};

/// Room identifier, taken from the connection address.
pub type RoomId = String;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting moves.
    Active,
    /// Winner declared; moves are rejected.
    Won,
    /// Roster emptied; the session is discarded.
    Closed,
}

/// Why a move was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Sender is not the current player.
    NotYourTurn,
    /// Target cell belongs to another player.
    CellOwnedByOther,
    /// A winner has already been declared.
    GameOver,
}

/// An accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMove {
    /// Validated target cell.
    pub position: Position,
    /// Turn index the move was accepted at.
    pub turn: u64,
    /// Cascade produced by the move.
    pub report: CascadeReport,
    /// Winner declared by this move.
    pub winner: Option<PlayerId>,
}

/// Result of a move request that reached the turn check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Applied and broadcast.
    Accepted(AcceptedMove),
    /// Not applied; nothing was broadcast.
    Rejected(RejectReason),
}

impl MoveOutcome {
    /// True if the move was applied.
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted(_))
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the room.
    #[error("Session not found: {0}")]
    SessionNotFound(RoomId),

    /// Sender has not joined the room.
    #[error("Player not in session")]
    PlayerNotInSession,

    /// Move coordinates outside the grid.
    #[error("Invalid position: {0}")]
    InvalidPosition(GridError),

    /// Session grid could not be created.
    #[error("Invalid grid: {0}")]
    Grid(GridError),
}

impl SessionError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            SessionError::PlayerNotInSession => ErrorCode::NotInSession,
            SessionError::InvalidPosition(_) => ErrorCode::InvalidPosition,
            SessionError::Grid(_) => ErrorCode::InternalError,
        }
    }

    /// Wire error message for this error.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// Authoritative state of one room.
pub struct GameSession {
    id: RoomId,
    state: SessionState,
    /// Roster in join order.
    players: Vec<PlayerId>,
    /// Outbound channel per member.
    members: BTreeMap<PlayerId, mpsc::Sender<ServerMessage>>,
    /// Players with at least one accepted move.
    active_players: BTreeSet<PlayerId>,
    turn_index: u64,
    grid: Grid,
    winner: Option<PlayerId>,
    transcript: MoveTranscript,
}

impl GameSession {
    /// Create an empty session with a fresh grid.
    pub fn new(id: impl Into<RoomId>, config: GridConfig) -> Result<Self, GridError> {
        let id = id.into();
        let grid = Grid::new(config)?;
        Ok(Self {
            transcript: MoveTranscript::new(id.clone(), config),
            id,
            state: SessionState::Active,
            players: Vec::new(),
            members: BTreeMap::new(),
            active_players: BTreeSet::new(),
            turn_index: 0,
            grid,
            winner: None,
        })
    }

    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Roster in join order.
    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// True once the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Whether `player` is on the roster.
    pub fn contains(&self, player: &PlayerId) -> bool {
        self.players.contains(player)
    }

    /// Authoritative grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Accepted moves so far.
    pub fn turn_index(&self) -> u64 {
        self.turn_index
    }

    /// Players with at least one accepted move.
    pub fn active_players(&self) -> &BTreeSet<PlayerId> {
        &self.active_players
    }

    /// Declared winner.
    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    /// Accepted move history.
    pub fn transcript(&self) -> &MoveTranscript {
        &self.transcript
    }

    /// Player whose turn it is: `players[turn_index mod players.len()]`.
    ///
    /// Recomputed against the current roster, so a join or leave between
    /// moves can shift whose turn it is.
    pub fn current_player(&self) -> Option<PlayerId> {
        if self.players.is_empty() {
            return None;
        }
        let idx = (self.turn_index % self.players.len() as u64) as usize;
        Some(self.players[idx])
    }

    /// Full snapshot of the session.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(
            &self.grid,
            &self.players,
            self.turn_index,
            self.current_player(),
            self.winner,
        )
    }

    /// Add a player. Idempotent; a repeated join only replaces the sender.
    pub fn join(&mut self, player: PlayerId, sender: mpsc::Sender<ServerMessage>) -> StateSnapshot {
        if !self.players.contains(&player) {
            self.players.push(player);
        }
        self.members.insert(player, sender);
        self.snapshot()
    }

    /// Remove a player. Returns false if they were not on the roster.
    ///
    /// An emptied roster closes the session.
    pub fn leave(&mut self, player: &PlayerId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p != player);
        self.active_players.remove(player);
        self.members.remove(player);

        if self.players.is_empty() {
            self.state = SessionState::Closed;
        }
        self.players.len() != before
    }

    /// Validate and apply a move.
    ///
    /// Membership and bounds failures are errors. Turn and ownership failures
    /// are `Ok(MoveOutcome::Rejected)` and leave the session untouched.
    pub fn request_move(
        &mut self,
        player: PlayerId,
        row: i64,
        column: i64,
    ) -> Result<MoveOutcome, SessionError> {
        if !self.contains(&player) {
            return Err(SessionError::PlayerNotInSession);
        }
        let position = self
            .grid
            .position(row, column)
            .map_err(SessionError::InvalidPosition)?;

        if self.state != SessionState::Active {
            return Ok(MoveOutcome::Rejected(RejectReason::GameOver));
        }
        if self.current_player() != Some(player) {
            return Ok(MoveOutcome::Rejected(RejectReason::NotYourTurn));
        }
        if !self.grid.can_place(player, position) {
            return Ok(MoveOutcome::Rejected(RejectReason::CellOwnedByOther));
        }

        let report = add_bomb(&mut self.grid, player, position);
        if report.is_truncated() {
            warn!(
                "Room {}: cascade from ({}, {}) truncated after {} detonations",
                self.id, row, column, report.detonation_count()
            );
        }

        let turn = self.turn_index;
        self.active_players.insert(player);
        self.turn_index += 1;
        self.transcript.record(turn, &report, self.grid.compute_hash());

        let winner = self.check_winner();
        if let Some(winner) = winner {
            self.winner = Some(winner);
            self.state = SessionState::Won;
            self.transcript.set_winner(winner);
            info!("Room {}: player {} wins after {} moves", self.id, winner.short(), self.turn_index);
        }

        Ok(MoveOutcome::Accepted(AcceptedMove {
            position,
            turn,
            report,
            winner,
        }))
    }

    /// Sole remaining owner, once more than one player has moved.
    fn check_winner(&self) -> Option<PlayerId> {
        if self.active_players.len() > 1 {
            self.grid.sole_owner()
        } else {
            None
        }
    }

    /// Send a message to every member without waiting.
    ///
    /// Members that cannot take the message are evicted, and the remaining
    /// members are sent a snapshot of the shrunken roster. Returns the evicted
    /// players.
    pub fn broadcast(&mut self, message: ServerMessage) -> Vec<PlayerId> {
        let mut evicted = self.offer_all(&message);
        let mut stalled = evicted.clone();
        while !stalled.is_empty() && !self.is_empty() {
            let update = ServerMessage::State(self.snapshot());
            stalled = self.offer_all(&update);
            evicted.extend_from_slice(&stalled);
        }
        evicted
    }

    /// Send a message to one member without waiting. A member that cannot
    /// take it is evicted and the rest of the room is told.
    ///
    /// Returns false if the member was evicted or is unknown.
    pub fn send_to(&mut self, player: &PlayerId, message: ServerMessage) -> bool {
        let Some(sender) = self.members.get(player) else {
            return false;
        };
        if sender.try_send(message).is_ok() {
            return true;
        }

        self.evict(player);
        if !self.is_empty() {
            let update = ServerMessage::State(self.snapshot());
            self.broadcast(update);
        }
        false
    }

    /// One `try_send` per member; evicts and returns those that failed.
    fn offer_all(&mut self, message: &ServerMessage) -> Vec<PlayerId> {
        let stalled: Vec<PlayerId> = self
            .members
            .iter()
            .filter(|(_, sender)| sender.try_send(message.clone()).is_err())
            .map(|(player, _)| *player)
            .collect();
        for player in &stalled {
            self.evict(player);
        }
        stalled
    }

    fn evict(&mut self, player: &PlayerId) {
        if self.leave(player) {
            warn!("Room {}: evicted {}, outbound queue full or closed", self.id, player.short());
        }
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Registry of live rooms.
pub struct SessionManager {
    /// Dimensions for newly created rooms.
    grid: GridConfig,
    /// Active sessions.
    sessions: RwLock<BTreeMap<RoomId, Arc<RwLock<GameSession>>>>,
}

impl SessionManager {
    /// Create a registry whose rooms use `grid` dimensions.
    pub fn new(grid: GridConfig) -> Self {
        Self {
            grid,
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Join `room`, creating it if absent, and broadcast the new snapshot to
    /// the room.
    pub async fn join(
        &self,
        room: &str,
        player: PlayerId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<StateSnapshot, SessionError> {
        loop {
            let session = self.get_or_create(room).await?;
            let mut guard = session.write().await;
            if guard.state() == SessionState::Closed {
                // Emptied between lookup and lock; start over with a new room.
                drop(guard);
                self.unlink(room, &session).await;
                continue;
            }

            let snapshot = guard.join(player, sender.clone());
            info!("Player {} joined room {} ({} players)", player.short(), room, guard.player_count());
            guard.broadcast(ServerMessage::State(snapshot.clone()));
            self.release(room, &session, guard).await;
            return Ok(snapshot);
        }
    }

    /// Leave `room`. Tears the room down once empty; otherwise the remaining
    /// members receive a fresh snapshot.
    ///
    /// Returns true if the room was torn down.
    pub async fn leave(&self, room: &str, player: &PlayerId) -> bool {
        let Ok(session) = self.get(room).await else {
            return false;
        };

        let mut guard = session.write().await;
        if guard.leave(player) {
            info!("Player {} left room {}", player.short(), room);
        }
        if !guard.is_empty() {
            let snapshot = guard.snapshot();
            guard.broadcast(ServerMessage::State(snapshot));
        }
        self.release(room, &session, guard).await
    }

    /// Apply a move; accepted moves are broadcast as coordinates.
    pub async fn request_move(
        &self,
        room: &str,
        player: PlayerId,
        row: i64,
        column: i64,
    ) -> Result<MoveOutcome, SessionError> {
        let session = self.get(room).await?;
        let mut guard = session.write().await;
        if guard.state() == SessionState::Closed {
            return Err(SessionError::SessionNotFound(room.to_string()));
        }

        let outcome = guard.request_move(player, row, column)?;
        match &outcome {
            MoveOutcome::Accepted(accepted) => {
                info!(
                    "Room {}: player {} placed at ({}, {}), {} detonations",
                    room,
                    player.short(),
                    row,
                    column,
                    accepted.report.detonation_count()
                );
                guard.broadcast(ServerMessage::AddBomb {
                    row: accepted.position.row as i64,
                    column: accepted.position.column as i64,
                });
            }
            MoveOutcome::Rejected(reason) => {
                debug!("Room {}: move from {} rejected: {:?}", room, player.short(), reason);
            }
        }
        self.release(room, &session, guard).await;
        Ok(outcome)
    }

    /// Send the current snapshot to `player` alone.
    ///
    /// Sent under the session lock so it reflects every move broadcast before it.
    pub async fn request_state(
        &self,
        room: &str,
        player: PlayerId,
    ) -> Result<StateSnapshot, SessionError> {
        let session = self.get(room).await?;
        let mut guard = session.write().await;
        if guard.state() == SessionState::Closed {
            return Err(SessionError::SessionNotFound(room.to_string()));
        }
        if !guard.contains(&player) {
            return Err(SessionError::PlayerNotInSession);
        }

        let snapshot = guard.snapshot();
        guard.send_to(&player, ServerMessage::State(snapshot.clone()));
        self.release(room, &session, guard).await;
        Ok(snapshot)
    }

    /// Registry handle for `room`, creating the session if absent. The
    /// registry lock is released before the caller locks the session.
    async fn get_or_create(&self, room: &str) -> Result<Arc<RwLock<GameSession>>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(room) {
            return Ok(session.clone());
        }

        let session = GameSession::new(room, self.grid).map_err(SessionError::Grid)?;
        let session = Arc::new(RwLock::new(session));
        sessions.insert(room.to_string(), session.clone());
        info!("Room {} created", room);
        Ok(session)
    }

    /// Drop the session lock and unlink the room if it ended up empty.
    ///
    /// Returns true if the room was torn down.
    async fn release(
        &self,
        room: &str,
        session: &Arc<RwLock<GameSession>>,
        guard: RwLockWriteGuard<'_, GameSession>,
    ) -> bool {
        let emptied = guard.is_empty();
        drop(guard);
        emptied && self.unlink(room, session).await
    }

    /// Remove `room` from the registry if it still maps to `session`.
    async fn unlink(&self, room: &str, session: &Arc<RwLock<GameSession>>) -> bool {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(room).is_some_and(|s| Arc::ptr_eq(s, session));
        if current {
            sessions.remove(room);
            info!("Room {} torn down", room);
        }
        current
    }

    /// Get a session by room id.
    pub async fn get(&self, room: &str) -> Result<Arc<RwLock<GameSession>>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(room)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(room.to_string()))
    }

    /// Remove a session regardless of its roster.
    pub async fn remove(&self, room: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(room).is_some()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}
