//! WebSocket Participant Client
//!
//! Connects to a room, keeps a [`Replica`] in step with the broadcasts and
//! re-requests a snapshot after every replayed move.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::game::cascade::DetonationObserver;
use crate::game::events::CascadeReport;
use crate::game::state::PlayerId;
use crate::network::protocol::{ClientMessage, ServerError, ServerMessage};
use crate::network::replica::{Replica, ReplicaError, SnapshotApplied};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Replica rejected a snapshot or a move.
    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),
}

/// What one server message did to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Identity assigned by the server.
    Welcome {
        /// Own player id.
        player_id: PlayerId,
        /// Joined room.
        room: String,
    },
    /// Snapshot applied to the replica.
    State(SnapshotApplied),
    /// Broadcast move replayed on the replica.
    Move(CascadeReport),
    /// Server reported an error.
    Error(ServerError),
    /// Server is shutting down.
    Shutdown {
        /// Reason given by the server.
        reason: String,
    },
}

/// A connected participant.
pub struct ParticipantClient {
    stream: WsStream,
    replica: Replica,
    player_id: Option<PlayerId>,
    room: Option<String>,
}

impl ParticipantClient {
    /// Connect to `url`, e.g. `ws://127.0.0.1:8080/lobby`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url).await?;
        info!("Connected to {}", url);

        Ok(Self {
            stream,
            replica: Replica::new(),
            player_id: None,
            room: None,
        })
    }

    /// Own player id, once welcomed.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    /// Joined room, once welcomed.
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Local replica.
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Whether the replica expects this client to move next.
    pub fn is_my_turn(&self) -> bool {
        self.player_id.is_some() && self.replica.current_player() == self.player_id
    }

    /// Send a message to the server.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = message.to_json()?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Request a bomb placement.
    pub async fn add_bomb(&mut self, row: i64, column: i64) -> Result<(), ClientError> {
        self.send(&ClientMessage::AddBomb { row, column }).await
    }

    /// Request a full snapshot.
    pub async fn request_state(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::GetState).await
    }

    /// Wait for the next server message.
    pub async fn next_message(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                    Ok(message) => return Ok(message),
                    Err(e) => warn!("Failed to parse server message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Wait for the next server message and apply it.
    ///
    /// A broadcast move is replayed in staged mode through `observer`, then a
    /// fresh snapshot is requested. The snapshot is requested even when the
    /// replay fails, since it is the only way back in step.
    pub async fn next_event<O>(&mut self, observer: &mut O) -> Result<ClientEvent, ClientError>
    where
        O: DetonationObserver,
    {
        match self.next_message().await? {
            ServerMessage::Welcome { player_id, room } => {
                info!("Joined room {} as {}", room, player_id.short());
                self.player_id = Some(player_id);
                self.room = Some(room.clone());
                Ok(ClientEvent::Welcome { player_id, room })
            }
            ServerMessage::State(snapshot) => {
                let applied = self.replica.apply_snapshot(&snapshot)?;
                Ok(ClientEvent::State(applied))
            }
            ServerMessage::AddBomb { row, column } => {
                let replayed = self.replica.apply_move(row, column, observer).await;
                self.request_state().await?;
                let report = replayed?;
                debug!("Replayed move ({}, {})", row, column);
                Ok(ClientEvent::Move(report))
            }
            ServerMessage::Error(error) => {
                warn!("Server error {:?}: {}", error.code, error.message);
                Ok(ClientEvent::Error(error))
            }
            ServerMessage::Shutdown { reason } => Ok(ClientEvent::Shutdown { reason }),
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
