//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections.
//! Each connection joins the room named by its handshake path, receives its
//! player id, and is routed to the room's session until it disconnects.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::grid::{GridConfig, GridError};
use crate::game::state::PlayerId;
use crate::network::protocol::{ClientMessage, ServerMessage, ErrorCode};
use crate::network::session::{MoveOutcome, RoomId, SessionError, SessionManager};

// =============================================================================
// CONFIG
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Grid dimensions for new rooms.
    pub grid: GridConfig,
    /// Room used when the handshake path names none.
    pub default_room: RoomId,
    /// Outbound queue length per connection.
    pub channel_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            grid: GridConfig::default(),
            default_room: "lobby".to_string(),
            channel_capacity: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value could not be parsed or is out of range.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// Grid dimensions are not playable.
    #[error("Invalid grid: {0}")]
    Grid(#[from] GridError),
}

impl ServerConfig {
    /// Defaults overridden by `CHAIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("CHAIN_BIND_ADDR") {
            config.bind_addr = parse_value("CHAIN_BIND_ADDR", value)?;
        }
        if let Some(value) = lookup("CHAIN_MAX_CONNECTIONS") {
            config.max_connections = parse_value("CHAIN_MAX_CONNECTIONS", value)?;
        }
        if let Some(value) = lookup("CHAIN_GRID_ROWS") {
            config.grid.rows = parse_value("CHAIN_GRID_ROWS", value)?;
        }
        if let Some(value) = lookup("CHAIN_GRID_COLUMNS") {
            config.grid.columns = parse_value("CHAIN_GRID_COLUMNS", value)?;
        }
        if let Some(value) = lookup("CHAIN_DEFAULT_ROOM") {
            if value.is_empty() || value.contains('/') {
                return Err(ConfigError::InvalidValue { key: "CHAIN_DEFAULT_ROOM", value });
            }
            config.default_room = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "channel_capacity",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

/// Room id from a handshake path: its first segment, or `default_room`.
pub fn room_from_path(path: &str, default_room: &str) -> RoomId {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(default_room)
        .to_string()
}

// =============================================================================
// SERVER
// =============================================================================

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Connected client state.
struct ConnectedClient {
    player_id: PlayerId,
    room: RoomId,
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Room registry.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            sessions: Arc::new(SessionManager::new(config.grid)),
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server v{} listening on {}", self.config.version, self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        self.config.validate()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut path = String::new();
            let capture_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                path = request.uri().path().to_string();
                Ok(response)
            };

            let ws_stream = match accept_hdr_async(stream, capture_path).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let room = room_from_path(&path, &config.default_room);
            let player_id = PlayerId::random();

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.channel_capacity);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    player_id,
                    room: room.clone(),
                    connected_at: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let _ = msg_tx.send(ServerMessage::Welcome {
                player_id,
                room: room.clone(),
            }).await;

            match sessions.join(&room, player_id, msg_tx.clone()).await {
                Ok(_) => {
                    // Handle incoming messages
                    loop {
                        tokio::select! {
                            msg = ws_receiver.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let client_msg = match ClientMessage::from_json(&text) {
                                            Ok(m) => m,
                                            Err(e) => {
                                                debug!("Invalid message from {}: {}", addr, e);
                                                let _ = msg_tx.send(ServerMessage::error(
                                                    ErrorCode::InvalidMessage,
                                                    "Invalid message format",
                                                )).await;
                                                continue;
                                            }
                                        };

                                        let member = Self::handle_client_message(
                                            &room,
                                            player_id,
                                            client_msg,
                                            &sessions,
                                            &msg_tx,
                                        ).await;
                                        if !member {
                                            info!("Player {} no longer in room {}, closing {}", player_id.short(), room, addr);
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        debug!("Client {} disconnected", addr);
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        warn!("WebSocket error for {}: {}", addr, e);
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                let _ = msg_tx.send(ServerMessage::Shutdown {
                                    reason: "Server shutting down".to_string(),
                                }).await;
                                break;
                            }
                        }
                    }

                    sessions.leave(&room, &player_id).await;
                }
                Err(e) => {
                    error!("Player {} could not join room {}: {}", player_id.short(), room, e);
                    let _ = msg_tx.send(e.to_message()).await;
                }
            }

            // The writer drains and closes once the last sender is gone.
            drop(msg_tx);
            let _ = sender_task.await;

            // Remove client
            let removed = clients.write().await.remove(&addr);
            if let Some(client) = removed {
                info!(
                    "Client {} ({} in room {}) cleaned up after {:?}",
                    addr,
                    client.player_id.short(),
                    client.room,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle a client message.
    ///
    /// Returns false once the player is no longer a member of the room, e.g.
    /// after being evicted for a stalled outbound queue.
    async fn handle_client_message(
        room: &str,
        player_id: PlayerId,
        msg: ClientMessage,
        sessions: &SessionManager,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> bool {
        let result = match msg {
            ClientMessage::AddBomb { row, column } => sessions
                .request_move(room, player_id, row, column)
                .await
                .map(|outcome| {
                    if let MoveOutcome::Accepted(accepted) = outcome {
                        if let Some(winner) = accepted.winner {
                            info!("Room {} won by {}", room, winner.short());
                        }
                    }
                }),
            ClientMessage::GetState => sessions
                .request_state(room, player_id)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Request from {} in room {} failed: {}", player_id.short(), room, e);
                let _ = sender.try_send(e.to_message());
                !matches!(e, SessionError::PlayerNotInSession | SessionError::SessionNotFound(_))
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Room registry.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}
