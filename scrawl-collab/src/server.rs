//! WebSocket gateway with board-scoped event routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── BoardRoom (board_id) ── members + BoardHistory
//! Client B ──┘            │
//!                         │ broadcast channel (one per board)
//!              ┌──────────┼───────────┐
//!              ▼          ▼           ▼
//!           Client A   Client B    Client C
//! ```
//!
//! Each connection runs one task that owns both halves of the socket: a
//! `select!` pump over inbound frames and the joined board's event
//! receiver. A connection's lifecycle is
//! `Connecting → Authenticated → Joined(board) → Disconnected`; joining a
//! different board repeats the join protocol and leaves the old board
//! first, and teardown on any exit path removes the connection from its
//! board.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use scrawl_core::StrokeInput;

use crate::auth::IdentityProvider;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::rooms::{AppendError, BoardEvent, BoardRoom, Envelope, JoinError, RoomConfig, RoomRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum members per board
    pub max_members_per_board: usize,
    /// Broadcast channel capacity per board
    pub broadcast_capacity: usize,
    /// Drop board state when the last member leaves
    pub evict_empty_boards: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_members_per_board: 100,
            broadcast_capacity: 256,
            evict_empty_boards: true,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_strokes: u64,
    pub active_boards: usize,
}

/// Authenticated connection identity.
struct Session {
    connection_id: Uuid,
    principal: Uuid,
    display_name: String,
}

/// The board the connection is currently joined to. `epoch` is the
/// session's last-known clear-epoch: set by the join snapshot, advanced
/// by its own clears and by clear events observed on the pump. Strokes
/// are appended against it, so a stroke racing someone else's clear
/// fails the epoch check and is dropped.
struct ActiveBoard {
    board_id: String,
    epoch: u64,
    room: Arc<BoardRoom>,
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// The synchronization gateway.
pub struct BoardServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    auth: Arc<dyn IdentityProvider>,
    stats: Arc<RwLock<ServerStats>>,
}

impl BoardServer {
    /// Create a new server with the given configuration and identity
    /// provider.
    pub fn new(config: ServerConfig, auth: Arc<dyn IdentityProvider>) -> Self {
        let registry = Arc::new(RoomRegistry::new(RoomConfig {
            broadcast_capacity: config.broadcast_capacity,
            max_members_per_board: config.max_members_per_board,
            evict_empty_boards: config.evict_empty_boards,
        }));
        Self {
            config,
            registry,
            auth,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("board server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = self.registry.clone();
            let auth = self.auth.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, auth, stats).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to teardown.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        auth: Arc<dyn IdentityProvider>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Connection state: None until the Hello handshake succeeds, then
        // Authenticated; `joined`/`board_rx` hold the Joined state.
        let mut session: Option<Session> = None;
        let mut joined: Option<ActiveBoard> = None;
        let mut board_rx: Option<broadcast::Receiver<Arc<Envelope>>> = None;

        loop {
            tokio::select! {
                // Inbound WebSocket frame
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let client_msg = match ClientMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("undecodable frame from {addr}: {e}");
                                    continue;
                                }
                            };
                            stats.write().await.total_messages += 1;

                            match client_msg {
                                ClientMessage::Hello { token, display_name } => {
                                    if session.is_some() {
                                        log::warn!("duplicate Hello from {addr}, ignoring");
                                        continue;
                                    }
                                    match auth.validate(&token) {
                                        Ok(principal) => {
                                            let connection_id = Uuid::new_v4();
                                            log::info!(
                                                "{display_name} ({principal}) authenticated \
                                                 as connection {connection_id}"
                                            );
                                            session = Some(Session {
                                                connection_id,
                                                principal,
                                                display_name,
                                            });
                                            if !send_frame(
                                                &mut ws_sender,
                                                &ServerMessage::Welcome { connection_id },
                                            )
                                            .await
                                            {
                                                break;
                                            }
                                        }
                                        Err(e) => {
                                            log::warn!("auth failed for {addr}: {e}");
                                            let _ = send_frame(
                                                &mut ws_sender,
                                                &ServerMessage::Rejected {
                                                    reason: e.to_string(),
                                                },
                                            )
                                            .await;
                                            break;
                                        }
                                    }
                                }

                                _ if session.is_none() => {
                                    log::warn!("frame before Hello from {addr}, closing");
                                    let _ = send_frame(
                                        &mut ws_sender,
                                        &ServerMessage::Rejected {
                                            reason: "authentication required".to_string(),
                                        },
                                    )
                                    .await;
                                    break;
                                }

                                ClientMessage::JoinBoard { board_id } => {
                                    let Some(sess) = session.as_ref() else { continue };
                                    match registry.join(sess.connection_id, &board_id).await {
                                        Ok(j) => {
                                            // History must reach the client
                                            // before any live event; events
                                            // arriving meanwhile wait in the
                                            // receiver, which the pump only
                                            // polls from the next iteration.
                                            let load = ServerMessage::LoadDrawings {
                                                board_id: j.board_id.clone(),
                                                epoch: j.epoch,
                                                strokes: j.strokes,
                                            };
                                            if !send_frame(&mut ws_sender, &load).await {
                                                break;
                                            }
                                            log::info!(
                                                "{} joined board {} ({} members)",
                                                sess.display_name,
                                                j.board_id,
                                                j.members.len()
                                            );
                                            joined = Some(ActiveBoard {
                                                board_id: j.board_id,
                                                epoch: j.epoch,
                                                room: j.room,
                                            });
                                            board_rx = Some(j.events);
                                            stats.write().await.active_boards =
                                                registry.board_count().await;
                                        }
                                        Err(e @ JoinError::BoardFull { .. }) => {
                                            // The prior board was already left
                                            // (join removes the old membership
                                            // first), so fall back to the
                                            // authenticated-but-unjoined state.
                                            joined = None;
                                            board_rx = None;
                                            log::warn!("join refused for {addr}: {e}");
                                            if !send_frame(
                                                &mut ws_sender,
                                                &ServerMessage::Rejected {
                                                    reason: e.to_string(),
                                                },
                                            )
                                            .await
                                            {
                                                break;
                                            }
                                        }
                                    }
                                }

                                ClientMessage::Drawing { board_id, path, color, width } => {
                                    let Some(sess) = session.as_ref() else { continue };
                                    let Some(j) = joined.as_ref().filter(|j| j.board_id == board_id)
                                    else {
                                        log::debug!(
                                            "stroke for non-joined board {board_id} from \
                                             {addr}, dropped"
                                        );
                                        continue;
                                    };
                                    let input = StrokeInput { path, color, width };
                                    match j.room.append_stroke(sess.connection_id, j.epoch, input).await {
                                        Ok(_) => {
                                            stats.write().await.total_strokes += 1;
                                        }
                                        Err(AppendError::Stale(e)) => {
                                            // Recoverable: the clear that made
                                            // this stroke stale is already on
                                            // its way to the client.
                                            log::debug!("stale stroke from {addr} dropped: {e}");
                                        }
                                        Err(AppendError::NotAMember) => {
                                            log::debug!("stroke from non-member {addr} dropped");
                                        }
                                    }
                                }

                                ClientMessage::ClearCanvas { board_id } => {
                                    let Some(sess) = session.as_ref() else { continue };
                                    let Some(j) = joined.as_mut().filter(|j| j.board_id == board_id)
                                    else {
                                        log::debug!(
                                            "clear for non-joined board {board_id} from \
                                             {addr}, dropped"
                                        );
                                        continue;
                                    };
                                    if let Some(epoch) = j.room.clear(sess.connection_id).await {
                                        j.epoch = epoch;
                                        log::info!(
                                            "board {} cleared by {}, epoch {epoch}",
                                            j.board_id,
                                            sess.display_name
                                        );
                                    }
                                }

                                ClientMessage::Ping => {
                                    if !send_frame(&mut ws_sender, &ServerMessage::Pong).await {
                                        break;
                                    }
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Live event from the joined board
                envelope = async {
                    if let Some(ref mut rx) = board_rx {
                        rx.recv().await
                    } else {
                        // Not joined yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match envelope {
                        Ok(envelope) => {
                            let Some(sess) = session.as_ref() else { continue };
                            // Self-originated events are not echoed back.
                            if envelope.origin == sess.connection_id {
                                continue;
                            }
                            let outbound = match &envelope.event {
                                BoardEvent::Stroke(record) => ServerMessage::Drawing {
                                    board_id: envelope.board_id.clone(),
                                    stroke: record.clone(),
                                },
                                BoardEvent::Cleared { epoch } => {
                                    if let Some(j) = joined.as_mut() {
                                        j.epoch = *epoch;
                                    }
                                    ServerMessage::ClearCanvas {
                                        board_id: envelope.board_id.clone(),
                                        epoch: *epoch,
                                    }
                                }
                                BoardEvent::MemberJoined { connection_id } => {
                                    ServerMessage::MemberJoined {
                                        board_id: envelope.board_id.clone(),
                                        connection_id: *connection_id,
                                    }
                                }
                                BoardEvent::MemberLeft { connection_id } => {
                                    ServerMessage::MemberLeft {
                                        board_id: envelope.board_id.clone(),
                                        connection_id: *connection_id,
                                    }
                                }
                            };
                            if !send_frame(&mut ws_sender, &outbound).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("connection {addr} lagged by {n} board events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            board_rx = None;
                        }
                    }
                }
            }
        }

        // Teardown: leave the board (idempotent, also runs on error paths)
        // and release per-connection state.
        if let Some(sess) = &session {
            registry.leave(sess.connection_id).await;
            log::info!(
                "connection {} ({}) disconnected",
                sess.connection_id,
                sess.principal
            );
        }
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_boards = registry.board_count().await;
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}

/// Encode and send one frame. Returns false when the transport is gone
/// and the caller should tear the connection down.
async fn send_frame(sender: &mut WsSink, msg: &ServerMessage) -> bool {
    let bytes = match msg.encode() {
        Ok(b) => b,
        Err(e) => {
            log::error!("failed to encode outbound frame: {e}");
            return true;
        }
    };
    sender.send(Message::Binary(bytes.into())).await.is_ok()
}
