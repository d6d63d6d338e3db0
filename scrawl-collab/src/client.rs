//! WebSocket client for connecting to the board server.
//!
//! Provides:
//! - Connection lifecycle (connect, authenticate, disconnect)
//! - Board join with history replay
//! - Stroke and clear send/receive
//!
//! Reconnection is the caller's concern: on [`ClientEvent::Disconnected`],
//! connect again and re-join the board. Every board operation on the
//! server is atomic, so there is nothing to retry here.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use scrawl_core::{Point, StrokeRecord};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the board client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake accepted; the server-assigned session id
    Connected { connection_id: Uuid },
    /// Handshake or join refused by the server
    Rejected { reason: String },
    /// Board history replay, delivered once after each join
    HistoryLoaded {
        board_id: String,
        epoch: u64,
        strokes: Vec<StrokeRecord>,
    },
    /// Another member drew a stroke
    RemoteStroke {
        board_id: String,
        stroke: StrokeRecord,
    },
    /// Another member cleared the board
    BoardCleared { board_id: String, epoch: u64 },
    /// Another member joined the board
    MemberJoined {
        board_id: String,
        connection_id: Uuid,
    },
    /// A member left the board
    MemberLeft {
        board_id: String,
        connection_id: Uuid,
    },
    /// Connection lost
    Disconnected,
}

/// The board client.
///
/// Manages a WebSocket connection to the board server: performs the
/// Hello/Welcome handshake, then exposes joins, strokes, and clears, with
/// server events surfaced on an mpsc channel.
pub struct BoardClient {
    /// Display name sent in the handshake
    display_name: String,

    /// Externally-issued identity token
    token: Vec<u8>,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Session id assigned by the server on Welcome
    connection_id: Arc<RwLock<Option<Uuid>>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<ClientEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<ClientEvent>,

    /// Server URL
    server_url: String,
}

impl BoardClient {
    /// Create a new client with the given identity.
    pub fn new(
        display_name: impl Into<String>,
        token: Vec<u8>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            display_name: display_name.into(),
            token,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connection_id: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and send the authentication handshake.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    /// The handshake outcome arrives as [`ClientEvent::Connected`] or
    /// [`ClientEvent::Rejected`]; frames sent before the outcome are
    /// processed by the server in order, after the handshake.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((stream, _)) => stream,
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the WebSocket.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            // The client went away (disconnect or drop); tell the server
            // so it can run its leave path promptly.
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        // First frame: authentication handshake.
        let hello = ClientMessage::Hello {
            token: self.token.clone(),
            display_name: self.display_name.clone(),
        };
        self.send(hello).await?;

        // Reader task: surface server frames as events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let connection_id = self.connection_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let server_msg = match ServerMessage::decode(&bytes) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("undecodable server frame: {e}");
                                continue;
                            }
                        };

                        let event = match server_msg {
                            ServerMessage::Welcome { connection_id: id } => {
                                *state.write().await = ConnectionState::Connected;
                                *connection_id.write().await = Some(id);
                                Some(ClientEvent::Connected { connection_id: id })
                            }
                            ServerMessage::Rejected { reason } => {
                                Some(ClientEvent::Rejected { reason })
                            }
                            ServerMessage::LoadDrawings {
                                board_id,
                                epoch,
                                strokes,
                            } => Some(ClientEvent::HistoryLoaded {
                                board_id,
                                epoch,
                                strokes,
                            }),
                            ServerMessage::Drawing { board_id, stroke } => {
                                Some(ClientEvent::RemoteStroke { board_id, stroke })
                            }
                            ServerMessage::ClearCanvas { board_id, epoch } => {
                                Some(ClientEvent::BoardCleared { board_id, epoch })
                            }
                            ServerMessage::MemberJoined {
                                board_id,
                                connection_id,
                            } => Some(ClientEvent::MemberJoined {
                                board_id,
                                connection_id,
                            }),
                            ServerMessage::MemberLeft {
                                board_id,
                                connection_id,
                            } => Some(ClientEvent::MemberLeft {
                                board_id,
                                connection_id,
                            }),
                            ServerMessage::Pong => None,
                        };

                        if let Some(event) = event {
                            let _ = event_tx.send(event).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            *connection_id.write().await = None;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Join a board. The server replies with `HistoryLoaded` before any
    /// live event for that board; joining another board leaves this one.
    pub async fn join_board(&self, board_id: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientMessage::JoinBoard {
            board_id: board_id.into(),
        })
        .await
    }

    /// Send a completed stroke for the given board.
    pub async fn send_stroke(
        &self,
        board_id: impl Into<String>,
        path: Vec<Point>,
        color: [f32; 4],
        width: f32,
    ) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Drawing {
            board_id: board_id.into(),
            path,
            color,
            width,
        })
        .await
    }

    /// Clear the given board for everyone.
    pub async fn clear_board(&self, board_id: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientMessage::ClearCanvas {
            board_id: board_id.into(),
        })
        .await
    }

    /// Send a heartbeat ping.
    pub async fn ping(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Ping).await
    }

    /// Close the connection. Safe to call in any state; the server-side
    /// leave runs when the close frame arrives.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the server-assigned session id, once Welcome has arrived.
    pub async fn connection_id(&self) -> Option<Uuid> {
        *self.connection_id.read().await
    }

    /// Get the display name used in the handshake.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = BoardClient::new("Alice", b"token".to_vec(), "ws://localhost:9090");
        assert_eq!(client.display_name(), "Alice");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = BoardClient::new("Alice", b"token".to_vec(), "ws://localhost:9090");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.connection_id().await, None);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = BoardClient::new("Alice", b"token".to_vec(), "ws://localhost:9090");
        let result = client.join_board("1").await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = BoardClient::new("Alice", b"token".to_vec(), "ws://localhost:9090");

        // First take should succeed
        assert!(client.take_event_rx().is_some());
        // Second take should return None
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let mut client = BoardClient::new("Alice", b"token".to_vec(), "ws://127.0.0.1:1");
        let result = client.connect().await;
        assert!(result.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
