//! Binary wire protocol for board synchronization.
//!
//! Messages are explicit tagged variants (one case per event), serialized
//! with bincode for minimal overhead and validated at the gateway boundary
//! before dispatch. The transport is assumed to be an ordered,
//! message-framed channel per connection; no re-sequencing happens here.

use scrawl_core::{Point, StrokeRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent by a client to the gateway.
///
/// `Hello` must be the first frame on a connection; everything else
/// requires an authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMessage {
    /// Authentication handshake carrying an externally-issued token.
    Hello {
        token: Vec<u8>,
        display_name: String,
    },
    /// Join a board, implicitly leaving the current one.
    JoinBoard { board_id: String },
    /// A completed freehand stroke for the given board.
    Drawing {
        board_id: String,
        path: Vec<Point>,
        /// RGBA color
        color: [f32; 4],
        width: f32,
    },
    /// Wipe the board and start a new epoch.
    ClearCanvas { board_id: String },
    /// Heartbeat.
    Ping,
}

/// Messages sent by the gateway to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted; the session id for this connection.
    Welcome { connection_id: Uuid },
    /// Handshake or join refused. The connection closes after an
    /// authentication rejection but stays open after a full-board one.
    Rejected { reason: String },
    /// Full board history, delivered once immediately after a join and
    /// always before any live event for that board.
    LoadDrawings {
        board_id: String,
        epoch: u64,
        strokes: Vec<StrokeRecord>,
    },
    /// Another member appended a stroke.
    Drawing {
        board_id: String,
        stroke: StrokeRecord,
    },
    /// Another member cleared the board.
    ClearCanvas { board_id: String, epoch: u64 },
    /// Another member joined the board.
    MemberJoined {
        board_id: String,
        connection_id: Uuid,
    },
    /// A member left the board.
    MemberLeft {
        board_id: String,
        connection_id: Uuid,
    },
    /// Heartbeat reply.
    Pong,
}

impl ClientMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

impl ServerMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    HandshakeRejected(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::HandshakeRejected(reason) => write!(f, "Handshake rejected: {reason}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
