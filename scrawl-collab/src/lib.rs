//! # scrawl-collab — Real-time board synchronization for Scrawl
//!
//! Provides WebSocket-based multiplayer drawing: ordered fan-out of stroke
//! and clear events per board, with consistent history replay for joiners.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ BoardClient │ ◄─────────────────► │ BoardServer  │
//! │ (per user)  │     Binary Proto    │ (gateway)    │
//! └─────────────┘                     └──────┬───────┘
//!                                            │
//!                                    ┌───────┴────────┐
//!                                    │ RoomRegistry   │
//!                                    │ (board lookup) │
//!                                    └───────┬────────┘
//!                                            │ per board
//!                                    ┌───────┴────────┐
//!                                    │ BoardRoom      │
//!                                    │ members +      │
//!                                    │ BoardHistory + │
//!                                    │ event channel  │
//!                                    └────────────────┘
//! ```
//!
//! Each board room maintains:
//! - The board's `BoardHistory` (append-only stroke log, clear-epoch)
//! - The current member set
//! - A broadcast channel for fan-out to connected members
//!
//! All three live behind one per-board mutex, so publishes to the same
//! board are serialized (per-board total order) while different boards
//! proceed independently.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded tagged messages)
//! - [`rooms`] — Board membership, history, and ordered fan-out
//! - [`auth`] — Identity-token validation seam
//! - [`server`] — WebSocket gateway
//! - [`client`] — WebSocket sync client

pub mod protocol;
pub mod rooms;
pub mod auth;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use rooms::{
    AppendError, BoardEvent, BoardRoom, Envelope, JoinError, JoinedBoard, RoomConfig,
    RoomRegistry,
};
pub use auth::{AuthConfig, AuthError, HmacTokenValidator, IdentityProvider, StaticTokenValidator};
pub use server::{BoardServer, ServerConfig, ServerStats};
pub use client::{BoardClient, ClientEvent, ConnectionState};
