//! huddle-server: WebSocket signaling and presence server.
//!
//! Accepts persistent client connections, binds each to an authenticated
//! identity, tracks room membership and presence, fans chat out to room
//! members, and forwards call-setup envelopes (offer/answer/ICE candidate)
//! between individual connections. The server never inspects signaling
//! payloads; media flows peer-to-peer once negotiation completes.

pub mod auth;
pub mod chat;
pub mod config;
pub mod connection;
pub mod registry;
pub mod rooms;
pub mod signaling;
pub mod store;

pub use auth::{InMemoryTokenVerifier, TokenVerifier};
pub use chat::{ChatError, ChatRelay};
pub use config::{ConfigError, ServerConfig, UserEntry};
pub use connection::{handle_connection, ServerState};
pub use registry::{ConnectionRegistry, Peer};
pub use rooms::RoomManager;
pub use signaling::{Envelope, SignalingRelay};
pub use store::{MemoryStore, MessageStore};
