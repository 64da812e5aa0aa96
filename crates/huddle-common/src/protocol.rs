//! Wire protocol for the persistent client ⇄ server connection.
//!
//! Frames are JSON text messages tagged `{"type": ..., "payload": ...}`.
//! Room events (`user-list`, `new-message`) are broadcast to room members;
//! signaling frames (`offer`, `answer`, `ice-candidate`) are addressed to a
//! single connection id and forwarded without payload inspection.

use serde::{Deserialize, Serialize};

use crate::id::ConnectionId;
use crate::identity::{Identity, UserSummary};
use crate::message::ChatMessage;

/// Messages a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Bind an identity to this connection. Must be the first frame.
    Auth { token: String },

    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    SendMessage { room_id: String, text: String },

    /// SDP offer addressed to one live connection.
    Offer { target: ConnectionId, sdp: String },
    /// SDP answer addressed to one live connection.
    Answer { target: ConnectionId, sdp: String },
    /// ICE candidate addressed to one live connection.
    IceCandidate {
        target: ConnectionId,
        candidate: String,
    },
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Auth handshake acknowledgment, carrying this connection's id so the
    /// client can be targeted by (and can compare against) signaling frames.
    AuthSuccess {
        connection_id: ConnectionId,
        user: Identity,
    },

    /// Presence snapshot for one room, sent after every membership change.
    UserList {
        room_id: String,
        users: Vec<PresenceEntry>,
    },

    NewMessage(ChatMessage),

    /// Forwarded offer; `from` is the source connection id to answer to.
    Offer {
        from: ConnectionId,
        from_user: UserSummary,
        sdp: String,
    },
    Answer {
        from: ConnectionId,
        from_user: UserSummary,
        sdp: String,
    },
    IceCandidate {
        from: ConnectionId,
        candidate: String,
    },

    Error { code: ErrorCode, message: String },
}

/// One member of a room's presence list. Carries the connection id so a
/// caller can designate exactly which peer it is negotiating with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub connection_id: ConnectionId,
    pub name: String,
    pub email: String,
}

impl PresenceEntry {
    pub fn new(connection_id: ConnectionId, identity: &Identity) -> Self {
        Self {
            connection_id,
            name: identity.name.clone(),
            email: identity.email.clone(),
        }
    }
}

/// Machine-readable error codes carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthorized,
    NotInRoom,
    UnknownTarget,
    BadRequest,
}
