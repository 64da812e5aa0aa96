//! Chat relay: append to the message store, then fan out to the room.
//!
//! The sender's own echo rides the same fan-out as everyone else's copy,
//! so clients never need an optimistic local duplicate.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use huddle_common::{ChatMessage, ConnectionId, RelayError, ServerFrame, StoreError};

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomManager;
use crate::store::MessageStore;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn code(&self) -> huddle_common::ErrorCode {
        match self {
            ChatError::Relay(e) => e.code(),
            ChatError::Store(_) => huddle_common::ErrorCode::BadRequest,
        }
    }
}

pub struct ChatRelay {
    registry: ConnectionRegistry,
    rooms: Arc<RoomManager>,
    store: Arc<dyn MessageStore>,
    /// Serializes accept → append → fan-out, so store sequence order and
    /// every member's delivery order agree across concurrent senders.
    order: Mutex<()>,
}

impl ChatRelay {
    pub fn new(
        registry: ConnectionRegistry,
        rooms: Arc<RoomManager>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            rooms,
            store,
            order: Mutex::new(()),
        }
    }

    /// Accept a message from `conn` for `room_id`: membership check,
    /// store append, then fan-out to every current member (sender
    /// included) in accept order.
    pub async fn send(
        &self,
        conn: &ConnectionId,
        room_id: &str,
        text: String,
    ) -> Result<ChatMessage, ChatError> {
        let _order = self.order.lock().await;

        let members = self.rooms.members_of(room_id).await.unwrap_or_default();
        if !members.contains(conn) {
            return Err(RelayError::NotInRoom(room_id.to_string()).into());
        }
        let sender = self
            .registry
            .resolve(conn)
            .await
            .ok_or(RelayError::Unauthorized)?;

        let msg = self
            .store
            .append(room_id, sender.identity.summary(), text)
            .await?;

        let frame = ServerFrame::NewMessage(msg.clone());
        let peers = self.registry.resolve_members(&members).await;
        for (_, peer) in &peers {
            let _ = peer.tx.send(frame.clone());
        }
        debug!(room = room_id, seq = msg.seq, recipients = peers.len(), "chat fan-out");
        Ok(msg)
    }
}
