//! Room membership and presence.
//!
//! Rooms are created implicitly on first join and dropped when their last
//! member leaves; membership is the only room state. All membership
//! mutations and the presence broadcasts they trigger run under one lock,
//! so every `user-list` a room's members receive reflects the set after
//! the triggering change (never a stale snapshot) and broadcasts for a
//! room are totally ordered.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::debug;

use huddle_common::{ConnectionId, PresenceEntry, ServerFrame};

use crate::registry::ConnectionRegistry;

pub struct RoomManager {
    registry: ConnectionRegistry,
    rooms: Mutex<HashMap<String, HashSet<ConnectionId>>>,
}

impl RoomManager {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Add `conn` to a room and broadcast the updated presence list.
    /// Joining a room twice has no additional effect.
    pub async fn join(&self, conn: &ConnectionId, room_id: &str) {
        let mut rooms = self.rooms.lock().await;
        let members = rooms.entry(room_id.to_string()).or_default();
        if !members.insert(conn.clone()) {
            return;
        }
        debug!(%conn, room = room_id, members = members.len(), "joined room");
        self.broadcast_presence(room_id, members).await;
    }

    /// Remove `conn` from a room (no-op when absent) and rebroadcast
    /// presence to the remaining members. Empty rooms are dropped.
    pub async fn leave(&self, conn: &ConnectionId, room_id: &str) {
        let mut rooms = self.rooms.lock().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return;
        };
        if !members.remove(conn) {
            return;
        }
        debug!(%conn, room = room_id, members = members.len(), "left room");
        if members.is_empty() {
            rooms.remove(room_id);
            return;
        }
        self.broadcast_presence(room_id, members).await;
    }

    /// Remove a closed connection from every room it belonged to,
    /// rebroadcasting presence in each. Called by the connection task
    /// after the registry eviction.
    pub async fn drop_connection(&self, conn: &ConnectionId) {
        let mut rooms = self.rooms.lock().await;
        let mut emptied = Vec::new();
        for (room_id, members) in rooms.iter_mut() {
            if !members.remove(conn) {
                continue;
            }
            if members.is_empty() {
                emptied.push(room_id.clone());
            } else {
                self.broadcast_presence(room_id, members).await;
            }
        }
        for room_id in emptied {
            rooms.remove(&room_id);
        }
    }

    /// Current member set of a room, if it exists.
    pub async fn members_of(&self, room_id: &str) -> Option<HashSet<ConnectionId>> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    /// Number of live (non-empty) rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Push the room's presence list to every member's outbound queue.
    /// Runs under the rooms lock; identities come from the registry, which
    /// silently skips connections that closed since the set was mutated.
    async fn broadcast_presence(&self, room_id: &str, members: &HashSet<ConnectionId>) {
        let peers = self.registry.resolve_members(members).await;
        let users: Vec<PresenceEntry> = peers
            .iter()
            .map(|(id, peer)| PresenceEntry::new(id.clone(), &peer.identity))
            .collect();
        let frame = ServerFrame::UserList {
            room_id: room_id.to_string(),
            users,
        };
        for (_, peer) in &peers {
            let _ = peer.tx.send(frame.clone());
        }
    }
}
