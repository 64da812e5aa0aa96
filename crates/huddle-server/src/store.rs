//! Message store boundary.
//!
//! Chat history persistence is an external collaborator; the relay only
//! needs append and ordered replay. [`MemoryStore`] keeps a bounded
//! per-room buffer so memory usage stays predictable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use huddle_common::{new_id, ChatMessage, StoreError, UserSummary};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id, sequence number, and timestamp.
    /// Sequence order is authoritative for history replay.
    async fn append(
        &self,
        room_id: &str,
        from: UserSummary,
        text: String,
    ) -> Result<ChatMessage, StoreError>;

    /// Ordered history for a room, ascending by sequence.
    async fn history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError>;
}

/// In-memory store with a per-room ring buffer.
pub struct MemoryStore {
    limit: usize,
    next_seq: AtomicU64,
    rooms: Mutex<HashMap<String, VecDeque<ChatMessage>>>,
}

impl MemoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            next_seq: AtomicU64::new(1),
            rooms: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(
        &self,
        room_id: &str,
        from: UserSummary,
        text: String,
    ) -> Result<ChatMessage, StoreError> {
        let msg = ChatMessage {
            id: new_id(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            room_id: room_id.to_string(),
            from,
            text,
            created_at: Utc::now(),
        };

        let mut rooms = self.rooms.lock().await;
        let buf = rooms.entry(room_id.to_string()).or_default();
        if buf.len() >= self.limit {
            buf.pop_front();
        }
        buf.push_back(msg.clone());
        Ok(msg)
    }

    async fn history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms
            .get(room_id)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default())
    }
}
