//! REST history backfill and the per-room message timeline.
//!
//! Joining a room first pulls the stored history over REST, then live
//! `new-message` events take over; [`RoomTimeline`] merges the two
//! without duplicating messages that arrive on both paths.

use std::collections::{HashSet, VecDeque};

use huddle_common::ChatMessage;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Fetch the ordered message history for a room, once, at join time.
pub async fn fetch_history(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    room_id: &str,
) -> Result<Vec<ChatMessage>, HistoryError> {
    let url = format!(
        "{}/api/rooms/{}/messages",
        base_url.trim_end_matches('/'),
        room_id
    );
    let messages = client
        .get(&url)
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(messages)
}

/// Bounded message buffer for one room, de-duplicated by message id.
pub struct RoomTimeline {
    limit: usize,
    seen: HashSet<String>,
    messages: VecDeque<ChatMessage>,
}

impl RoomTimeline {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            seen: HashSet::new(),
            messages: VecDeque::new(),
        }
    }

    /// Seed the timeline with the REST backfill, oldest first.
    pub fn backfill(&mut self, history: Vec<ChatMessage>) {
        for msg in history {
            self.push(msg);
        }
    }

    /// Append a message. Returns false for a duplicate id (e.g. the live
    /// echo of a message the backfill already delivered).
    pub fn push(&mut self, msg: ChatMessage) -> bool {
        if !self.seen.insert(msg.id.clone()) {
            return false;
        }
        if self.messages.len() >= self.limit {
            if let Some(evicted) = self.messages.pop_front() {
                self.seen.remove(&evicted.id);
            }
        }
        self.messages.push_back(msg);
        true
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for RoomTimeline {
    fn default() -> Self {
        Self::new(500)
    }
}
