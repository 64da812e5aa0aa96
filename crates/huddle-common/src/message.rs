use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserSummary;

/// A chat message as persisted and as delivered in `new-message` frames.
///
/// `seq` is assigned by the message store at append time; history replay
/// order follows `seq`, and live fan-out never reorders relative to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub seq: u64,
    pub room_id: String,
    pub from: UserSummary,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
