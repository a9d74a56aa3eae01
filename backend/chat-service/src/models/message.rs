use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserProfile;

/// A persisted direct message. Immutable apart from `is_read`, which only
/// ever goes from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Insertion order, used to break `created_at` ties. Never serialized.
    #[serde(skip)]
    #[sqlx(rename = "seq")]
    pub sequence: i64,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Ordering key for "which came first": timestamp, then insertion order.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.sequence)
    }

    /// The participant that is not `viewer_id`.
    pub fn counterpart_of(&self, viewer_id: Uuid) -> Uuid {
        if self.sender_id == viewer_id {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    pub fn is_unread_for(&self, viewer_id: Uuid) -> bool {
        self.receiver_id == viewer_id && !self.is_read
    }
}

/// Validated input for a new message. `content` is already trimmed.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

/// A message joined with both parties' display names, as sent to clients
/// and to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    pub receiver_name: String,
}

impl MessageView {
    pub fn new(message: Message, sender: &UserProfile, receiver: &UserProfile) -> Self {
        Self {
            message,
            sender_name: sender.display_name().to_string(),
            receiver_name: receiver.display_name().to_string(),
        }
    }
}
