use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Message, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: Uuid,
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self {
            content: m.content.clone(),
            created_at: m.created_at,
            sender_id: m.sender_id,
        }
    }
}

/// One row of the conversation list. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub user_id: Uuid,
    pub username: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub last_message: LastMessage,
    pub unread_count: i64,
}

impl ConversationSummary {
    pub fn new(counterpart: &UserProfile, last: &Message, unread_count: i64) -> Self {
        Self {
            user_id: counterpart.id,
            username: counterpart.username.clone(),
            name: Some(counterpart.display_name().to_string()),
            avatar: counterpart.avatar.clone(),
            last_message: LastMessage::from(last),
            unread_count,
        }
    }
}
