//! Real-time event wire format.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageView;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartPayload {
    pub other_user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub receiver_id: Uuid,
    pub is_typing: bool,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    JoinChat(CounterpartPayload),
    MarkAsRead(CounterpartPayload),
    Typing(TypingPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::JoinChat(_) => "joinChat",
            ClientEvent::MarkAsRead(_) => "markAsRead",
            ClientEvent::Typing(_) => "typing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub read_by: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub user_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

/// Events pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Delivery confirmation to the sender's own session
    MessageReceived(MessageView),
    /// A new message for the receiver
    NewMessage(MessageView),
    ChatHistory(Vec<MessageView>),
    MessagesRead(MessagesReadPayload),
    UserTyping(UserTypingPayload),
    UserOnline(Uuid),
    UserOffline(Uuid),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
            code: code.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_events_parse() {
        let receiver = Uuid::new_v4();
        let raw = json!({
            "event": "sendMessage",
            "data": {"receiverId": receiver, "content": "hi"}
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                receiver_id: receiver,
                content: "hi".into()
            })
        );

        let raw = json!({"event": "typing", "data": {"receiverId": receiver, "isTyping": true}});
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.name(), "typing");

        let raw = json!({"event": "joinChat", "data": {"otherUserId": receiver}});
        assert!(matches!(
            serde_json::from_value::<ClientEvent>(raw).unwrap(),
            ClientEvent::JoinChat(CounterpartPayload { other_user_id }) if other_user_id == receiver
        ));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = json!({"event": "deleteMessage", "data": {}});
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_server_event_shapes() {
        let user = Uuid::new_v4();

        let online = serde_json::to_value(ServerEvent::UserOnline(user)).unwrap();
        assert_eq!(online, json!({"event": "userOnline", "data": user.to_string()}));

        let read = serde_json::to_value(ServerEvent::MessagesRead(MessagesReadPayload {
            read_by: user,
        }))
        .unwrap();
        assert_eq!(read, json!({"event": "messagesRead", "data": {"readBy": user.to_string()}}));

        let typing = serde_json::to_value(ServerEvent::UserTyping(UserTypingPayload {
            user_id: user,
            is_typing: false,
        }))
        .unwrap();
        assert_eq!(typing["data"]["isTyping"], false);

        let err = serde_json::to_value(ServerEvent::error("USER_NOT_FOUND", "nope")).unwrap();
        assert_eq!(err["event"], "error");
        assert_eq!(err["data"]["message"], "nope");
    }
}
