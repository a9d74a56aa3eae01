//! # Message Store
//!
//! Persists direct messages and owns read state. Knows nothing about live
//! connections.
//!
//! ## Read state
//!
//! `history` marks the viewer's unread messages as read while serving them.
//! It runs as two steps: read the projection, then update exactly the unread
//! ids it saw. The two steps are not atomic, so two concurrent `history`
//! calls for the same pair can both observe the pre-update unread state.
//! The response is the projection read in step one.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{MessageView, NewMessage, UserProfile};
use crate::repository::{IdentityDirectory, MessageRepository};

#[derive(Clone)]
pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    identities: Arc<dyn IdentityDirectory>,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        identities: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            messages,
            identities,
        }
    }

    /// Stores a new message and returns it with both display names.
    ///
    /// Argument checks run before the directory lookup, so a self-send is
    /// always `InvalidArgument` whether or not the identity exists.
    pub async fn send(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> AppResult<MessageView> {
        if sender_id == receiver_id {
            return Err(AppError::InvalidArgument(
                "cannot send a message to yourself".into(),
            ));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::InvalidArgument(
                "message content cannot be empty".into(),
            ));
        }

        let (sender, receiver) = self.pair(sender_id, receiver_id).await?;

        let message = self
            .messages
            .insert(NewMessage {
                sender_id,
                receiver_id,
                content: content.to_string(),
            })
            .await?;

        tracing::debug!(
            message_id = %message.id,
            sender_id = %sender_id,
            receiver_id = %receiver_id,
            "message stored"
        );

        Ok(MessageView::new(message, &sender, &receiver))
    }

    /// All messages between the pair, oldest first. Unread messages addressed
    /// to `viewer_id` are marked read as a side effect.
    pub async fn history(
        &self,
        viewer_id: Uuid,
        counterpart_id: Uuid,
    ) -> AppResult<Vec<MessageView>> {
        let (viewer, counterpart) = self.pair(viewer_id, counterpart_id).await?;

        let messages = self
            .messages
            .messages_between(viewer_id, counterpart_id)
            .await?;

        let unread: Vec<Uuid> = messages
            .iter()
            .filter(|m| m.is_unread_for(viewer_id))
            .map(|m| m.id)
            .collect();

        if !unread.is_empty() {
            let marked = self.messages.mark_read(viewer_id, &unread).await?;
            tracing::debug!(
                viewer_id = %viewer_id,
                counterpart_id = %counterpart_id,
                marked,
                "marked messages read"
            );
        }

        Ok(messages
            .into_iter()
            .map(|m| {
                if m.sender_id == viewer_id {
                    MessageView::new(m, &viewer, &counterpart)
                } else {
                    MessageView::new(m, &counterpart, &viewer)
                }
            })
            .collect())
    }

    /// Both profiles, or `NotFound` naming the first missing one.
    async fn pair(&self, first: Uuid, second: Uuid) -> AppResult<(UserProfile, UserProfile)> {
        let mut found: HashMap<Uuid, UserProfile> =
            self.identities.profiles(&[first, second]).await?;

        let first_profile = found
            .remove(&first)
            .ok_or_else(|| AppError::NotFound(format!("user {first} not found")))?;
        let second_profile = match found.remove(&second) {
            Some(p) => p,
            None if first == second => first_profile.clone(),
            None => return Err(AppError::NotFound(format!("user {second} not found"))),
        };

        Ok((first_profile, second_profile))
    }
}
