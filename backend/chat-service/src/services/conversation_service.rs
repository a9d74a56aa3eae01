//! # Conversation Aggregator
//!
//! Per-counterpart summaries for one viewer, computed in a single pass over
//! the viewer's messages. Read-only.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ConversationSummary, Message};
use crate::repository::{IdentityDirectory, MessageRepository};

#[derive(Clone)]
pub struct ConversationService {
    messages: Arc<dyn MessageRepository>,
    identities: Arc<dyn IdentityDirectory>,
}

struct Group {
    last: Message,
    unread: i64,
}

impl ConversationService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        identities: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            messages,
            identities,
        }
    }

    /// Conversations of `viewer_id`, most recent first.
    ///
    /// Counterparts unknown to the identity directory are left out.
    pub async fn list(&self, viewer_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let messages = self.messages.messages_involving(viewer_id).await?;
        let groups = group_by_counterpart(viewer_id, messages);

        let counterpart_ids: Vec<Uuid> = groups.keys().copied().collect();
        let profiles = self.identities.profiles(&counterpart_ids).await?;

        let mut rows: Vec<(i64, ConversationSummary)> = groups
            .into_iter()
            .filter_map(|(counterpart_id, group)| {
                let Some(profile) = profiles.get(&counterpart_id) else {
                    tracing::debug!(%counterpart_id, "conversation counterpart missing from directory");
                    return None;
                };
                Some((
                    group.last.sequence,
                    ConversationSummary::new(profile, &group.last, group.unread),
                ))
            })
            .collect();

        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            (b.last_message.created_at, *seq_b).cmp(&(a.last_message.created_at, *seq_a))
        });

        Ok(rows.into_iter().map(|(_, summary)| summary).collect())
    }
}

/// One pass: running max by `(created_at, sequence)` and an unread counter
/// per counterpart.
fn group_by_counterpart(viewer_id: Uuid, messages: Vec<Message>) -> HashMap<Uuid, Group> {
    let mut groups: HashMap<Uuid, Group> = HashMap::new();

    for message in messages {
        let counterpart = message.counterpart_of(viewer_id);
        let unread = i64::from(message.is_unread_for(viewer_id));

        match groups.get_mut(&counterpart) {
            Some(group) => {
                group.unread += unread;
                if message.order_key() > group.last.order_key() {
                    group.last = message;
                }
            }
            None => {
                groups.insert(
                    counterpart,
                    Group {
                        last: message,
                        unread,
                    },
                );
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn msg(seq: i64, sender: Uuid, receiver: Uuid, secs: i64, is_read: bool) -> Message {
        Message {
            id: Uuid::new_v4(),
            sequence: seq,
            sender_id: sender,
            receiver_id: receiver,
            content: format!("m{seq}"),
            is_read,
            created_at: Utc::now() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_grouping_tracks_latest_and_unread() {
        let (me, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let messages = vec![
            msg(1, a, me, 0, false),
            msg(2, me, a, 10, false),
            msg(3, a, me, 5, false),
            msg(4, b, me, 1, true),
        ];

        let groups = group_by_counterpart(me, messages);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&a].last.sequence, 2);
        assert_eq!(groups[&a].unread, 2);
        assert_eq!(groups[&b].unread, 0);
    }

    #[test]
    fn test_equal_timestamps_pick_later_insert() {
        let (me, a) = (Uuid::new_v4(), Uuid::new_v4());
        let mut first = msg(1, a, me, 0, false);
        let mut second = msg(2, me, a, 0, false);
        let now = Utc::now();
        first.created_at = now;
        second.created_at = now;

        let groups = group_by_counterpart(me, vec![second, first]);

        assert_eq!(groups[&a].last.sequence, 2);
    }
}
