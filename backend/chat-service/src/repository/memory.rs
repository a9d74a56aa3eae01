use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{IdentityDirectory, MessageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{Message, NewMessage, UserProfile};

#[derive(Default)]
struct MessageTable {
    rows: Vec<Message>,
    next_seq: i64,
}

/// Message repository kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryMessageRepository {
    table: Arc<RwLock<MessageTable>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent insert fail with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: Uuid) -> Option<Message> {
        self.table.read().await.rows.iter().find(|m| m.id == id).cloned()
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn insert(&self, message: NewMessage) -> AppResult<Message> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("simulated write failure".into()));
        }
        let mut table = self.table.write().await;
        table.next_seq += 1;
        let row = Message {
            id: Uuid::new_v4(),
            sequence: table.next_seq,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            is_read: false,
            created_at: Utc::now(),
        };
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn messages_between(&self, a: Uuid, b: Uuid) -> AppResult<Vec<Message>> {
        let table = self.table.read().await;
        let mut rows: Vec<Message> = table
            .rows
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
            })
            .cloned()
            .collect();
        rows.sort_by_key(Message::order_key);
        Ok(rows)
    }

    async fn mark_read(&self, receiver_id: Uuid, ids: &[Uuid]) -> AppResult<u64> {
        let mut table = self.table.write().await;
        let mut changed = 0;
        for row in table.rows.iter_mut() {
            if row.receiver_id == receiver_id && !row.is_read && ids.contains(&row.id) {
                row.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn messages_involving(&self, user_id: Uuid) -> AppResult<Vec<Message>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
            .cloned()
            .collect())
    }
}

/// Identity directory backed by a map, populated by the caller.
#[derive(Clone, Default)]
pub struct MemoryIdentityDirectory {
    users: Arc<RwLock<HashMap<Uuid, UserProfile>>>,
}

impl MemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.users.write().await.insert(profile.id, profile);
    }

    pub async fn remove(&self, id: Uuid) {
        self.users.write().await.remove(&id);
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn profiles(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserProfile>> {
        let users = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| users.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}
