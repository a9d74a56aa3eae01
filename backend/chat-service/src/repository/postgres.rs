use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use super::{IdentityDirectory, MessageRepository};
use crate::error::AppResult;
use crate::models::{Message, NewMessage, UserProfile};

const MESSAGE_COLUMNS: &str = "id, seq, sender_id, receiver_id, content, is_read, created_at";

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: Pool<Postgres>,
}

impl PgMessageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: NewMessage) -> AppResult<Message> {
        let sql = format!(
            "INSERT INTO messages (id, sender_id, receiver_id, content) \
             VALUES ($1, $2, $3, $4) RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, Message>(&sql)
            .bind(Uuid::new_v4())
            .bind(message.sender_id)
            .bind(message.receiver_id)
            .bind(&message.content)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn messages_between(&self, a: Uuid, b: Uuid) -> AppResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE (sender_id = $1 AND receiver_id = $2) \
                OR (sender_id = $2 AND receiver_id = $1) \
             ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query_as::<_, Message>(&sql)
            .bind(a)
            .bind(b)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn mark_read(&self, receiver_id: Uuid, ids: &[Uuid]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE messages SET is_read = TRUE \
             WHERE receiver_id = $1 AND id = ANY($2) AND is_read = FALSE",
        )
        .bind(receiver_id)
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn messages_involving(&self, user_id: Uuid) -> AppResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE sender_id = $1 OR receiver_id = $1"
        );
        let rows = sqlx::query_as::<_, Message>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[derive(Clone)]
pub struct PgIdentityDirectory {
    pool: Pool<Postgres>,
}

impl PgIdentityDirectory {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn profiles(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, UserProfile>(
            "SELECT id, username, name, avatar FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|p| (p.id, p)).collect())
    }
}
