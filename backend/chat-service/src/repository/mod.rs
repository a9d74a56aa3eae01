//! Persistence seams.
//!
//! The services only see these traits. `postgres` is the production
//! implementation, `memory` backs tests and local runs.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Message, NewMessage, UserProfile};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryIdentityDirectory, MemoryMessageRepository};
pub use postgres::{PgIdentityDirectory, PgMessageRepository};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persists a message. The store assigns id, sequence and timestamp;
    /// `is_read` starts false.
    async fn insert(&self, message: NewMessage) -> AppResult<Message>;

    /// All messages between the pair, ascending by `(created_at, sequence)`.
    async fn messages_between(&self, a: Uuid, b: Uuid) -> AppResult<Vec<Message>>;

    /// Marks the given messages read, restricted to those addressed to
    /// `receiver_id` and still unread. Returns how many rows changed.
    async fn mark_read(&self, receiver_id: Uuid, ids: &[Uuid]) -> AppResult<u64>;

    /// Every message where `user_id` is sender or receiver, in no particular order.
    async fn messages_involving(&self, user_id: Uuid) -> AppResult<Vec<Message>>;
}

/// Read-only view of the external identity directory.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Profiles for the ids that exist. Unknown ids are simply absent.
    async fn profiles(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserProfile>>;
}
