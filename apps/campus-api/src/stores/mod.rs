//! Persistence seams used by the gateway.
//!
//! Backed by PostgreSQL in production and in-memory maps in tests.

pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::models::chat_message::{ChatMessage, NewChatMessage};
use crate::models::position::Position;
use crate::models::room::Room;
use crate::models::user::DirectoryUser;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Looks up accounts by id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<DirectoryUser>, StoreError>;
}

/// Durable last-known avatar positions, one row per user.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn upsert(&self, user_id: &str, position: &Position) -> Result<(), StoreError>;
    async fn read(&self, user_id: &str) -> Result<Option<Position>, StoreError>;
}

/// Append-only chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError>;

    /// The newest `limit` messages for a room (or the global channel when
    /// `room_id` is `None`), returned oldest first.
    async fn query_recent(
        &self,
        room_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Read access to rooms and their membership.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError>;
    /// Users holding a durable membership in the room.
    async fn member_ids(&self, room_id: &str) -> Result<HashSet<String>, StoreError>;
}
