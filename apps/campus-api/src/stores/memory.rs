//! In-memory stores used by tests.

use std::collections::HashSet;

use async_trait::async_trait;
use campus_common::SnowflakeGenerator;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{MessageStore, PositionStore, RoomStore, StoreError, UserDirectory};
use crate::models::chat_message::{ChatMessage, NewChatMessage};
use crate::models::position::Position;
use crate::models::room::Room;
use crate::models::user::DirectoryUser;

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<String, DirectoryUser>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: DirectoryUser) {
        self.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find(&self, user_id: &str) -> Result<Option<DirectoryUser>, StoreError> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }
}

#[derive(Default)]
pub struct MemoryPositionStore {
    positions: DashMap<String, Position>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn upsert(&self, user_id: &str, position: &Position) -> Result<(), StoreError> {
        self.positions.insert(user_id.to_string(), position.clone());
        Ok(())
    }

    async fn read(&self, user_id: &str) -> Result<Option<Position>, StoreError> {
        Ok(self.positions.get(user_id).map(|p| p.clone()))
    }
}

pub struct MemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
    snowflake: SnowflakeGenerator,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            snowflake: SnowflakeGenerator::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let stored = ChatMessage {
            id: self.snowflake.generate(),
            user_id: message.user_id,
            user_name: message.user_name,
            content: message.content,
            room_id: message.room_id,
            message_type: message.message_type,
            created_at: Utc::now(),
        };
        self.messages.lock().push(stored.clone());
        Ok(stored)
    }

    async fn query_recent(
        &self,
        room_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.lock();
        let mut recent: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| m.room_id.as_deref() == room_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<String, Room>,
    members: DashMap<String, HashSet<String>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_room(&self, room: Room) {
        self.rooms.insert(room.id.clone(), room);
    }

    /// Replace the durable members of a room.
    pub fn set_members<'a>(&self, room_id: &str, user_ids: impl IntoIterator<Item = &'a str>) {
        let ids = user_ids.into_iter().map(str::to_string).collect();
        self.members.insert(room_id.to_string(), ids);
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(room_id).map(|r| r.clone()))
    }

    async fn member_ids(&self, room_id: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .members
            .get(room_id)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }
}
