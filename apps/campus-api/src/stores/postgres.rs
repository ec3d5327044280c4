//! PostgreSQL-backed stores.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use campus_common::SnowflakeGenerator;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use super::{MessageStore, PositionStore, RoomStore, StoreError, UserDirectory};
use crate::db::pool::DbPool;
use crate::db::schema::{chat_messages, room_members, rooms, user_positions, users};
use crate::models::chat_message::{ChatMessage, ChatMessageRow, InsertChatMessage, NewChatMessage};
use crate::models::position::{Position, UpsertUserPosition, UserPosition};
use crate::models::room::Room;
use crate::models::user::{DirectoryUser, UserRecord};

pub struct PgUserDirectory {
    db: DbPool,
}

impl PgUserDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find(&self, user_id: &str) -> Result<Option<DirectoryUser>, StoreError> {
        let mut conn = self.db.get().await?;
        let record: Option<UserRecord> = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(UserRecord::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        record
            .map(|r| DirectoryUser::try_from(r).map_err(StoreError::Corrupt))
            .transpose()
    }
}

pub struct PgPositionStore {
    db: DbPool,
}

impl PgPositionStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PositionStore for PgPositionStore {
    async fn upsert(&self, user_id: &str, position: &Position) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;
        let row = UpsertUserPosition::new(user_id, position, Utc::now());

        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(user_positions::table)
                .values(&row)
                .on_conflict(user_positions::user_id)
                .do_update()
                .set(&row),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn read(&self, user_id: &str) -> Result<Option<Position>, StoreError> {
        let mut conn = self.db.get().await?;
        let row: Option<UserPosition> = diesel_async::RunQueryDsl::get_result(
            user_positions::table
                .find(user_id)
                .select(UserPosition::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(row.map(UserPosition::into_position))
    }
}

pub struct PgMessageStore {
    db: DbPool,
    snowflake: Arc<SnowflakeGenerator>,
}

impl PgMessageStore {
    pub fn new(db: DbPool, snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self { db, snowflake }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let mut conn = self.db.get().await?;

        let query = diesel::insert_into(chat_messages::table)
            .values(InsertChatMessage {
                id: self.snowflake.generate(),
                user_id: &message.user_id,
                room_id: message.room_id.as_deref(),
                content: &message.content,
                type_: message.message_type.as_str(),
                created_at: Utc::now(),
            })
            .returning(ChatMessageRow::as_returning());

        let row: ChatMessageRow = diesel_async::RunQueryDsl::get_result(query, &mut conn).await?;

        Ok(row.with_author(message.user_name))
    }

    async fn query_recent(
        &self,
        room_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.db.get().await?;

        let mut query = chat_messages::table
            .inner_join(users::table)
            .select((ChatMessageRow::as_select(), users::name))
            .order((chat_messages::created_at.desc(), chat_messages::id.desc()))
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .into_boxed();

        query = match room_id {
            Some(room_id) => query.filter(chat_messages::room_id.eq(room_id)),
            None => query.filter(chat_messages::room_id.is_null()),
        };

        let rows: Vec<(ChatMessageRow, String)> =
            diesel_async::RunQueryDsl::load(query, &mut conn).await?;

        // Newest-first from the query; callers get chronological order.
        Ok(rows
            .into_iter()
            .rev()
            .map(|(row, name)| row.with_author(name))
            .collect())
    }
}

pub struct PgRoomStore {
    db: DbPool,
}

impl PgRoomStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let mut conn = self.db.get().await?;
        let room = diesel_async::RunQueryDsl::get_result(
            rooms::table.find(room_id).select(Room::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(room)
    }

    async fn member_ids(&self, room_id: &str) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.db.get().await?;
        let ids: Vec<String> = diesel_async::RunQueryDsl::load(
            room_members::table
                .filter(room_members::room_id.eq(room_id))
                .select(room_members::user_id),
            &mut conn,
        )
        .await?;

        Ok(ids.into_iter().collect())
    }
}
