use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize, Serializer};
use utoipa::ToSchema;

use crate::db::schema::chat_messages;

/// Kind of chat message. The gateway only ever creates `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    System,
    Announcement,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::System => "SYSTEM",
            Self::Announcement => "ANNOUNCEMENT",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "SYSTEM" => Self::System,
            "ANNOUNCEMENT" => Self::Announcement,
            _ => Self::Text,
        }
    }
}

/// A persisted chat message with its author's display name, in the shape
/// clients receive it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Snowflake id, serialized as a string so browsers keep full precision.
    #[serde(serialize_with = "id_as_string")]
    #[schema(value_type = String)]
    pub id: i64,
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    pub room_id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

fn id_as_string<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

/// A message about to be appended.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    pub room_id: Option<String>,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = chat_messages)]
pub struct ChatMessageRow {
    pub id: i64,
    pub user_id: String,
    pub room_id: Option<String>,
    pub content: String,
    pub type_: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessageRow {
    pub fn with_author(self, user_name: String) -> ChatMessage {
        ChatMessage {
            id: self.id,
            user_id: self.user_id,
            user_name,
            content: self.content,
            room_id: self.room_id,
            message_type: MessageType::parse(&self.type_),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct InsertChatMessage<'a> {
    pub id: i64,
    pub user_id: &'a str,
    pub room_id: Option<&'a str>,
    pub content: &'a str,
    pub type_: &'a str,
    pub created_at: DateTime<Utc>,
}
