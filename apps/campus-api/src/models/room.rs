use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::db::schema::rooms;

/// The columns of `rooms` needed for entry checks.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = rooms)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub capacity: i32,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Whether `member_count` leaves no seat for another member.
    pub fn is_full(&self, member_count: i64) -> bool {
        member_count >= i64::from(self.capacity)
    }
}
