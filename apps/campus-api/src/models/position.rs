use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::user_positions;

/// Facing direction of an avatar. Absent directions default to `Down`,
/// both on the wire and in the `user_positions` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("unknown direction {other:?}")),
        }
    }
}

/// A complete avatar position. Always carries every field; partial updates
/// are resolved before a `Position` is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub map_id: String,
    pub direction: Direction,
    pub is_moving: bool,
}

impl Position {
    /// A standing avatar facing the default direction.
    pub fn spawn(x: f64, y: f64, map_id: impl Into<String>) -> Self {
        Self {
            x,
            y,
            map_id: map_id.into(),
            direction: Direction::default(),
            is_moving: false,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_positions)]
pub struct UserPosition {
    pub user_id: String,
    pub x: f64,
    pub y: f64,
    pub map_id: String,
    pub direction: String,
    pub is_moving: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserPosition {
    /// Convert a stored row. Unknown direction strings fall back to the
    /// default instead of failing the read.
    pub fn into_position(self) -> Position {
        Position {
            x: self.x,
            y: self.y,
            direction: self.direction.parse().unwrap_or_default(),
            map_id: self.map_id,
            is_moving: self.is_moving,
        }
    }
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = user_positions)]
pub struct UpsertUserPosition<'a> {
    pub user_id: &'a str,
    pub x: f64,
    pub y: f64,
    pub map_id: &'a str,
    pub direction: &'a str,
    pub is_moving: bool,
    pub updated_at: DateTime<Utc>,
}

impl<'a> UpsertUserPosition<'a> {
    pub fn new(user_id: &'a str, position: &'a Position, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            x: position.x,
            y: position.y,
            map_id: &position.map_id,
            direction: position.direction.as_str(),
            is_moving: position.is_moving,
            updated_at: now,
        }
    }
}
