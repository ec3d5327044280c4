//! Gateway event names, wire frames and inbound payload validation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, GatewayError};
use crate::models::position::{Direction, Position};

/// Longest accepted map id.
pub const MAX_MAP_ID_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

/// A frame received from the client: `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFrame {
    pub event: String,
    pub data: Value,
}

impl ServerFrame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        Self::new(
            EventName::ERROR,
            serde_json::json!({
                "message": err.client_message(),
                "code": err.code(),
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event names exchanged with clients.
pub struct EventName;

impl EventName {
    // Inbound
    pub const AUTH: &'static str = "auth";
    pub const MOVE: &'static str = "move";
    pub const CHAT_SEND: &'static str = "chat:send";
    pub const CHAT_TYPING: &'static str = "chat:typing";
    pub const ROOM_ENTER: &'static str = "room:enter";
    pub const ROOM_LEAVE: &'static str = "room:leave";
    pub const USER_JOIN: &'static str = "user:join";

    // Outbound
    pub const MOVED: &'static str = "moved";
    pub const CHAT_MESSAGE: &'static str = "chat:message";
    pub const CHAT_USER_TYPING: &'static str = "chat:user_typing";
    pub const ROOM_USER_ENTERED: &'static str = "room:user_entered";
    pub const ROOM_USER_LEFT: &'static str = "room:user_left";
    pub const USER_JOINED: &'static str = "user:joined";
    pub const USER_LEFT: &'static str = "user:left";
    pub const USERS_ONLINE: &'static str = "users:online";
    pub const ERROR: &'static str = "error";

    // Both directions
    pub const CHAT_HISTORY: &'static str = "chat:history";
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthPayload {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MovePayload {
    pub x: f64,
    pub y: f64,
    pub map_id: String,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub is_moving: Option<bool>,
}

impl MovePayload {
    /// Validate and complete the position. Absent fields take their defaults.
    pub fn into_position(self) -> Result<Position, GatewayError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(GatewayError::validation(
                codes::INVALID_POSITION,
                "Coordinates must be finite numbers",
            ));
        }
        let map_id = self.map_id.trim();
        if map_id.is_empty() || map_id.chars().count() > MAX_MAP_ID_LEN {
            return Err(GatewayError::validation(
                codes::INVALID_POSITION,
                format!("mapId must be 1-{MAX_MAP_ID_LEN} characters"),
            ));
        }
        Ok(Position {
            x: self.x,
            y: self.y,
            map_id: map_id.to_string(),
            direction: self.direction.unwrap_or_default(),
            is_moving: self.is_moving.unwrap_or(false),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatSendPayload {
    pub content: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatTypingPayload {
    #[serde(default)]
    pub room_id: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoomEnterPayload {
    pub room_id: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoomLeavePayload {
    pub room_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatHistoryPayload {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserJoinPayload {}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A validated inbound event from an authenticated connection.
#[derive(Debug)]
pub enum ClientEvent {
    Move(Position),
    ChatSend(ChatSendPayload),
    ChatTyping(ChatTypingPayload),
    RoomEnter(RoomEnterPayload),
    RoomLeave(RoomLeavePayload),
    ChatHistory(ChatHistoryPayload),
    UserJoin,
}

type Parser = fn(Value) -> Result<ClientEvent, GatewayError>;

/// Inbound event names and the parser that validates each payload.
const DISPATCH: &[(&str, Parser)] = &[
    (EventName::MOVE, parse_move),
    (EventName::CHAT_SEND, parse_chat_send),
    (EventName::CHAT_TYPING, parse_chat_typing),
    (EventName::ROOM_ENTER, parse_room_enter),
    (EventName::ROOM_LEAVE, parse_room_leave),
    (EventName::CHAT_HISTORY, parse_chat_history),
    (EventName::USER_JOIN, parse_user_join),
];

fn parse_move(data: Value) -> Result<ClientEvent, GatewayError> {
    payload::<MovePayload>(data)?
        .into_position()
        .map(ClientEvent::Move)
}

fn parse_chat_send(data: Value) -> Result<ClientEvent, GatewayError> {
    payload(data).map(ClientEvent::ChatSend)
}

fn parse_chat_typing(data: Value) -> Result<ClientEvent, GatewayError> {
    payload(data).map(ClientEvent::ChatTyping)
}

fn parse_room_enter(data: Value) -> Result<ClientEvent, GatewayError> {
    payload(data).map(ClientEvent::RoomEnter)
}

fn parse_room_leave(data: Value) -> Result<ClientEvent, GatewayError> {
    payload(data).map(ClientEvent::RoomLeave)
}

fn parse_chat_history(data: Value) -> Result<ClientEvent, GatewayError> {
    optional_payload(data).map(ClientEvent::ChatHistory)
}

fn parse_user_join(data: Value) -> Result<ClientEvent, GatewayError> {
    optional_payload::<UserJoinPayload>(data).map(|_| ClientEvent::UserJoin)
}

impl ClientEvent {
    /// Validate a frame from an already-authenticated connection.
    pub fn parse(frame: ClientFrame) -> Result<Self, GatewayError> {
        if frame.event == EventName::AUTH {
            return Err(GatewayError::validation(
                codes::ALREADY_AUTHENTICATED,
                "Connection is already authenticated",
            ));
        }
        let parser = DISPATCH
            .iter()
            .find(|(name, _)| *name == frame.event)
            .map(|(_, parser)| parser)
            .ok_or_else(|| {
                GatewayError::validation(
                    codes::INVALID_EVENT,
                    format!("Unknown event {:?}", frame.event),
                )
            })?;
        parser(frame.data)
    }
}

/// Parse a raw text frame into its envelope.
pub fn parse_frame(text: &str) -> Result<ClientFrame, GatewayError> {
    serde_json::from_str(text)
        .map_err(|_| GatewayError::validation(codes::INVALID_PAYLOAD, "Malformed frame"))
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, GatewayError> {
    serde_json::from_value(data).map_err(|e| {
        GatewayError::validation(codes::INVALID_PAYLOAD, format!("Invalid payload: {e}"))
    })
}

/// Like `payload`, but a missing or null body means "all defaults".
fn optional_payload<T: DeserializeOwned + Default>(data: Value) -> Result<T, GatewayError> {
    if data.is_null() {
        return Ok(T::default());
    }
    payload(data)
}
