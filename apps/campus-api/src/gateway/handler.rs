//! Handlers for events from authenticated connections.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use super::core::Gateway;
use super::events::{
    ChatHistoryPayload, ChatSendPayload, ChatTypingPayload, ClientEvent, EventName,
    RoomEnterPayload, RoomLeavePayload,
};
use super::presence::PresenceEntry;
use super::router::Group;
use super::session::Connection;
use crate::auth::password::verify_password_blocking;
use crate::error::{codes, GatewayError};
use crate::models::chat_message::{MessageType, NewChatMessage};
use crate::models::position::Position;
use crate::models::room::Room;

/// History page size when the client does not ask for one.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Largest history page a client may request.
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Clamp a requested history size into the accepted range.
pub fn history_limit(requested: Option<i64>) -> usize {
    // Clamped into 1..=100, so the cast cannot truncate.
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT) as usize
}

impl Gateway {
    pub async fn handle_event(
        &self,
        conn: &Arc<Connection>,
        event: ClientEvent,
    ) -> Result<(), GatewayError> {
        match event {
            ClientEvent::Move(position) => self.handle_move(conn, position).await,
            ClientEvent::ChatSend(payload) => self.handle_chat_send(conn, payload).await,
            ClientEvent::ChatTyping(payload) => self.handle_typing(conn, payload),
            ClientEvent::RoomEnter(payload) => self.handle_room_enter(conn, payload).await,
            ClientEvent::RoomLeave(payload) => self.handle_room_leave(conn, payload),
            ClientEvent::ChatHistory(payload) => self.handle_chat_history(conn, payload).await,
            ClientEvent::UserJoin => {
                self.send_online_users(&conn.id);
                Ok(())
            }
        }
    }

    async fn handle_move(&self, conn: &Arc<Connection>, position: Position) -> Result<(), GatewayError> {
        let user_id = &conn.user.user_id;

        if let Err(err) = self.stores.positions.upsert(user_id, &position).await {
            tracing::warn!(?err, conn_id = %conn.id, %user_id, "failed to persist position");
        }

        // The connection may have closed while the write was in flight.
        if !conn.is_open() {
            return Ok(());
        }

        let previous = self
            .presence
            .upsert(user_id, &conn.user.display_name, position.clone());

        let mut groups = Vec::with_capacity(2);
        if let Some(prev) = previous.filter(|p| p.position.map_id != position.map_id) {
            groups.push(Group::Map(prev.position.map_id));
        }
        groups.push(Group::Map(position.map_id.clone()));

        let entry = PresenceEntry {
            user_id: user_id.clone(),
            display_name: conn.user.display_name.clone(),
            position,
        };
        self.router
            .broadcast_to_groups(&groups, Some(&conn.id), EventName::MOVED, json!(entry));
        Ok(())
    }

    async fn handle_chat_send(
        &self,
        conn: &Arc<Connection>,
        payload: ChatSendPayload,
    ) -> Result<(), GatewayError> {
        let content = payload.content.trim();
        if content.is_empty() {
            return Err(GatewayError::validation(codes::INVALID_MESSAGE, "Message is empty"));
        }
        let max = self.settings.chat_max_length;
        if content.chars().count() > max {
            return Err(GatewayError::validation(
                codes::INVALID_MESSAGE,
                format!("Message exceeds {max} characters"),
            ));
        }

        let room_id = payload.room_id.filter(|r| !r.is_empty());
        if let Some(room_id) = &room_id {
            self.require_room(conn, room_id)?;
        }

        let message = self
            .stores
            .messages
            .append(NewChatMessage {
                user_id: conn.user.user_id.clone(),
                user_name: conn.user.display_name.clone(),
                content: content.to_string(),
                room_id: room_id.clone(),
                message_type: MessageType::Text,
            })
            .await
            .map_err(|err| {
                GatewayError::persistence(codes::CHAT_MESSAGE_ERROR, "Failed to send message", err)
            })?;

        let group = room_id.map(Group::Room).unwrap_or(Group::Global);
        let delivered = self
            .router
            .broadcast(&group, EventName::CHAT_MESSAGE, json!(message));
        tracing::debug!(conn_id = %conn.id, %group, message_id = message.id, delivered, "chat message sent");
        Ok(())
    }

    fn handle_typing(&self, conn: &Arc<Connection>, payload: ChatTypingPayload) -> Result<(), GatewayError> {
        let room_id = payload.room_id.filter(|r| !r.is_empty());
        if let Some(room_id) = &room_id {
            self.require_room(conn, room_id)?;
        }
        let group = room_id.clone().map(Group::Room).unwrap_or(Group::Global);
        self.router.broadcast_except(
            &group,
            &conn.id,
            EventName::CHAT_USER_TYPING,
            json!({
                "userId": conn.user.user_id,
                "userName": conn.user.display_name,
                "isTyping": payload.is_typing,
                "roomId": room_id,
            }),
        );
        Ok(())
    }

    async fn handle_room_enter(
        &self,
        conn: &Arc<Connection>,
        payload: RoomEnterPayload,
    ) -> Result<(), GatewayError> {
        let room_id = payload.room_id;
        let current = self.registry.current_room(&conn.id);
        if current.as_deref() == Some(room_id.as_str()) {
            return Ok(());
        }

        let room = self
            .stores
            .rooms
            .get(&room_id)
            .await
            .map_err(|err| GatewayError::persistence(codes::ROOM_ENTER_ERROR, "Failed to enter room", err))?
            .ok_or_else(|| GatewayError::validation(codes::ROOM_NOT_FOUND, "Room not found"))?;

        if !room.is_active {
            return Err(GatewayError::authorization(codes::ROOM_INACTIVE, "Room is not active"));
        }

        let durable = self
            .stores
            .rooms
            .member_ids(&room_id)
            .await
            .map_err(|err| GatewayError::persistence(codes::ROOM_ENTER_ERROR, "Failed to enter room", err))?;
        let user_id = conn.user.user_id.as_str();
        check_capacity(&room, &durable, &self.registry.room_users(&room_id), user_id)?;

        if let Some(hash) = &room.password_hash {
            let password = payload
                .password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| GatewayError::authorization(codes::PASSWORD_REQUIRED, "Password required"))?;
            if !verify_password_blocking(password, hash.clone()).await {
                return Err(GatewayError::authorization(codes::INVALID_PASSWORD, "Invalid password"));
            }
        }

        if !conn.is_open() {
            return Ok(());
        }

        // Seats may have been taken while the checks above were awaiting.
        let Some(change) = self.registry.enter_room(&conn.id, &room_id, |live| {
            check_capacity(&room, &durable, live, user_id)
        })?
        else {
            return Ok(());
        };

        if let Some(previous) = change.left {
            self.announce_left(conn, &previous);
        }
        self.router.broadcast_except(
            &Group::Room(room_id.clone()),
            &conn.id,
            EventName::ROOM_USER_ENTERED,
            json!({
                "userId": conn.user.user_id,
                "userName": conn.user.display_name,
                "roomId": room_id,
            }),
        );
        tracing::info!(conn_id = %conn.id, user_id = %conn.user.user_id, %room_id, "entered room");
        Ok(())
    }

    fn handle_room_leave(&self, conn: &Arc<Connection>, payload: RoomLeavePayload) -> Result<(), GatewayError> {
        self.leave_room(conn, &payload.room_id);
        Ok(())
    }

    /// Unsubscribe and notify remaining members. No-op when not in the room.
    fn leave_room(&self, conn: &Connection, room_id: &str) {
        let group = Group::Room(room_id.to_string());
        if self.registry.unsubscribe(&conn.id, &group) {
            self.announce_left(conn, room_id);
        }
    }

    fn announce_left(&self, conn: &Connection, room_id: &str) {
        self.router.broadcast(
            &Group::Room(room_id.to_string()),
            EventName::ROOM_USER_LEFT,
            json!({
                "userId": conn.user.user_id,
                "userName": conn.user.display_name,
                "roomId": room_id,
            }),
        );
        tracing::info!(conn_id = %conn.id, user_id = %conn.user.user_id, %room_id, "left room");
    }

    async fn handle_chat_history(
        &self,
        conn: &Arc<Connection>,
        payload: ChatHistoryPayload,
    ) -> Result<(), GatewayError> {
        let room_id = payload.room_id.filter(|r| !r.is_empty());
        if let Some(room_id) = &room_id {
            self.require_room(conn, room_id)?;
        }

        let messages = self
            .stores
            .messages
            .query_recent(room_id.as_deref(), history_limit(payload.limit))
            .await
            .map_err(|err| {
                GatewayError::persistence(codes::CHAT_HISTORY_ERROR, "Failed to load chat history", err)
            })?;

        self.router
            .unicast(&conn.id, EventName::CHAT_HISTORY, json!(messages));
        Ok(())
    }

    fn require_room(&self, conn: &Connection, room_id: &str) -> Result<(), GatewayError> {
        if self.registry.current_room(&conn.id).as_deref() == Some(room_id) {
            Ok(())
        } else {
            Err(GatewayError::authorization(codes::NOT_IN_ROOM, "You have not entered this room"))
        }
    }
}

/// A room is full when its occupants, durable members and users connected
/// to it counted once each, fill every seat. A user already occupying the
/// room never needs another seat.
fn check_capacity(
    room: &Room,
    durable: &HashSet<String>,
    live: &HashSet<String>,
    user_id: &str,
) -> Result<(), GatewayError> {
    if durable.contains(user_id) || live.contains(user_id) {
        return Ok(());
    }
    let occupants = durable.union(live).count();
    if room.is_full(i64::try_from(occupants).unwrap_or(i64::MAX)) {
        return Err(GatewayError::authorization(codes::ROOM_FULL, "Room is full"));
    }
    Ok(())
}
