//! Chat history over HTTP.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::gateway::handler::history_limit;
use crate::models::chat_message::ChatMessage;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat/messages", get(list_messages))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListMessagesQuery {
    /// Room to read; omit for the global channel.
    pub room_id: Option<String>,
    /// Page size, clamped to 1-100 (default 50).
    pub limit: Option<i64>,
}

/// `GET /api/v1/chat/messages`: Most recent messages, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/chat/messages",
    tag = "Chat",
    security(("bearer" = [])),
    params(ListMessagesQuery),
    responses(
        (status = 200, description = "Recent messages", body = Vec<ChatMessage>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let room_id = query.room_id.as_deref().filter(|r| !r.is_empty());
    let messages = state
        .messages
        .query_recent(room_id, history_limit(query.limit))
        .await?;

    tracing::debug!(user_id = %user.user_id, room_id, count = messages.len(), "chat history served");
    Ok(Json(messages))
}
