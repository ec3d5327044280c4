//! Presence snapshot endpoint.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::gateway::presence::PresenceEntry;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/presence", get(list_presence))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PresenceQuery {
    /// Restrict the snapshot to one map.
    pub map_id: Option<String>,
}

/// `GET /api/v1/presence`: Who is online, in first-seen order.
#[utoipa::path(
    get,
    path = "/api/v1/presence",
    tag = "Presence",
    security(("bearer" = [])),
    params(PresenceQuery),
    responses(
        (status = 200, description = "Presence snapshot", body = Vec<PresenceEntry>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_presence(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> Result<Json<Vec<PresenceEntry>>, ApiError> {
    let presence = &state.gateway.presence;
    let snapshot = match query.map_id.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::bad_request("map_id must not be empty")),
        Some(map_id) => presence.snapshot_for_map(map_id),
        None => presence.snapshot_all(),
    };
    Ok(Json(snapshot))
}
