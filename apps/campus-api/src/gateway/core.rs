//! Connection lifecycle: authenticate, open, dispatch, close.

use std::sync::Arc;

use campus_common::id::{prefix, prefixed_ulid};
use serde_json::json;
use tokio::sync::mpsc;

use super::events::{parse_frame, ClientEvent, ClientFrame, EventName, ServerFrame};
use super::presence::PresenceTracker;
use super::registry::SessionRegistry;
use super::router::{EventRouter, Group};
use super::session::{Connection, SessionUser};
use crate::auth::jwt::CredentialVerifier;
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::position::Position;
use crate::stores::{MessageStore, PositionStore, RoomStore};

/// Tunables the gateway needs from configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub spawn: Position,
    pub chat_max_length: usize,
    pub outbound_buffer: usize,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            spawn: Position::spawn(config.spawn_x, config.spawn_y, config.spawn_map.clone()),
            chat_max_length: config.chat_max_length,
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            spawn: Position::spawn(400.0, 300.0, "main"),
            chat_max_length: 1000,
            outbound_buffer: 256,
        }
    }
}

/// External stores the gateway reads and writes.
#[derive(Clone)]
pub struct GatewayStores {
    pub positions: Arc<dyn PositionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub rooms: Arc<dyn RoomStore>,
}

/// Owns every piece of realtime state: the registry, presence and router.
pub struct Gateway {
    pub registry: Arc<SessionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub router: EventRouter,
    pub(super) verifier: Arc<dyn CredentialVerifier>,
    pub(super) stores: GatewayStores,
    pub(super) settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        stores: GatewayStores,
        settings: GatewaySettings,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceTracker::new());
        let router = EventRouter::new(registry.clone(), presence.clone());
        Self {
            registry,
            presence,
            router,
            verifier,
            stores,
            settings,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Verify a presented credential. No gateway state is touched.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<SessionUser, GatewayError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::authentication("Authentication token required"))?;
        self.verifier.verify(token).await
    }

    /// Bring an authenticated user online on a new connection.
    ///
    /// Returns the connection and the receiving half of its outbound queue.
    pub async fn open(
        &self,
        user: SessionUser,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Arc<ServerFrame>>), GatewayError> {
        let position = self.initial_position(&user.user_id).await;

        let (tx, rx) = mpsc::channel(self.settings.outbound_buffer);
        let conn = Arc::new(Connection::new(prefixed_ulid(prefix::CONNECTION), user, tx));

        // Everything below is synchronous: no other event can observe a
        // half-opened connection.
        self.registry.register(conn.clone())?;
        self.registry.subscribe(&conn.id, Group::Global);
        self.registry
            .subscribe(&conn.id, Group::User(conn.user.user_id.clone()));
        self.presence
            .upsert(&conn.user.user_id, &conn.user.display_name, position.clone());

        self.router.broadcast_except(
            &Group::Global,
            &conn.id,
            EventName::USER_JOINED,
            json!({ "user": &conn.user, "position": position }),
        );
        self.send_online_users(&conn.id);

        tracing::info!(
            conn_id = %conn.id,
            user_id = %conn.user.user_id,
            map_id = %position.map_id,
            "gateway connection opened"
        );

        Ok((conn, rx))
    }

    /// Authenticate and open in one step.
    pub async fn connect(
        &self,
        token: Option<&str>,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Arc<ServerFrame>>), GatewayError> {
        let user = self.authenticate(token).await?;
        self.open(user).await
    }

    async fn initial_position(&self, user_id: &str) -> Position {
        match self.stores.positions.read(user_id).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                let spawn = self.settings.spawn.clone();
                if let Err(err) = self.stores.positions.upsert(user_id, &spawn).await {
                    tracing::warn!(?err, %user_id, "failed to persist spawn position");
                }
                spawn
            }
            Err(err) => {
                tracing::warn!(?err, %user_id, "failed to read stored position, using spawn");
                self.settings.spawn.clone()
            }
        }
    }

    /// Handle one raw text frame from an authenticated connection.
    pub async fn handle_text(&self, conn: &Arc<Connection>, text: &str) {
        if !conn.is_open() {
            return;
        }
        match parse_frame(text) {
            Ok(frame) => self.handle_frame(conn, frame).await,
            Err(err) => self.report(conn, err),
        }
    }

    pub async fn handle_frame(&self, conn: &Arc<Connection>, frame: ClientFrame) {
        if !conn.is_open() {
            return;
        }
        tracing::debug!(conn_id = %conn.id, event = %frame.event, "inbound event");
        let result = match ClientEvent::parse(frame) {
            Ok(event) => self.handle_event(conn, event).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.report(conn, err);
        }
    }

    /// Log an error by kind and tell the originating connection about it.
    pub fn report(&self, conn: &Connection, err: GatewayError) {
        match &err {
            GatewayError::Validation { .. } | GatewayError::Authorization { .. } => {
                tracing::debug!(conn_id = %conn.id, code = err.code(), %err, "event rejected");
            }
            GatewayError::Authentication(_) => {
                tracing::debug!(conn_id = %conn.id, %err, "authentication rejected");
            }
            GatewayError::Persistence { .. } => {
                tracing::warn!(conn_id = %conn.id, code = err.code(), ?err, "persistence failed");
            }
            GatewayError::Internal(_) => {
                tracing::error!(conn_id = %conn.id, user_id = %conn.user.user_id, ?err, "internal gateway error");
            }
        }
        self.router
            .unicast_frame(conn, Arc::new(ServerFrame::error(&err)));
    }

    /// Tear down a connection. Only the first call for a connection does
    /// anything; later calls return `false`.
    pub fn close(&self, conn: &Connection) -> bool {
        if !conn.mark_closed() {
            return false;
        }

        let prior_room = self.registry.current_room(&conn.id);
        self.presence.remove(&conn.user.user_id);
        self.registry.unregister(&conn.id);

        self.router.broadcast(
            &Group::Global,
            EventName::USER_LEFT,
            json!({ "userId": conn.user.user_id, "userName": conn.user.display_name }),
        );
        if let Some(room_id) = &prior_room {
            self.router.broadcast(
                &Group::Room(room_id.clone()),
                EventName::ROOM_USER_LEFT,
                json!({
                    "userId": conn.user.user_id,
                    "userName": conn.user.display_name,
                    "roomId": room_id,
                }),
            );
        }

        tracing::info!(
            conn_id = %conn.id,
            user_id = %conn.user.user_id,
            room_id = prior_room.as_deref(),
            "gateway connection closed"
        );
        true
    }

    pub(super) fn send_online_users(&self, conn_id: &str) -> bool {
        let snapshot = self.presence.snapshot_all();
        self.router
            .unicast(conn_id, EventName::USERS_ONLINE, json!(snapshot))
    }
}
