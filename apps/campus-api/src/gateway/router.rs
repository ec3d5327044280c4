//! Group resolution and fan-out to connection outbound queues.
//!
//! Fan-out is fire-and-forget: a connection that cannot take the event is
//! skipped and delivery continues with the rest.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::events::ServerFrame;
use super::presence::PresenceTracker;
use super::registry::SessionRegistry;
use super::session::Connection;

/// A named fan-out target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    /// Every connection.
    Global,
    /// Connections that entered the room.
    Room(String),
    /// Connections whose user currently stands on the map.
    Map(String),
    /// Every connection of one user.
    User(String),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Room(id) => write!(f, "room:{id}"),
            Self::Map(id) => write!(f, "map:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

pub struct EventRouter {
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
}

impl EventRouter {
    pub fn new(registry: Arc<SessionRegistry>, presence: Arc<PresenceTracker>) -> Self {
        Self { registry, presence }
    }

    fn resolve(&self, group: &Group) -> Vec<Arc<Connection>> {
        match group {
            Group::Global => self.registry.all(),
            Group::Room(_) | Group::User(_) => self.registry.members_of(group),
            Group::Map(map_id) => {
                let users = self.presence.users_on_map(map_id);
                self.registry
                    .connections_of_users(users.iter().map(String::as_str))
            }
        }
    }

    /// Send to every connection in `group`. Returns how many were queued.
    pub fn broadcast(&self, group: &Group, event: &str, data: Value) -> usize {
        self.broadcast_to_groups(std::slice::from_ref(group), None, event, data)
    }

    /// Send to every connection in `group` except `exclude`.
    pub fn broadcast_except(&self, group: &Group, exclude: &str, event: &str, data: Value) -> usize {
        self.broadcast_to_groups(std::slice::from_ref(group), Some(exclude), event, data)
    }

    /// Send once to each connection in the union of `groups`.
    pub fn broadcast_to_groups(
        &self,
        groups: &[Group],
        exclude: Option<&str>,
        event: &str,
        data: Value,
    ) -> usize {
        let frame = Arc::new(ServerFrame::new(event, data));
        let mut seen = HashSet::new();
        let mut delivered = 0;

        for group in groups {
            for conn in self.resolve(group) {
                if exclude == Some(conn.id.as_str()) || !seen.insert(conn.id.clone()) {
                    continue;
                }
                match conn.send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(reason) => {
                        tracing::debug!(conn_id = %conn.id, %group, event, ?reason, "skipped delivery");
                    }
                }
            }
        }

        tracing::debug!(event, delivered, "broadcast");
        delivered
    }

    /// Send to a single connection. Returns `false` if it could not be queued.
    pub fn unicast(&self, connection_id: &str, event: &str, data: Value) -> bool {
        let Some(conn) = self.registry.connection(connection_id) else {
            tracing::debug!(conn_id = %connection_id, event, "unicast to unknown connection");
            return false;
        };
        self.unicast_frame(&conn, Arc::new(ServerFrame::new(event, data)))
    }

    /// Send a prepared frame to a connection that may not be registered.
    pub fn unicast_frame(&self, conn: &Connection, frame: Arc<ServerFrame>) -> bool {
        match conn.send(frame) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(conn_id = %conn.id, ?reason, "unicast skipped");
                false
            }
        }
    }
}
