//! Registry of live gateway connections and their group subscriptions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::router::Group;
use super::session::{Connection, SessionUser};
use crate::error::GatewayError;

#[derive(Default)]
struct Inner {
    connections: HashMap<String, Arc<Connection>>,
    by_user: HashMap<String, HashSet<String>>,
    groups: HashMap<Group, HashSet<String>>,
    subscriptions: HashMap<String, HashSet<Group>>,
}

/// A connection removed by `unregister`, with the groups it belonged to.
pub struct RemovedConnection {
    pub connection: Arc<Connection>,
    pub groups: HashSet<Group>,
}

/// Result of a successful `enter_room`.
#[derive(Debug, PartialEq, Eq)]
pub struct RoomChange {
    /// The room the connection was in before, if any.
    pub left: Option<String>,
}

/// Shared registry of authenticated connections.
///
/// One `RwLock` guards every map so a broadcast always resolves its
/// recipients against a single consistent snapshot. The lock is never held
/// across an `.await`.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Registering an id twice is a programming error.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), GatewayError> {
        let mut inner = self.inner.write();
        if inner.connections.contains_key(&connection.id) {
            return Err(GatewayError::internal(format!(
                "connection {} is already registered",
                connection.id
            )));
        }
        inner
            .by_user
            .entry(connection.user.user_id.clone())
            .or_default()
            .insert(connection.id.clone());
        inner.subscriptions.insert(connection.id.clone(), HashSet::new());
        inner.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove a connection and all its subscriptions. Unknown ids are a no-op.
    pub fn unregister(&self, connection_id: &str) -> Option<RemovedConnection> {
        let mut inner = self.inner.write();
        let connection = inner.connections.remove(connection_id)?;

        if let Some(ids) = inner.by_user.get_mut(&connection.user.user_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                inner.by_user.remove(&connection.user.user_id);
            }
        }

        let groups = inner.subscriptions.remove(connection_id).unwrap_or_default();
        for group in &groups {
            if let Some(members) = inner.groups.get_mut(group) {
                members.remove(connection_id);
                if members.is_empty() {
                    inner.groups.remove(group);
                }
            }
        }

        Some(RemovedConnection { connection, groups })
    }

    pub fn lookup(&self, connection_id: &str) -> Option<SessionUser> {
        self.inner
            .read()
            .connections
            .get(connection_id)
            .map(|c| c.user.clone())
    }

    pub fn connection(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.inner.read().connections.get(connection_id).cloned()
    }

    pub fn find_connections_by_user_id(&self, user_id: &str) -> HashSet<String> {
        self.inner
            .read()
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Add a connection to a group. Returns `false` if it was already a
    /// member or the connection is unknown.
    pub fn subscribe(&self, connection_id: &str, group: Group) -> bool {
        let mut inner = self.inner.write();
        let Some(subs) = inner.subscriptions.get_mut(connection_id) else {
            return false;
        };
        if !subs.insert(group.clone()) {
            return false;
        }
        inner
            .groups
            .entry(group)
            .or_default()
            .insert(connection_id.to_string());
        true
    }

    /// Remove a connection from a group. Returns `false` if it was not a member.
    pub fn unsubscribe(&self, connection_id: &str, group: &Group) -> bool {
        let mut inner = self.inner.write();
        let removed = inner
            .subscriptions
            .get_mut(connection_id)
            .is_some_and(|subs| subs.remove(group));
        if removed {
            if let Some(members) = inner.groups.get_mut(group) {
                members.remove(connection_id);
                if members.is_empty() {
                    inner.groups.remove(group);
                }
            }
        }
        removed
    }

    /// The room a connection is currently in, if any.
    pub fn current_room(&self, connection_id: &str) -> Option<String> {
        self.inner
            .read()
            .subscriptions
            .get(connection_id)?
            .iter()
            .find_map(|g| match g {
                Group::Room(id) => Some(id.clone()),
                _ => None,
            })
    }

    /// Distinct users with at least one connection in `room_id`.
    pub fn room_users(&self, room_id: &str) -> HashSet<String> {
        let inner = self.inner.read();
        Self::users_in(&inner, &Group::Room(room_id.to_string()))
    }

    /// Move a connection into `room_id`, leaving the room it was in.
    ///
    /// `admit` sees the room's current users and runs under the write lock,
    /// so no other entrant can be admitted between the check and the
    /// subscription. Returns `Ok(None)` if the connection is not registered.
    pub fn enter_room<E>(
        &self,
        connection_id: &str,
        room_id: &str,
        admit: impl FnOnce(&HashSet<String>) -> Result<(), E>,
    ) -> Result<Option<RoomChange>, E> {
        let mut inner = self.inner.write();
        if !inner.subscriptions.contains_key(connection_id) {
            return Ok(None);
        }

        let group = Group::Room(room_id.to_string());
        admit(&Self::users_in(&inner, &group))?;

        let subs = inner.subscriptions.entry(connection_id.to_string()).or_default();
        let left: Vec<Group> = subs
            .iter()
            .filter(|g| matches!(g, Group::Room(_)) && **g != group)
            .cloned()
            .collect();
        for g in &left {
            subs.remove(g);
        }
        subs.insert(group.clone());

        for g in &left {
            if let Some(members) = inner.groups.get_mut(g) {
                members.remove(connection_id);
                if members.is_empty() {
                    inner.groups.remove(g);
                }
            }
        }
        inner
            .groups
            .entry(group)
            .or_default()
            .insert(connection_id.to_string());

        Ok(Some(RoomChange {
            left: left.into_iter().find_map(|g| match g {
                Group::Room(id) => Some(id),
                _ => None,
            }),
        }))
    }

    fn users_in(inner: &Inner, group: &Group) -> HashSet<String> {
        inner
            .groups
            .get(group)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id))
                    .map(|c| c.user.user_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connections subscribed to `group`.
    pub fn members_of(&self, group: &Group) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        inner
            .groups
            .get(group)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every connection belonging to any of `user_ids`.
    pub fn connections_of_users<'a>(
        &self,
        user_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        user_ids
            .into_iter()
            .filter_map(|user_id| inner.by_user.get(user_id))
            .flatten()
            .filter_map(|id| inner.connections.get(id).cloned())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
