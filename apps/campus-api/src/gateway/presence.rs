//! In-memory presence: who is online and where their avatar stands.
//!
//! Presence is keyed by **user**, not connection. Snapshots are returned in
//! first-seen order, overall and per map.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::position::Position;

/// One user's live presence.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    #[serde(rename = "userName")]
    pub display_name: String,
    #[serde(flatten)]
    pub position: Position,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, PresenceEntry>,
    order: Vec<String>,
    map_order: HashMap<String, Vec<String>>,
}

impl Inner {
    fn detach_from_map(&mut self, map_id: &str, user_id: &str) {
        if let Some(users) = self.map_order.get_mut(map_id) {
            users.retain(|u| u != user_id);
            if users.is_empty() {
                self.map_order.remove(map_id);
            }
        }
    }
}

#[derive(Default)]
pub struct PresenceTracker {
    inner: RwLock<Inner>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the user's entry. Returns the previous entry, if any.
    ///
    /// Updates within the same map keep the user's place; moving to another
    /// map puts the user last in that map's order.
    pub fn upsert(
        &self,
        user_id: &str,
        display_name: &str,
        position: Position,
    ) -> Option<PresenceEntry> {
        let mut inner = self.inner.write();
        let new_map = position.map_id.clone();
        let entry = PresenceEntry {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            position,
        };

        let previous = inner.entries.insert(user_id.to_string(), entry);
        match &previous {
            Some(prev) if prev.position.map_id == new_map => {}
            Some(prev) => {
                let old_map = prev.position.map_id.clone();
                inner.detach_from_map(&old_map, user_id);
                inner
                    .map_order
                    .entry(new_map)
                    .or_default()
                    .push(user_id.to_string());
            }
            None => {
                inner.order.push(user_id.to_string());
                inner
                    .map_order
                    .entry(new_map)
                    .or_default()
                    .push(user_id.to_string());
            }
        }
        previous
    }

    /// Drop the user's entry. Removing an absent user is a no-op.
    pub fn remove(&self, user_id: &str) -> Option<PresenceEntry> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(user_id)?;
        inner.order.retain(|u| u != user_id);
        inner.detach_from_map(&removed.position.map_id, user_id);
        Some(removed)
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceEntry> {
        self.inner.read().entries.get(user_id).cloned()
    }

    pub fn snapshot_for_map(&self, map_id: &str) -> Vec<PresenceEntry> {
        let inner = self.inner.read();
        inner
            .map_order
            .get(map_id)
            .map(|users| {
                users
                    .iter()
                    .filter_map(|u| inner.entries.get(u).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot_all(&self) -> Vec<PresenceEntry> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|u| inner.entries.get(u).cloned())
            .collect()
    }

    /// User ids currently on `map_id`, in map order.
    pub fn users_on_map(&self, map_id: &str) -> Vec<String> {
        self.inner
            .read()
            .map_order
            .get(map_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64, map: &str) -> Position {
        Position::spawn(x, 0.0, map)
    }

    fn ids(entries: &[PresenceEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.user_id.as_str()).collect()
    }

    #[test]
    fn last_write_wins_and_remove_clears() {
        let tracker = PresenceTracker::new();
        tracker.upsert("u1", "Aiko", at(1.0, "main"));
        let mut moving = at(2.0, "main");
        moving.is_moving = true;
        tracker.upsert("u1", "Aiko", moving.clone());

        assert_eq!(tracker.get("u1").unwrap().position, moving);
        assert!(tracker.remove("u1").is_some());
        assert!(tracker.get("u1").is_none());
        assert!(tracker.remove("u1").is_none());
        assert!(tracker.snapshot_all().is_empty());
        assert!(tracker.snapshot_for_map("main").is_empty());
    }

    #[test]
    fn snapshots_keep_first_seen_order() {
        let tracker = PresenceTracker::new();
        tracker.upsert("u1", "A", at(1.0, "main"));
        tracker.upsert("u2", "B", at(1.0, "main"));
        tracker.upsert("u3", "C", at(1.0, "library"));
        tracker.upsert("u1", "A", at(5.0, "main"));

        assert_eq!(ids(&tracker.snapshot_all()), ["u1", "u2", "u3"]);
        assert_eq!(ids(&tracker.snapshot_for_map("main")), ["u1", "u2"]);
        assert_eq!(tracker.snapshot_for_map("main")[0].position.x, 5.0);
    }

    #[test]
    fn changing_maps_moves_user_to_end_of_new_map() {
        let tracker = PresenceTracker::new();
        tracker.upsert("u1", "A", at(1.0, "library"));
        tracker.upsert("u2", "B", at(1.0, "main"));
        tracker.upsert("u1", "A", at(1.0, "main"));

        assert_eq!(ids(&tracker.snapshot_for_map("main")), ["u2", "u1"]);
        assert!(tracker.snapshot_for_map("library").is_empty());
        assert_eq!(tracker.users_on_map("main"), ["u2", "u1"]);
        assert_eq!(ids(&tracker.snapshot_all()), ["u1", "u2"]);
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = PresenceEntry {
            user_id: "u1".into(),
            display_name: "Aiko".into(),
            position: at(10.0, "main"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userName"], "Aiko");
        assert_eq!(json["mapId"], "main");
        assert_eq!(json["x"], 10.0);
    }
}
