//! Process-wide map of room name to [`Room`].
//!
//! Passed explicitly to the connection handlers; tests build their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use super::connctx::{AuthoredIds, ConnectionId};
use super::room::Room;
use crate::error::HubError;

/// Aggregated counts across every room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub connections: usize,
    pub presence_entries: usize,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    max_connections_per_room: Option<usize>,
}

impl RoomRegistry {
    pub fn new(max_connections_per_room: Option<usize>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            max_connections_per_room,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the room for `name`, creating it on first use.
    pub fn resolve(&self, name: &str) -> Arc<Room> {
        Self::resolve_locked(&mut self.lock(), name)
    }

    fn resolve_locked(rooms: &mut HashMap<String, Arc<Room>>, name: &str) -> Arc<Room> {
        rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Creating room {}", name);
                Arc::new(Room::new(name))
            })
            .clone()
    }

    /// Resolve `name` and register a connection in it.
    ///
    /// Holds the registry lock throughout so eviction cannot remove the
    /// room between lookup and registration.
    pub(crate) fn join(
        &self,
        name: &str,
        id: ConnectionId,
        authored: AuthoredIds,
    ) -> Result<Arc<Room>, HubError> {
        let mut rooms = self.lock();
        let room = Self::resolve_locked(&mut rooms, name);
        room.register(id, authored, self.max_connections_per_room)?;
        Ok(room)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.lock().get(name).cloned()
    }

    /// Drop a room from the registry ("document destroyed").
    pub fn destroy(&self, name: &str) -> Option<Arc<Room>> {
        let removed = self.lock().remove(name);
        if removed.is_some() {
            info!("Room {} destroyed", name);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.lock().values().cloned().collect()
    }

    pub fn max_connections_per_room(&self) -> Option<usize> {
        self.max_connections_per_room
    }

    /// Destroy rooms that have been empty for at least `grace`.
    pub fn evict_idle(&self, now: Instant, grace: Duration) -> Vec<String> {
        let mut rooms = self.lock();
        let idle: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| {
                room.empty_since()
                    .is_some_and(|since| now.saturating_duration_since(since) >= grace)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &idle {
            rooms.remove(name);
            info!("Evicted idle room {}", name);
        }
        idle
    }

    /// Tombstone stale presence entries in every room. Returns how many.
    pub fn expire_presence(&self, now: Instant, timeout: Duration) -> usize {
        self.rooms()
            .iter()
            .map(|room| room.expire_presence(now, timeout).len())
            .sum()
    }

    pub fn stats(&self) -> RegistryStats {
        let rooms = self.rooms();
        RegistryStats {
            rooms: rooms.len(),
            connections: rooms.iter().map(|r| r.connection_count()).sum(),
            presence_entries: rooms.iter().map(|r| r.presence_len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_returns_same_instance() {
        let registry = RoomRegistry::default();
        let a = registry.resolve("doc-42");
        let b = registry.resolve("doc-42");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_names_distinct_rooms() {
        let registry = RoomRegistry::default();
        let a = registry.resolve("alpha");
        let b = registry.resolve("beta");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_destroy_then_resolve_creates_fresh_room() {
        let registry = RoomRegistry::default();
        let a = registry.resolve("doc");
        assert!(registry.destroy("doc").is_some());
        assert!(registry.destroy("doc").is_none());
        let b = registry.resolve("doc");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_evict_idle_skips_occupied_rooms() {
        let registry = RoomRegistry::default();
        registry.resolve("empty");
        registry
            .join("busy", ConnectionId::from_raw(1), AuthoredIds::default())
            .unwrap();

        let later = Instant::now() + Duration::from_secs(120);
        let evicted = registry.evict_idle(later, Duration::from_secs(60));
        assert_eq!(evicted, vec!["empty".to_string()]);
        assert!(registry.get("busy").is_some());
        assert!(registry.get("empty").is_none());
    }

    #[test]
    fn test_evict_idle_respects_grace() {
        let registry = RoomRegistry::default();
        registry.resolve("fresh");
        let evicted = registry.evict_idle(Instant::now(), Duration::from_secs(60));
        assert!(evicted.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_join_enforces_capacity() {
        let registry = RoomRegistry::new(Some(1));
        registry
            .join("doc", ConnectionId::from_raw(1), AuthoredIds::default())
            .unwrap();
        let err = registry
            .join("doc", ConnectionId::from_raw(2), AuthoredIds::default())
            .unwrap_err();
        assert!(matches!(err, HubError::RoomFull { .. }));
        assert_eq!(registry.stats().connections, 1);
    }
}
