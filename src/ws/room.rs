//! A room: one shared document, its awareness table, the connections on it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};
use yrs::sync::awareness::{AwarenessUpdateSummary, Event};
use yrs::sync::{Awareness, AwarenessUpdate};
use yrs::updates::decoder::Decode;
use yrs::{Doc, Origin, ReadTxn, StateVector, Subscription, Transact, Update};

use super::connctx::{AuthoredIds, ConnectionId};
use crate::error::HubError;

/// Transaction and awareness origin used for changes received from `id`.
pub fn origin_of(id: ConnectionId) -> Origin {
    Origin::from(id.as_u64())
}

struct RoomInner {
    /// Owns the room's `Doc`.
    awareness: Awareness,
    connections: BTreeMap<ConnectionId, AuthoredIds>,
    empty_since: Option<Instant>,
}

pub struct Room {
    name: String,
    /// Zero point of the awareness clock, in milliseconds.
    epoch: Instant,
    inner: Mutex<RoomInner>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        let epoch = Instant::now();
        let awareness = Awareness::with_clock(Doc::new(), move || {
            epoch.elapsed().as_millis() as u64
        });
        Self {
            name: name.into(),
            epoch,
            inner: Mutex::new(RoomInner {
                awareness,
                connections: BTreeMap::new(),
                empty_since: Some(epoch),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.lock().connections.keys().copied().collect()
    }

    pub(crate) fn register(
        &self,
        id: ConnectionId,
        authored: AuthoredIds,
        limit: Option<usize>,
    ) -> Result<(), HubError> {
        let mut inner = self.lock();
        if let Some(limit) = limit {
            if inner.connections.len() >= limit {
                return Err(HubError::RoomFull {
                    room: self.name.clone(),
                    limit,
                });
            }
        }
        inner.connections.insert(id, authored);
        inner.empty_since = None;
        Ok(())
    }

    pub(crate) fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let removed = inner.connections.remove(&id).is_some();
        if inner.connections.is_empty() && inner.empty_since.is_none() {
            inner.empty_since = Some(Instant::now());
        }
        removed
    }

    /// When the room last became empty, `None` while it has connections.
    pub fn empty_since(&self) -> Option<Instant> {
        self.lock().empty_since
    }

    /// Observe every merge that changed the document. The listener gets the
    /// transaction origin and the v1 update, and runs under the room lock.
    pub fn on_doc_update<F>(&self, listener: F) -> Result<Subscription, HubError>
    where
        F: Fn(Option<&Origin>, &[u8]) + Send + Sync + 'static,
    {
        self.lock()
            .awareness
            .doc()
            .observe_update_v1(move |txn, event| listener(txn.origin(), &event.update))
            .map_err(|e| HubError::Observe(e.to_string()))
    }

    /// Observe presence changes. The listener runs under the room lock.
    pub fn on_presence_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Awareness, &Event, Option<&Origin>) + Send + Sync + 'static,
    {
        self.lock().awareness.on_update(listener)
    }

    pub fn state_vector(&self) -> StateVector {
        let inner = self.lock();
        let txn = inner.awareness.doc().transact();
        txn.state_vector()
    }

    /// Updates the holder of `state_vector` is missing.
    pub fn diff_from_state_vector(&self, state_vector: &StateVector) -> Vec<u8> {
        let inner = self.lock();
        let txn = inner.awareness.doc().transact();
        txn.encode_diff_v1(state_vector)
    }

    /// Merge an update received from `origin`.
    pub fn apply_update(&self, update: &[u8], origin: ConnectionId) -> Result<(), HubError> {
        let update = Update::decode_v1(update).map_err(|e| HubError::Merge(e.to_string()))?;
        let inner = self.lock();
        let mut txn = inner.awareness.doc().transact_mut_with(origin_of(origin));
        txn.apply_update(update)
            .map_err(|e| HubError::Merge(e.to_string()))?;
        // listeners run when the transaction commits
        drop(txn);
        Ok(())
    }

    /// Apply a presence update received from `origin`. `None` means nothing
    /// changed.
    pub fn apply_presence(
        &self,
        update: AwarenessUpdate,
        origin: ConnectionId,
    ) -> Result<Option<AwarenessUpdateSummary>, HubError> {
        self.lock()
            .awareness
            .apply_update_summary_with(update, origin_of(origin))
            .map_err(|e| HubError::Presence(e.to_string()))
    }

    /// Clear the states of `ids`, with no origin. Returns the ids that
    /// actually held a state.
    pub fn remove_presence(&self, ids: &[u64]) -> Vec<u64> {
        let inner = self.lock();
        remove_live(&inner.awareness, ids.iter().copied())
    }

    /// Every live state, `None` when there are none.
    pub fn presence_snapshot(&self) -> Option<AwarenessUpdate> {
        let inner = self.lock();
        match inner.awareness.update() {
            Ok(update) if !update.clients.is_empty() => Some(update),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to snapshot presence of room {}: {}", self.name, e);
                None
            }
        }
    }

    pub fn presence_states(&self) -> BTreeMap<u64, Value> {
        let inner = self.lock();
        inner
            .awareness
            .iter()
            .filter_map(|(id, state)| {
                let json = state.data?;
                serde_json::from_str::<Value>(&json).ok().map(|value| (id, value))
            })
            .collect()
    }

    pub fn presence_len(&self) -> usize {
        let inner = self.lock();
        inner
            .awareness
            .iter()
            .filter(|(_, state)| state.data.is_some())
            .count()
    }

    /// Make `owner` the sole author of `ids`.
    pub(crate) fn claim_presence(&self, owner: ConnectionId, ids: &[u64]) {
        let inner = self.lock();
        for (id, authored) in &inner.connections {
            if *id == owner {
                authored.extend(ids);
            } else {
                authored.remove_all(ids);
            }
        }
    }

    /// Remove every presence state no remaining connection authors.
    pub(crate) fn sweep_orphans(&self) -> Vec<u64> {
        let inner = self.lock();
        let live: BTreeSet<u64> = inner
            .connections
            .values()
            .flat_map(|authored| authored.snapshot())
            .collect();
        let orphans: Vec<u64> = inner
            .awareness
            .iter()
            .filter(|(id, state)| state.data.is_some() && !live.contains(id))
            .map(|(id, _)| id)
            .collect();
        if orphans.is_empty() {
            return orphans;
        }
        debug!("Sweeping {} orphaned presence entries in room {}", orphans.len(), self.name);
        remove_live(&inner.awareness, orphans)
    }

    /// Clear presence states not renewed within `timeout` of `now`.
    pub fn expire_presence(&self, now: Instant, timeout: Duration) -> Vec<u64> {
        let now_ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let timeout_ms = timeout.as_millis() as u64;
        let inner = self.lock();
        let stale: Vec<u64> = inner
            .awareness
            .iter()
            .filter(|(_, state)| {
                state.data.is_some() && now_ms.saturating_sub(state.last_updated) >= timeout_ms
            })
            .map(|(id, _)| id)
            .collect();
        if stale.is_empty() {
            return stale;
        }
        remove_live(&inner.awareness, stale)
    }

    /// Run `f` against the shared document.
    pub fn with_doc<R>(&self, f: impl FnOnce(&Doc) -> R) -> R {
        f(self.lock().awareness.doc())
    }
}

/// `remove_state` bumps the clock of tombstones too, so only clear ids
/// that still hold a state.
fn remove_live(awareness: &Awareness, ids: impl IntoIterator<Item = u64>) -> Vec<u64> {
    let live: BTreeSet<u64> = awareness
        .iter()
        .filter(|(_, state)| state.data.is_some())
        .map(|(id, _)| id)
        .collect();
    let removed: BTreeSet<u64> = ids.into_iter().filter(|id| live.contains(id)).collect();
    for id in &removed {
        awareness.remove_state(*id);
    }
    removed.into_iter().collect()
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};
    use yrs::{GetString, Text};

    use crate::models::AwarenessEntry;
    use crate::ws::codec;

    fn text_update(content: &str) -> Vec<u8> {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("content");
        let mut txn = doc.transact_mut();
        text.insert(&mut txn, 0, content);
        drop(txn);
        let update = doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default());
        update
    }

    #[test]
    fn test_new_room_has_empty_state_vector() {
        let room = Room::new("alpha");
        assert_eq!(room.state_vector(), StateVector::default());
        assert_eq!(room.connection_count(), 0);
        assert!(room.empty_since().is_some());
        assert!(room.presence_snapshot().is_none());
    }

    #[test]
    fn test_apply_update_reports_origin() {
        let room = Room::new("alpha");
        let seen: Arc<StdMutex<Vec<Option<Origin>>>> = Arc::default();
        let sink = seen.clone();
        let _sub = room
            .on_doc_update(move |origin, _| sink.lock().unwrap().push(origin.cloned()))
            .unwrap();

        let origin = ConnectionId::from_raw(11);
        room.apply_update(&text_update("hello"), origin).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(origin_of(origin))]);
        let content = room.with_doc(|doc| {
            let text = doc.get_or_insert_text("content");
            let txn = doc.transact();
            text.get_string(&txn)
        });
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_malformed_update_is_merge_error() {
        let room = Room::new("alpha");
        let err = room
            .apply_update(&[0xff, 0xff, 0xff], ConnectionId::from_raw(1))
            .unwrap_err();
        assert!(matches!(err, HubError::Merge(_)));
    }

    #[test]
    fn test_diff_is_idempotent() {
        let room = Room::new("alpha");
        room.apply_update(&text_update("abc"), ConnectionId::from_raw(1))
            .unwrap();
        let first = room.diff_from_state_vector(&StateVector::default());
        let second = room.diff_from_state_vector(&StateVector::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_register_respects_limit() {
        let room = Room::new("alpha");
        room.register(ConnectionId::from_raw(1), AuthoredIds::default(), Some(1))
            .unwrap();
        let err = room
            .register(ConnectionId::from_raw(2), AuthoredIds::default(), Some(1))
            .unwrap_err();
        assert!(matches!(err, HubError::RoomFull { limit: 1, .. }));
        assert!(room.empty_since().is_none());

        assert!(room.unregister(ConnectionId::from_raw(1)));
        assert!(room.empty_since().is_some());
    }

    #[test]
    fn test_claim_moves_authorship() {
        let room = Room::new("alpha");
        let (a, b) = (AuthoredIds::default(), AuthoredIds::default());
        room.register(ConnectionId::from_raw(1), a.clone(), None).unwrap();
        room.register(ConnectionId::from_raw(2), b.clone(), None).unwrap();

        room.claim_presence(ConnectionId::from_raw(1), &[5]);
        room.claim_presence(ConnectionId::from_raw(2), &[5]);
        assert!(!a.contains(5));
        assert!(b.contains(5));
    }

    #[test]
    fn test_presence_events_carry_connection_origin() {
        let room = Room::new("alpha");
        let seen: Arc<StdMutex<Vec<(Vec<u64>, Option<Origin>)>>> = Arc::default();
        let sink = seen.clone();
        let _sub = room.on_presence_update(move |_, event, origin| {
            sink.lock().unwrap().push((event.all_changes(), origin.cloned()));
        });

        let update = codec::presence_update(&[AwarenessEntry::new(5, 1, Some(json!("x")))]);
        room.apply_presence(update, ConnectionId::from_raw(3)).unwrap();
        assert_eq!(room.remove_presence(&[5, 6]), vec![5]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (vec![5], Some(origin_of(ConnectionId::from_raw(3)))));
        assert_eq!(seen[1], (vec![5], None));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_remove_skips_cleared_states() {
        let room = Room::new("alpha");
        let update = codec::presence_update(&[AwarenessEntry::new(5, 1, Some(json!("x")))]);
        room.apply_presence(update, ConnectionId::from_raw(1)).unwrap();

        assert_eq!(room.remove_presence(&[5]), vec![5]);
        assert!(room.remove_presence(&[5]).is_empty());
        assert_eq!(room.presence_len(), 0);
    }

    #[test]
    fn test_sweep_removes_unowned_states() {
        let room = Room::new("alpha");
        let owner = AuthoredIds::default();
        room.register(ConnectionId::from_raw(1), owner.clone(), None).unwrap();
        let update = codec::presence_update(&[
            AwarenessEntry::new(1, 1, Some(json!("mine"))),
            AwarenessEntry::new(2, 1, Some(json!("stray"))),
        ]);
        room.apply_presence(update, ConnectionId::from_raw(1)).unwrap();
        owner.extend(&[1]);

        assert_eq!(room.sweep_orphans(), vec![2]);
        assert_eq!(room.presence_states().keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_expire_uses_last_renewal() {
        let room = Room::new("alpha");
        let update = codec::presence_update(&[AwarenessEntry::new(7, 1, Some(json!("x")))]);
        room.apply_presence(update, ConnectionId::from_raw(1)).unwrap();

        let timeout = Duration::from_secs(30);
        assert!(room.expire_presence(Instant::now(), timeout).is_empty());
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(room.expire_presence(later, timeout), vec![7]);
        assert!(room.expire_presence(later, timeout).is_empty());
    }
}
