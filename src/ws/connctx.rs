use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use yrs::sync::Message;
use yrs::Subscription;

use super::registry::RoomRegistry;
use super::room::Room;
use super::{codec, presence, reaper, sync};
use crate::error::{DecodeError, HubError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Presence ids a connection is currently responsible for.
///
/// Shared between the connection, its presence listener and the room.
#[derive(Debug, Clone, Default)]
pub struct AuthoredIds(Arc<Mutex<BTreeSet<u64>>>);

impl AuthoredIds {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<u64>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extend(&self, ids: &[u64]) {
        self.lock().extend(ids.iter().copied());
    }

    pub fn remove_all(&self, ids: &[u64]) {
        let mut set = self.lock();
        for id in ids {
            set.remove(id);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains(&id)
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Write side of a socket: frames queued here are written by the socket task.
///
/// The queue is bounded. A peer that stops reading loses frames once it is
/// full instead of growing the hub's memory.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Vec<u8>>,
}

impl Outbound {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue `frame` without waiting. Listeners call this under the room
    /// lock, so it must never block.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), HubError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => HubError::Send("outbound queue full".to_string()),
            TrySendError::Closed(_) => HubError::Send("socket writer is gone".to_string()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One socket bound to one room.
pub struct Connection {
    id: ConnectionId,
    room: Arc<Room>,
    state: ConnectionState,
    authored: AuthoredIds,
    outbound: Outbound,
    doc_sub: Option<Subscription>,
    presence_sub: Option<Subscription>,
}

impl Connection {
    /// Join `room_name`, attach the relay listeners and send the initial
    /// state vector and presence snapshot.
    pub fn open(
        registry: &RoomRegistry,
        room_name: &str,
        outbound: Outbound,
    ) -> Result<Self, HubError> {
        let id = ConnectionId::next();
        let authored = AuthoredIds::default();
        let room = registry.join(room_name, id, authored.clone())?;

        let mut conn = Connection {
            id,
            room,
            state: ConnectionState::Connecting,
            authored,
            outbound,
            doc_sub: None,
            presence_sub: None,
        };
        conn.doc_sub = Some(sync::attach(&conn)?);
        conn.presence_sub = Some(presence::attach(&conn));
        conn.state = ConnectionState::Open;

        sync::send_initial(&conn);
        presence::send_snapshot(&conn);

        info!(
            "Connection {} joined room {} ({} connections)",
            conn.id,
            conn.room.name(),
            conn.room.connection_count()
        );
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn authored(&self) -> &AuthoredIds {
        &self.authored
    }

    pub(crate) fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Queue a frame for this connection only.
    pub fn send(&self, frame: Vec<u8>) {
        if let Err(e) = self.outbound.send(frame) {
            warn!("Failed to send to {} in room {}: {}", self.id, self.room.name(), e);
        }
    }

    /// Decode and dispatch one inbound frame. Failures drop the frame only.
    pub fn handle_frame(&self, frame: &[u8]) {
        if self.state != ConnectionState::Open {
            debug!("Ignoring frame for {} in state {:?}", self.id, self.state);
            return;
        }
        if let Err(e) = self.dispatch(frame) {
            warn!(
                "Dropping frame from {} in room {}: {}",
                self.id,
                self.room.name(),
                e
            );
        }
    }

    fn dispatch(&self, frame: &[u8]) -> Result<(), HubError> {
        let msg = codec::decode_frame(frame)?;
        debug!(
            "Received {} from {} in room {} ({} bytes)",
            codec::message_label(&msg),
            self.id,
            self.room.name(),
            frame.len()
        );
        match msg {
            Message::Sync(msg) => sync::handle(self, msg),
            Message::Awareness(update) => presence::handle(self, update),
            Message::AwarenessQuery => {
                presence::send_snapshot(self);
                Ok(())
            }
            other => {
                let label = codec::message_label(&other).to_string();
                Err(DecodeError::Unsupported(label).into())
            }
        }
    }

    /// Run the disconnect reaper. Idempotent.
    pub fn close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
        let report = reaper::reap(self);
        self.state = ConnectionState::Closed;
        info!(
            "Connection {} left room {} (released {}, swept {})",
            self.id,
            self.room.name(),
            report.released.len(),
            report.swept.len()
        );
    }

    /// Dropping a yrs subscription unsubscribes it.
    pub(crate) fn detach_listeners(&mut self) {
        self.doc_sub = None;
        self.presence_sub = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("room", &self.room.name())
            .field("state", &self.state)
            .finish()
    }
}
