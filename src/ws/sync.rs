//! Document sync: state-vector handshake and update relay.

use tracing::debug;
use yrs::sync::SyncMessage;
use yrs::Subscription;

use super::codec;
use super::connctx::Connection;
use super::room::origin_of;
use crate::error::HubError;

/// Attach the listener relaying document updates to `conn`, skipping
/// updates `conn` itself produced.
pub fn attach(conn: &Connection) -> Result<Subscription, HubError> {
    let own_origin = origin_of(conn.id());
    let outbound = conn.outbound().clone();
    let id = conn.id();
    conn.room().on_doc_update(move |origin, update| {
        if origin == Some(&own_origin) {
            return;
        }
        let frame = codec::encode_sync(SyncMessage::Update(update.to_vec()));
        if let Err(e) = outbound.send(frame) {
            debug!("Update not delivered to {}: {}", id, e);
        }
    })
}

/// Announce the room's state vector to a newly opened connection.
pub fn send_initial(conn: &Connection) {
    let sv = conn.room().state_vector();
    conn.send(codec::encode_sync(SyncMessage::SyncStep1(sv)));
}

/// Handle a sync message received on `conn`.
///
/// Step 1 is answered with the diff the peer is missing. Step 2 and
/// updates are merged under the connection's origin and get no reply.
pub fn handle(conn: &Connection, msg: SyncMessage) -> Result<(), HubError> {
    match msg {
        SyncMessage::SyncStep1(state_vector) => {
            let diff = conn.room().diff_from_state_vector(&state_vector);
            conn.send(codec::encode_sync(SyncMessage::SyncStep2(diff)));
        }
        SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
            conn.room().apply_update(&update, conn.id())?;
        }
    }
    Ok(())
}
