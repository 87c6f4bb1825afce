//! Presence relay: applies awareness frames, tracks which connection
//! authored which entry, and forwards presence deltas to peers.

use tracing::{debug, warn};
use yrs::sync::AwarenessUpdate;
use yrs::Subscription;

use super::codec;
use super::connctx::Connection;
use super::room::origin_of;
use crate::error::HubError;

/// Attach the presence listener of `conn`.
///
/// Changes caused by `conn` record newly added ids as authored by it;
/// changes from anywhere else are forwarded to it.
pub fn attach(conn: &Connection) -> Subscription {
    let id = conn.id();
    let own_origin = origin_of(id);
    let authored = conn.authored().clone();
    let outbound = conn.outbound().clone();
    conn.room().on_presence_update(move |awareness, event, origin| {
        if origin == Some(&own_origin) {
            if !event.added().is_empty() {
                authored.extend(event.added());
            }
            return;
        }
        let changed = event.all_changes();
        if changed.is_empty() {
            return;
        }
        let frame = match awareness.update_with_clients(changed) {
            Ok(update) => codec::encode_awareness(update),
            Err(e) => {
                warn!("Failed to encode presence change for {}: {}", id, e);
                return;
            }
        };
        if let Err(e) = outbound.send(frame) {
            debug!("Presence change not delivered to {}: {}", id, e);
        }
    })
}

/// Send the current presence entries to `conn`, if there are any.
pub fn send_snapshot(conn: &Connection) {
    if let Some(update) = conn.room().presence_snapshot() {
        conn.send(codec::encode_awareness(update));
    }
}

/// Handle an awareness update received on `conn`.
///
/// Authorship is claimed before the update is applied. A state that is not
/// valid JSON only costs the bookkeeping; the update is still applied.
pub fn handle(conn: &Connection, update: AwarenessUpdate) -> Result<(), HubError> {
    match codec::presence_entries(&update) {
        Ok(entries) => {
            let introduced: Vec<u64> = entries
                .iter()
                .filter(|entry| entry.state.is_some())
                .map(|entry| entry.client_id)
                .collect();
            if !introduced.is_empty() {
                conn.room().claim_presence(conn.id(), &introduced);
            }
        }
        Err(e) => {
            warn!(
                "Could not track presence authorship for {} in room {}: {}",
                conn.id(),
                conn.room().name(),
                e
            );
        }
    }

    match conn.room().apply_presence(update, conn.id())? {
        Some(summary) => debug!(
            "Presence from {} in room {}: +{} ~{} -{}",
            conn.id(),
            conn.room().name(),
            summary.added.len(),
            summary.updated.len(),
            summary.removed.len()
        ),
        None => debug!("Stale presence from {} in room {}", conn.id(), conn.room().name()),
    }
    Ok(())
}
