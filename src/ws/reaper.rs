//! Disconnect reaper: unwinds a closing connection's presence.

use tracing::debug;

use super::connctx::Connection;

/// What the reaper removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Entries the closing connection authored.
    pub released: Vec<u64>,
    /// Entries no remaining connection authored.
    pub swept: Vec<u64>,
}

/// Tear down `conn`:
/// 1. tombstone the entries it authored (peers see the removals),
/// 2. unregister it and detach its listeners,
/// 3. sweep entries that no remaining connection authors.
pub fn reap(conn: &mut Connection) -> ReapReport {
    let room = conn.room().clone();

    let authored = conn.authored().snapshot();
    let released = if authored.is_empty() {
        Vec::new()
    } else {
        room.remove_presence(&authored)
    };

    room.unregister(conn.id());
    conn.detach_listeners();

    let swept = room.sweep_orphans();
    if !swept.is_empty() {
        debug!(
            "Swept orphaned presence {:?} in room {} after {} closed",
            swept,
            room.name(),
            conn.id()
        );
    }

    ReapReport { released, swept }
}
