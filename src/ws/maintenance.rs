//! Room maintenance background task.
//!
//! Periodically tombstones presence entries that were not renewed in time
//! and destroys rooms that have stayed empty past their grace period.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is triggered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::registry::RoomRegistry;

/// Timing knobs of the maintenance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenancePolicy {
    pub interval: Duration,
    /// `None` disables presence expiry.
    pub presence_timeout: Option<Duration>,
    /// `None` disables idle room eviction.
    pub room_idle_grace: Option<Duration>,
}

/// What one pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_presence: usize,
    pub evicted_rooms: Vec<String>,
}

/// Run a single maintenance pass at `now`.
pub fn run_once(
    registry: &RoomRegistry,
    policy: &MaintenancePolicy,
    now: Instant,
) -> MaintenanceReport {
    let expired_presence = policy
        .presence_timeout
        .map(|timeout| registry.expire_presence(now, timeout))
        .unwrap_or(0);
    let evicted_rooms = policy
        .room_idle_grace
        .map(|grace| registry.evict_idle(now, grace))
        .unwrap_or_default();
    MaintenanceReport {
        expired_presence,
        evicted_rooms,
    }
}

/// Start the maintenance loop. Returns when `cancel_token` is triggered.
#[instrument(skip_all, name = "hub.task.maintenance")]
pub async fn start_maintenance(
    registry: Arc<RoomRegistry>,
    policy: MaintenancePolicy,
    cancel_token: CancellationToken,
) {
    info!(
        interval_secs = policy.interval.as_secs(),
        presence_timeout_secs = ?policy.presence_timeout.map(|d| d.as_secs()),
        room_idle_grace_secs = ?policy.room_idle_grace.map(|d| d.as_secs()),
        "Starting maintenance task"
    );

    let mut interval = tokio::time::interval(policy.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = run_once(&registry, &policy, Instant::now());
                if report.expired_presence > 0 || !report.evicted_rooms.is_empty() {
                    info!(
                        expired_presence = report.expired_presence,
                        evicted_rooms = report.evicted_rooms.len(),
                        "Maintenance pass removed stale state"
                    );
                } else {
                    debug!("Maintenance pass found nothing to do");
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Maintenance task received shutdown signal, exiting");
                break;
            }
        }
    }

    info!("Maintenance task stopped");
}
