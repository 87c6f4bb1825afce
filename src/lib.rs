//! Real-time collaboration hub: relays CRDT document updates and presence
//! between the WebSocket connections sharing a room.

pub mod config;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod websocket;
pub mod ws;

use std::sync::Arc;

use config::Config;
use ws::RoomRegistry;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new(config.max_connections_per_room)),
            config: Arc::new(config),
        }
    }
}
