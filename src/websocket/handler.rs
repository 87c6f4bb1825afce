use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Uri,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::handlers::health_response;
use crate::ws::{Connection, Outbound, RoomRegistry};
use crate::AppState;

/// Entry point for every path outside `/api`: upgrades join a room,
/// plain requests get the health report.
pub async fn collab_entry(
    ws: Option<WebSocketUpgrade>,
    uri: Uri,
    State(state): State<AppState>,
) -> Response {
    let Some(ws) = ws else {
        return Json(health_response(&state.registry)).into_response();
    };
    let room = room_name_from_path(uri.path(), &state.config.default_room);
    info!("New WebSocket connection attempt for room {}", room);
    let registry = state.registry.clone();
    let queue_capacity = state.config.outbound_queue_capacity;
    ws.on_upgrade(move |socket| handle_socket(socket, room, registry, queue_capacity))
}

/// First path segment after the leading slash, or `default` when empty.
pub fn room_name_from_path(path: &str, default: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Handle WebSocket connection
async fn handle_socket(
    mut socket: WebSocket,
    room: String,
    registry: Arc<RoomRegistry>,
    queue_capacity: usize,
) {
    let (outbound, mut frames) = Outbound::channel(queue_capacity);

    let mut conn = match Connection::open(&registry, &room, outbound) {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Refusing connection to room {}: {}", room, e);
            let close = Message::Close(Some(CloseFrame {
                code: e.close_code(),
                reason: Cow::Owned(e.to_string()),
            }));
            if let Err(e) = socket.send(close).await {
                debug!("Failed to send close frame: {}", e);
            }
            return;
        }
    };
    let conn_id = conn.id();

    let (mut sender, mut receiver) = socket.split();

    // Drain frames queued by the room listeners into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
        // Best effort; the peer may already be gone
        let _ = sender.close().await;
    });

    // Feed inbound frames to the connection; dropping it runs the reaper
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Binary(frame)) => conn.handle_frame(&frame),
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(_)) => {
                    debug!("Ignoring text message on {}", conn.id());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error on {}: {}", conn.id(), e);
                    break;
                }
            }
        }
        conn.close();
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    info!("WebSocket connection {} terminated", conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name_from_path() {
        assert_eq!(room_name_from_path("/doc-42", "default"), "doc-42");
        assert_eq!(room_name_from_path("/doc-42/extra", "default"), "doc-42");
        assert_eq!(room_name_from_path("/", "default"), "default");
        assert_eq!(room_name_from_path("", "lobby"), "lobby");
    }
}
