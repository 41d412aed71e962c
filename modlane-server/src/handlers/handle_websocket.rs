use axum::{
    extract::{Path, State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::channel::StatusChannelServer;

/// Handle a WebSocket upgrade on `/{endpoint}`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(endpoint): Path<String>,
    State(server): State<StatusChannelServer>,
) -> Response {
    if !server.accepts(&endpoint) || server.is_disposed() {
        debug!(%endpoint, "rejecting status channel upgrade");
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        server.handle_connection(socket, &endpoint).await;
    })
}
