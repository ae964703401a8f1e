//! WebSocket transport for local clients.
//!
//! Each socket gets a session in the hub and a writer task draining the
//! session's outbound queue. The reader loop feeds text frames to the hub
//! in arrival order, which keeps per-connection ordering end to end.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use meshgate_shared::constants::MAX_MESSAGE_SIZE;

use crate::api::AppState;
use crate::hub::SharedHub;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: SharedHub) {
    let (mut sink, mut stream) = socket.split();

    let (id, mut outbox) = {
        let mut hub = hub.lock().await;
        let (tx, rx) = mpsc::channel::<String>(hub.session_buffer);
        (hub.open_session(tx), rx)
    };
    info!(session = %id, "Local client connected");

    let writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => hub.lock().await.handle_client_text(&id, &text),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => hub.lock().await.handle_client_text(&id, text),
                Err(_) => debug!(session = %id, "Ignoring non-UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by the websocket layer.
            Ok(_) => {}
            Err(e) => {
                debug!(session = %id, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    hub.lock().await.close_session(&id);
    writer.abort();
    info!(session = %id, "Local client disconnected");
}
