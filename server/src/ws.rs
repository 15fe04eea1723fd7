//! Websocket plumbing.
//!
//! Each connection gets an id, an outbound queue drained by a dedicated
//! sender task, and a read loop that feeds parsed events to the dispatcher
//! one at a time. The socket closing, for any reason, tears the connection
//! out of the registry.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use materna_backend::Backend;
use materna_relay::{ClientEvent, ConnectionId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppState;

pub async fn websocket_handler<B: Backend>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<B>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<B: Backend>(socket: WebSocket, state: AppState<B>) {
    let id = ConnectionId::new();
    let (mut ws_sender, mut receiver) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(state.send_queue_depth);
    state.dispatcher.registry().register(id, out_tx);
    info!(connection = %id, "websocket connected");

    let sender_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.dispatcher.handle_event(id, event).await,
                Err(err) => {
                    debug!(connection = %id, %err, "unparseable client event");
                    state.dispatcher.registry().send_to(
                        id,
                        ServerEvent::Error {
                            message: "invalid event format".to_string(),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            // Transport-level ping/pong and binary frames are not part of the
            // event protocol.
            Ok(_) => {}
            Err(err) => {
                debug!(connection = %id, %err, "websocket receive error");
                break;
            }
        }
    }

    state.dispatcher.disconnect(id);
    sender_task.abort();
    info!(connection = %id, "websocket disconnected");
}
