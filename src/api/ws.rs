//! Real-time todo channel over WebSocket.
//!
//! On connect the client is subscribed to the notifier, which sends a
//! `task_list` snapshot before anything else. `{"type":"request_todos"}`
//! queues a fresh snapshot; anything else unparseable is answered with an
//! `error` message and the connection stays open.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use crate::notify::{ClientMessage, ListenerId, Notifier, ServerMessage};

use super::routes::AppState;

/// GET /ws/todos
pub async fn todos_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let notifier = state.notifier.clone();
    ws.on_upgrade(move |socket| handle_todos_socket(socket, notifier))
}

async fn handle_todos_socket(socket: WebSocket, notifier: Notifier) {
    let mut listener = notifier.subscribe();
    let id = listener.id();
    tracing::info!(listener = id, "Real-time client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = listener.recv() => {
                // None: the notifier dropped us (queue full) or shut down.
                let Some(message) = outgoing else { break };
                if ws_sender.send(Message::Text(message.to_json())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&text, &notifier, id) {
                            if ws_sender.send(Message::Text(reply.to_json())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(listener = id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    notifier.unsubscribe(id);
    tracing::info!(listener = id, "Real-time client disconnected");
}

/// Handle one inbound text frame. Returns a direct reply, if any.
fn handle_client_text(text: &str, notifier: &Notifier, id: ListenerId) -> Option<ServerMessage> {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::RequestTodos) => {
            notifier.request_snapshot(id);
            None
        }
        Err(e) => {
            tracing::debug!(listener = id, error = %e, "Malformed client message");
            Some(ServerMessage::error(format!("Invalid message: {}", e)))
        }
    }
}
