//! Subscriber event channel over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use intercept_common::{Action, ClientMessage, ServerMessage};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::coordinator::Coordinator;
use crate::http::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator))
}

async fn handle_socket(socket: WebSocket, coordinator: Arc<Coordinator>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (subscriber, mut outbound) = coordinator.subscribe().await;

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let inbound = coordinator.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(reply) = dispatch(&inbound, &text).await {
                        inbound.send_to(subscriber, reply).await;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(subscriber, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    // Whichever side finishes first ends the session.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    coordinator.unsubscribe(subscriber).await;
}

/// Handle one text frame. The returned message goes to the sender only.
pub(crate) async fn dispatch(coordinator: &Coordinator, text: &str) -> Option<ServerMessage> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return Some(ServerMessage::Error {
                message: format!("invalid message: {}", e),
            })
        }
    };

    match message {
        ClientMessage::ToggleIntercept { enabled } => {
            coordinator.set_toggle(enabled).await;
            None
        }
        ClientMessage::Forward { id, modification } => {
            match coordinator
                .submit_action(Action::new_forward(id.clone(), modification))
                .await
            {
                Ok(()) => Some(ServerMessage::Forwarded { id }),
                Err(e) => Some(ServerMessage::Error {
                    message: e.to_string(),
                }),
            }
        }
        ClientMessage::Drop { id } => match coordinator.submit_action(Action::new_drop(id.clone())).await {
            Ok(()) => Some(ServerMessage::Dropped { id }),
            Err(e) => Some(ServerMessage::Error {
                message: e.to_string(),
            }),
        },
        ClientMessage::Remove { id } => {
            coordinator.remove_from_view(&id).await;
            Some(ServerMessage::Removed { id })
        }
    }
}
