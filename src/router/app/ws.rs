use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use std::sync::Arc;

use crate::{
    error::AppError,
    messaging,
    middleware::CurrentUser,
    realtime::{ClientEvent, Registration, ServerEvent},
    AppState,
};

#[axum::debug_handler]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: i64) {
    let Registration {
        connection_id,
        mut receiver,
    } = state.hub.register(user_id).await;

    match messaging::deliver_pending(&state, user_id).await {
        Ok(0) => {}
        Ok(delivered) => debug!(user_id, delivered, "queued messages delivered"),
        Err(err) => warn!(?err, user_id, "failed to deliver queued messages"),
    }

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(?err, "failed to encode socket event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                WsMessage::Text(text) => {
                    handle_frame(&recv_state, user_id, connection_id, &text).await;
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(user_id, connection_id).await;
}

async fn handle_frame(state: &AppState, user_id: i64, connection_id: u64, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            debug!(%err, user_id, "malformed socket frame");
            reply_error(state, user_id, connection_id, "malformed event".to_string()).await;
            return;
        }
    };

    let result = match event {
        ClientEvent::SendMessage(send) => {
            messaging::send_message(state, user_id, send.conversation_id, send.message)
                .await
                .map(|_| ())
        }
        ClientEvent::MarkRead { conversation_id } => {
            messaging::mark_read(state, user_id, conversation_id)
                .await
                .map(|_| ())
        }
        ClientEvent::Ping => {
            state
                .hub
                .send_to_connection(user_id, connection_id, &ServerEvent::Pong)
                .await;
            Ok(())
        }
    };

    if let Err(err) = result {
        let message = match &err {
            AppError::Database(_) | AppError::Internal(_) => {
                warn!(error = %err, user_id, "socket event failed");
                "internal server error".to_string()
            }
            _ => err.to_string(),
        };
        reply_error(state, user_id, connection_id, message).await;
    }
}

async fn reply_error(state: &AppState, user_id: i64, connection_id: u64, message: String) {
    state
        .hub
        .send_to_connection(user_id, connection_id, &ServerEvent::Error { message })
        .await;
}
