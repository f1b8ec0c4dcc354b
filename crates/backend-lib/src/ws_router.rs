// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! HTTP surface: the WebSocket endpoint, the call-provider webhook and a
//! liveness probe.
//!
//! Each socket gets a bounded outbox and a pump task that serializes
//! events onto the wire; the read loop enforces authenticate-first and
//! then dispatches commands through [`ConnectionHandler`]. Cleanup runs
//! unconditionally when the read loop ends, however the socket died.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, Stream, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionHandler;
use crate::error::AppError;
use crate::messages::{ClientCommand, ServerEvent};
use crate::{webhook, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/hooks/calls", post(webhook::calls_webhook))
        .route("/healthz", get(healthz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    counter!("ws.connections_total").increment(1);
    gauge!("ws.connections_active").increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.settings.event_queue_depth);

    // pump: everything written to the outbox goes onto the wire in order
    let pump = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound event");
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    if let Some(handler) = authenticate_first(&mut stream, &state, conn_id, &tx).await {
        read_loop(&mut stream, &handler, &tx).await;
        gauge!("ws.connections_active").decrement(1.0);
        handler.disconnect().await;
    } else {
        gauge!("ws.connections_active").decrement(1.0);
    }
    pump.abort();
}

/// The first text frame must be a valid `authenticate` command; anything
/// else gets one error event and the socket is dropped.
async fn authenticate_first(
    stream: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    state: &Arc<AppState>,
    conn_id: Uuid,
    tx: &mpsc::Sender<ServerEvent>,
) -> Option<ConnectionHandler> {
    let text = loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => break text,
            Ok(Message::Close(_)) | Err(_) => return None,
            // ping/pong and binary frames before auth are ignored
            Ok(_) => continue,
        }
    };
    let token = match serde_json::from_str::<ClientCommand>(&text) {
        Ok(ClientCommand::Authenticate { token }) => token,
        Ok(_) => {
            let err = AppError::PermissionDenied("authenticate first".into());
            let _ = tx.send(ServerEvent::error(&err)).await;
            return None;
        },
        Err(err) => {
            let _ = tx.send(ServerEvent::error(&err.into())).await;
            return None;
        },
    };
    match ConnectionHandler::authenticate(state.clone(), conn_id, &token, tx.clone()).await {
        Ok(handler) => {
            let _ = tx
                .send(ServerEvent::Authenticated {
                    user_id: handler.user_id().to_string(),
                })
                .await;
            Some(handler)
        },
        Err(err) => {
            warn!(%conn_id, "handshake rejected: {err}");
            let _ = tx.send(ServerEvent::error(&err)).await;
            None
        },
    }
}

async fn read_loop(
    stream: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    handler: &ConnectionHandler,
    tx: &mpsc::Sender<ServerEvent>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!("socket error, closing: {err}");
                break;
            },
        };
        counter!("ws.commands_total").increment(1);
        let reply = match serde_json::from_str::<ClientCommand>(&text) {
            Ok(cmd) => match handler.handle_command(cmd).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    counter!("ws.command_errors_total").increment(1);
                    ServerEvent::error(&err)
                },
            },
            Err(err) => {
                counter!("ws.command_errors_total").increment(1);
                ServerEvent::error(&err.into())
            },
        };
        if tx.send(reply).await.is_err() {
            break;
        }
    }
}
