use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State as AxumState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::PublicConfig;
use crate::envelope::StatusEnvelope;
use crate::fanout::Fanout;

/// Everything the HTTP layer needs, cloned into each handler.
#[derive(Clone)]
pub struct AppState {
    pub fanout: Fanout,
    pub public_config: PublicConfig,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Configuration read-back for client bootstrap.
async fn get_config(AxumState(app_state): AxumState<AppState>) -> impl IntoResponse {
    Json(app_state.public_config.clone())
}

async fn ws_handler(
    AxumState(app_state): AxumState<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Per-client socket loop: one status envelope, a full cache replay, then
/// live frames until the socket goes away.  A dead socket only ends this
/// task, no other client or the broker link is affected.
async fn handle_socket(mut socket: WebSocket, app_state: AppState) {
    info!("client connected");
    // subscribe before replaying so no live frame can fall in between
    let mut rx = app_state.fanout.subscribe();

    if let Ok(frame) = serde_json::to_string(&StatusEnvelope::connected()) {
        if socket.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    for envelope in app_state.fanout.snapshot().await {
        let Ok(frame) = serde_json::to_string(&envelope) else {
            continue;
        };
        if socket.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Ok(frame) => {
                    if socket.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // best effort stream, the periodic rebroadcast will
                    // resync whatever this client just missed
                    warn!("client lagged, skipped {skipped} frames");
                    continue;
                }
                Err(_) => break,
            },
            inbound = socket.next() => match inbound {
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("client socket error: {err}");
                    break;
                }
                None => break,
            }
        }
    }
    info!("client disconnected");
}
