//! WebSocket — broadcast session events to connected clients.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use tracing::{error, info};

use super::{AppState, DEFAULT_SESSION};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{session_id}", get(ws_handler))
        .route("/ws", get(ws_default))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn ws_default(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, DEFAULT_SESSION.to_string(), state))
}

async fn handle_socket(mut socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let Some(handle) = state.session(Some(&session_id)).await else {
        error!("WebSocket: session '{}' not found", session_id);
        drop(socket);
        return;
    };

    // Subscribe without touching the session lock
    let mut rx = handle.events.subscribe();

    info!("WebSocket client connected to {}", session_id);

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let json = event.to_ws_json().to_string();
                        if socket.send(axum::extract::ws::Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        info!("WebSocket lagged {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            // Incoming messages from client (keep-alive)
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }

    info!("WebSocket client disconnected from {}", session_id);
}
