use axum::{
    extract::{ws::Message, ws::WebSocket, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use omnichat_core::TenantId;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::verify_operator;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
    /// Only forward events for this tenant.
    pub tenant: Option<i64>,
}

/// Upgrades GET /ws to the live event stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(reason) =
        verify_operator(&state.config.gateway.auth, &headers, query.token.as_deref())
    {
        warn!(reason = %reason, "event stream authentication failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let tenant = query.tenant.map(TenantId);
    ws.on_upgrade(move |socket| run_connection(socket, state, tenant))
}

/// Per-connection event loop; forwards relay events until either side closes.
async fn run_connection(socket: WebSocket, state: Arc<AppState>, tenant: Option<TenantId>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, tenant = ?tenant, "event stream connected");

    let (mut tx, mut rx) = socket.split();
    let mut events = state.broadcaster.subscribe();

    let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Clients only listen; anything else is ignored.
                    Some(Ok(_)) => {}
                }
            }

            event = events.recv() => {
                match event {
                    Ok(frame) => {
                        if tenant.is_some_and(|t| t != frame.tenant) {
                            continue;
                        }
                        if tx.send(Message::Text(frame.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(conn_id = %conn_id, skipped, "event stream lagging; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = tick.tick() => {
                let ev = serde_json::json!({
                    "event": "tick",
                    "seq": state.broadcaster.next_seq(),
                    "ts": chrono::Utc::now().timestamp_millis(),
                });
                if tx.send(Message::Text(ev.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(conn_id = %conn_id, "event stream closed");
}
