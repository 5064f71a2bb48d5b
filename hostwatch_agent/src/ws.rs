//! HTTP and WebSocket boundary over the hub.
//!
//! `GET /metrics` serves the latest snapshot. `GET /ws` backfills the new
//! subscriber with one snapshot, then streams every broadcast; a
//! `get_metrics` text message asks for the latest snapshot again.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::hub::DEFAULT_SUBSCRIBER_BUFFER;
use crate::normalize::normalize;
use crate::source::{collect_blocking, CollectError};
use crate::state::AppState;
use crate::types::MetricsSnapshot;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Latest broadcast snapshot; on cold start, collect one on demand.
pub async fn latest_or_collect(state: &AppState) -> Result<Arc<MetricsSnapshot>, CollectError> {
    if let Some(snap) = state.hub.latest() {
        return Ok(snap);
    }
    let raw = collect_blocking(&state.source).await?;
    Ok(Arc::new(normalize(&raw, Utc::now(), state.gpu_selection)))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match latest_or_collect(&state).await {
        Ok(snap) => Json(&*snap).into_response(),
        Err(e) => {
            warn!(error = %e, "on-demand collection failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("Failed to fetch metrics\n{e}") })),
            )
                .into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    // Register before backfilling so no broadcast falls in the gap.
    // Dropping the guard on return unregisters this subscriber.
    let (subscription, mut rx) = state.hub.subscribe(DEFAULT_SUBSCRIBER_BUFFER);
    debug!(subscriber = subscription.id(), "websocket subscriber connected");

    match latest_or_collect(&state).await {
        Ok(snap) => {
            if send_snapshot(&mut sink, &snap).await.is_err() {
                return;
            }
        }
        Err(e) => warn!(error = %e, "backfill collection failed"),
    }

    loop {
        tokio::select! {
            Some(snap) = rx.recv() => {
                if send_snapshot(&mut sink, &snap).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) if text == "get_metrics" => {
                    if let Ok(snap) = latest_or_collect(&state).await {
                        if send_snapshot(&mut sink, &snap).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    debug!(subscriber = subscription.id(), "websocket subscriber gone");
}

async fn send_snapshot<S>(sink: &mut S, snap: &MetricsSnapshot) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(snap) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "snapshot serialization failed");
            Ok(())
        }
    }
}
