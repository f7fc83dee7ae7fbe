//! The duplex command channel (§6 / C9): one WebSocket per subscriber,
//! carrying JSON [`Command`]s in and every reply/broadcast back out through
//! the shared [`SubscriberRegistry`] queue so ordering matches delivery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use motivo_context::{ContextBackend, SnapshotSource};
use motivo_dispatch::Dispatcher;
use motivo_net::SubscriberRegistry;
use motivo_proto::{error_reply, Command};
use tracing::{info, warn};

/// Per-peer send deadline before the peer is considered stale (§4.5, §8).
const DELIVERY_DEADLINE: Duration = Duration::from_secs(5);

/// Shared state for the command-channel router.
pub struct GatewayState<B: ContextBackend + 'static, S: SnapshotSource + 'static> {
    /// The shared dispatcher every peer's commands are routed through.
    pub dispatcher: Arc<Dispatcher<B, S>>,
    /// The shared subscriber registry peers are admitted to.
    pub registry: Arc<SubscriberRegistry>,
}

/// Builds the command-channel router.
pub fn router<B: ContextBackend + 'static, S: SnapshotSource + 'static>(
    state: Arc<GatewayState<B, S>>,
) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler<B: ContextBackend + 'static, S: SnapshotSource + 'static>(
    State(state): State<Arc<GatewayState<B, S>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

fn peer_id(addr: SocketAddr) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{addr}-{millis}")
}

async fn handle_socket<B: ContextBackend + 'static, S: SnapshotSource + 'static>(
    socket: WebSocket,
    state: Arc<GatewayState<B, S>>,
    addr: SocketAddr,
) {
    let peer = peer_id(addr);
    let queue = state.registry.add(peer.clone());
    info!(%peer, "subscriber admitted");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_registry = Arc::clone(&state.registry);
    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        loop {
            let payload = queue.recv().await;
            let text = String::from_utf8(payload).unwrap_or_default();
            match tokio::time::timeout(DELIVERY_DEADLINE, ws_tx.send(Message::Text(text.into()))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    writer_registry.mark_stale(&writer_peer);
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let reply = route_command(&state, &peer, &text).await;
                if let Ok(payload) = serde_json::to_vec(&reply) {
                    state.registry.send_to(&peer, &payload);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.registry.remove(&peer);
    info!(%peer, "subscriber removed");
}

async fn route_command<B: ContextBackend + 'static, S: SnapshotSource + 'static>(
    state: &GatewayState<B, S>,
    peer: &str,
    text: &str,
) -> serde_json::Value {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => return error_reply("unknown", format!("malformed JSON: {err}")),
    };
    let type_name = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or("unknown").to_string();
    match serde_json::from_value::<Command>(raw) {
        Ok(cmd) => state.dispatcher.dispatch(cmd, peer.to_string()).await,
        Err(err) => {
            warn!(%peer, %type_name, error = %err, "failed to parse inbound command");
            error_reply(&type_name, err.to_string())
        }
    }
}
