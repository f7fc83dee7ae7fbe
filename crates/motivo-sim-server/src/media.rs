//! The realtime media offer/answer/ICE channel (§6 / C6): a second WebSocket,
//! separate from the command channel, negotiating a per-peer [`MediaSession`]
//! and then pushing encoded frames to it on a fixed interval.
//!
//! The SDP answer returned here is a placeholder: real session description
//! negotiation and ICE transport are out of scope, this module only drives
//! [`MediaSessionManager`]'s quality/throttle/letterbox state machine and the
//! frame relay on top of it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use motivo_net::MediaSessionManager;
use motivo_proto::MediaSignal;
use motivo_sim::SimHandle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::frame::encode_jpeg;

/// Frame header: big-endian width, height, pts (u32 each) ahead of the JPEG payload.
const FRAME_HEADER_BYTES: usize = 12;

/// How often the relay attempts to pull and send a frame per open session.
const RELAY_INTERVAL: Duration = Duration::from_millis(66);

/// Shared state for the media-signaling router.
pub struct MediaState {
    /// Every negotiated media session, keyed by peer id.
    pub sessions: Mutex<MediaSessionManager>,
    /// Handle into the simulation loop, used to capture frames to relay.
    pub sim: SimHandle,
}

/// Builds the media-signaling router.
pub fn router(state: Arc<MediaState>) -> Router {
    Router::new().route("/media", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<MediaState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<MediaState>, addr: SocketAddr) {
    let peer = format!("media-{addr}");
    let (mut ws_tx, mut ws_rx) = socket.split();

    let relay_state = Arc::clone(&state);
    let relay_peer = peer.clone();
    let mut relay_tx = {
        let (tx, rx) = tokio::sync::mpsc::channel::<Vec<u8>>(8);
        tokio::spawn(frame_relay(relay_state, relay_peer, tx));
        rx
    };

    loop {
        tokio::select! {
            frame = relay_tx.recv() => {
                match frame {
                    Some(bytes) => {
                        if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_signal(&state, &peer, &mut ws_tx, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%peer, error = %err, "media socket read error");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.lock().await.close(&peer);
    info!(%peer, "media session closed");
}

async fn handle_signal(
    state: &Arc<MediaState>,
    peer: &str,
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    text: &str,
) {
    let signal: MediaSignal = match serde_json::from_str(text) {
        Ok(signal) => signal,
        Err(err) => {
            warn!(%peer, error = %err, "malformed media signal");
            return;
        }
    };
    match signal {
        MediaSignal::Offer { quality, .. } => {
            state.sessions.lock().await.open(peer.to_string(), quality);
            info!(%peer, ?quality, "media session negotiated");
            let answer = MediaSignal::Answer {
                sdp: String::new(),
            };
            if let Ok(text) = serde_json::to_string(&answer) {
                let _ = ws_tx.send(Message::Text(text.into())).await;
            }
        }
        MediaSignal::IceCandidate { candidate } => {
            debug!(%peer, ?candidate, "ignoring ICE candidate: transport negotiation is out of scope");
        }
        MediaSignal::Answer { .. } => {
            debug!(%peer, "unexpected answer from a media client, ignoring");
        }
    }
}

async fn frame_relay(state: Arc<MediaState>, peer: String, tx: tokio::sync::mpsc::Sender<Vec<u8>>) {
    let mut interval = tokio::time::interval(RELAY_INTERVAL);
    loop {
        interval.tick().await;
        let has_session = state.sessions.lock().await.session_mut(&peer).is_some();
        if !has_session {
            continue;
        }
        let raw = match state.sim.capture_frame().await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%peer, error = %err, "failed to capture frame for media relay");
                continue;
            }
        };
        let mut sessions = state.sessions.lock().await;
        let Some(session) = sessions.session_mut(&peer) else {
            continue;
        };
        session.push_frame(&raw);
        let Some(encoded) = session.pull_frame() else {
            continue;
        };
        drop(sessions);

        let jpeg = match encode_jpeg(&motivo_net::RawFrame {
            width: encoded.width,
            height: encoded.height,
            rgb: encoded.rgb,
        }) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%peer, error = %err, "failed to encode relayed frame");
                continue;
            }
        };

        let mut framed = Vec::with_capacity(FRAME_HEADER_BYTES + jpeg.len());
        framed.extend_from_slice(&encoded.width.to_be_bytes());
        framed.extend_from_slice(&encoded.height.to_be_bytes());
        framed.extend_from_slice(&(encoded.pts as u32).to_be_bytes());
        framed.extend_from_slice(&jpeg);

        if tx.send(framed).await.is_err() {
            break;
        }
    }
}
