//! Websocket broker that pairs a hosting sender with one joining receiver by
//! short code and forwards their frames verbatim. The relay validates frame
//! shape and size but never interprets transfer content; file bytes pass
//! through opaquely and are not stored.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use codedrop_core::{
    MAX_FRAME_BYTES, SignalMessage, WireMessage, decode_frame, encode_frame, normalize_short_code,
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerRole {
    Host,
    Guest,
}

impl PeerRole {
    fn counterpart(self) -> PeerRole {
        match self {
            PeerRole::Host => PeerRole::Guest,
            PeerRole::Guest => PeerRole::Host,
        }
    }
}

#[derive(Debug, Clone)]
struct PeerSlot {
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct Session {
    host: Option<PeerSlot>,
    guest: Option<PeerSlot>,
}

impl Session {
    fn slot(&self, role: PeerRole) -> Option<&PeerSlot> {
        match role {
            PeerRole::Host => self.host.as_ref(),
            PeerRole::Guest => self.guest.as_ref(),
        }
    }
}

#[derive(Debug, Default)]
struct RelayState {
    sessions: HashMap<String, Session>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<RelayState>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RelayState::default())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "relay listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    // Slightly above the protocol cap so an oversized frame reaches the
    // drop-and-log path instead of tearing the websocket down.
    ws.max_frame_size(MAX_FRAME_BYTES + 1024)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("socket session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Keepalive for the write half. Pong responses queued by the read half
    // are only flushed when the write half sends, and a reverse proxy may
    // drop a connection it considers idle mid-transfer.
    const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let first_message = ws_receiver
        .next()
        .await
        .ok_or_else(|| "client disconnected before signaling".to_owned())
        .and_then(|result| result.map_err(|err| err.to_string()))?;

    let (code, role) = match register_peer(&state, &first_message, &outbound_tx).await {
        Ok(registration) => registration,
        Err(reason) => {
            send_signal(&outbound_tx, SignalMessage::Error {
                message: reason.clone(),
            });
            // Let the writer drain the error frame before the socket drops.
            drop(outbound_tx);
            let _ = send_task.await;
            return Err(reason);
        }
    };

    info!("{:?} registered for session {}", role, code);

    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket receive error: {}", err);
                break;
            }
        };

        match message {
            Message::Binary(data) => {
                if data.len() > MAX_FRAME_BYTES {
                    warn!("dropping oversized frame on session {}", code);
                    continue;
                }

                match decode_frame(&data) {
                    Ok(WireMessage::Control(_)) | Ok(WireMessage::Chunk(_)) => {
                        forward_to_counterpart(&state, &code, role, data.to_vec()).await;
                    }
                    Ok(WireMessage::Signal(_)) => {
                        warn!("unexpected signal after setup on session {}", code);
                    }
                    Err(err) => {
                        warn!("dropping malformed frame on session {}: {}", code, err);
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => {}
        }
    }

    unregister_peer(&state, &code, role).await;
    drop(outbound_tx);
    let _ = send_task.await;
    info!("{:?} left session {}", role, code);
    Ok(())
}

/// Handle the mandatory first frame: `host` registers a new session under a
/// short code, `join` pairs with an existing one. Anything else is rejected.
async fn register_peer(
    state: &AppState,
    message: &Message,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> Result<(String, PeerRole), String> {
    let signal = parse_signal_message(message)?;

    match signal {
        SignalMessage::Host { code } => {
            let code = normalize_short_code(&code).map_err(|err| err.to_string())?;
            let mut relay = state.inner.write().await;
            if relay.sessions.contains_key(&code) {
                return Err(format!("session code {} is already in use", code));
            }
            relay.sessions.insert(
                code.clone(),
                Session {
                    host: Some(PeerSlot {
                        tx: outbound_tx.clone(),
                    }),
                    guest: None,
                },
            );
            drop(relay);

            send_signal(outbound_tx, SignalMessage::SessionHosted { code: code.clone() });
            Ok((code, PeerRole::Host))
        }
        SignalMessage::Join { code } => {
            let code = normalize_short_code(&code).map_err(|err| err.to_string())?;
            let mut relay = state.inner.write().await;
            let session = relay
                .sessions
                .get_mut(&code)
                .ok_or_else(|| format!("no session hosted under code {}", code))?;
            if session.guest.is_some() {
                return Err(format!("session {} already has a receiver", code));
            }
            session.guest = Some(PeerSlot {
                tx: outbound_tx.clone(),
            });
            let host_tx = session.host.as_ref().map(|slot| slot.tx.clone());
            drop(relay);

            if let Some(host_tx) = host_tx {
                send_signal(&host_tx, SignalMessage::PeerJoined);
            }
            send_signal(outbound_tx, SignalMessage::PeerJoined);
            Ok((code, PeerRole::Guest))
        }
        other => Err(format!("first frame must be host or join, got {:?}", other)),
    }
}

async fn unregister_peer(state: &AppState, code: &str, role: PeerRole) {
    let counterpart_tx = {
        let mut relay = state.inner.write().await;
        // Either peer leaving ends the session; the transfer cannot resume.
        relay
            .sessions
            .remove(code)
            .and_then(|session| session.slot(role.counterpart()).map(|slot| slot.tx.clone()))
    };

    if let Some(tx) = counterpart_tx {
        send_signal(&tx, SignalMessage::PeerLeft);
    }
}

async fn forward_to_counterpart(state: &AppState, code: &str, from: PeerRole, frame: Vec<u8>) {
    let counterpart_tx = {
        let relay = state.inner.read().await;
        relay
            .sessions
            .get(code)
            .and_then(|session| session.slot(from.counterpart()).map(|slot| slot.tx.clone()))
    };

    match counterpart_tx {
        Some(tx) => {
            let _ = tx.send(Message::Binary(frame.into()));
        }
        None => warn!("dropping frame on session {}: no counterpart yet", code),
    }
}

fn parse_signal_message(message: &Message) -> Result<SignalMessage, String> {
    let data = match message {
        Message::Binary(data) => data,
        _ => return Err("first message must be a binary signal frame".to_owned()),
    };

    match decode_frame(data).map_err(|err| format!("invalid signal frame: {}", err))? {
        WireMessage::Signal(signal) => Ok(signal),
        _ => Err("first frame must be a signal message".to_owned()),
    }
}

fn send_signal(tx: &mpsc::UnboundedSender<Message>, signal: SignalMessage) {
    match encode_frame(&WireMessage::Signal(signal)) {
        Ok(frame) => {
            let _ = tx.send(Message::Binary(frame.into()));
        }
        Err(err) => warn!("failed to encode signal frame: {}", err),
    }
}
