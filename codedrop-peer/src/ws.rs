//! Websocket transport over the relay. Two tasks bridge the socket to a
//! [`PeerConnection`]: the writer drains the outbound queue and decrements
//! the buffered-byte counter as frames leave, the reader decodes incoming
//! frames into the inbound channel.

use std::sync::atomic::Ordering;

use codedrop_core::{SignalMessage, WireMessage, decode_frame, encode_frame, normalize_short_code};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;
use url::Url;

use crate::PeerError;
use crate::connection::{PeerConnection, TransportHandles, connection_channel};

/// Register a session under `code` and wait for the relay's ack. The
/// returned connection will see `PeerJoined` once a receiver arrives.
pub async fn host_session(relay_url: &str, code: &str) -> Result<PeerConnection, PeerError> {
    let code = normalize_short_code(code)?;
    let mut conn = connect(relay_url, SignalMessage::Host { code }).await?;

    match conn.recv().await {
        Some(WireMessage::Signal(SignalMessage::SessionHosted { .. })) => Ok(conn),
        Some(WireMessage::Signal(SignalMessage::Error { message })) => {
            Err(PeerError::Relay(message))
        }
        Some(_) => Err(PeerError::Relay(
            "unexpected relay reply while hosting".to_owned(),
        )),
        None => Err(PeerError::ConnectionClosed),
    }
}

/// Join the session hosted under `code`. The code is validated locally
/// before any connection attempt; relay-side rejection (unknown code, full
/// session) surfaces on the first `recv`.
pub async fn join_session(relay_url: &str, code: &str) -> Result<PeerConnection, PeerError> {
    let code = normalize_short_code(code)?;
    connect(relay_url, SignalMessage::Join { code }).await
}

async fn connect(relay_url: &str, hello: SignalMessage) -> Result<PeerConnection, PeerError> {
    let url = Url::parse(relay_url)?;
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let frame = encode_frame(&WireMessage::Signal(hello))?;
    write.send(Message::Binary(frame.into())).await?;

    let (conn, handles) = connection_channel();
    let TransportHandles {
        mut outbound_rx,
        inbound_tx,
        buffered,
    } = handles;

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let len = frame.len();
            let result = write.send(Message::Binary(frame.into())).await;
            buffered.fetch_sub(len, Ordering::SeqCst);
            if result.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    tokio::spawn(async move {
        while let Some(next) = read.next().await {
            let message = match next {
                Ok(message) => message,
                Err(err) => {
                    warn!("websocket receive error: {}", err);
                    break;
                }
            };
            match message {
                Message::Binary(data) => match decode_frame(&data) {
                    Ok(wire) => {
                        if inbound_tx.send(wire).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("dropping malformed frame from relay: {}", err),
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_) => {}
            }
        }
        // Dropping inbound_tx here surfaces the close to `recv`.
    });

    Ok(conn)
}
