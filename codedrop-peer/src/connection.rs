//! The logical peer connection: ordered, reliable, message-oriented, with a
//! readable send-queue occupancy that the flow controller throttles against.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use codedrop_core::{SignalMessage, WireMessage, decode_frame, encode_frame};
use tokio::sync::mpsc;
use tracing::warn;

use crate::PeerError;

/// One end of a paired connection. `send` queues a frame without blocking;
/// the transport task behind `outbound` drains the queue and decrements
/// `buffered` as frames actually leave.
#[derive(Debug)]
pub struct PeerConnection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    buffered: Arc<AtomicUsize>,
}

impl PeerConnection {
    /// Encode and queue a message. Fails once the transport has shut down.
    pub fn send(&self, message: &WireMessage) -> Result<(), PeerError> {
        let frame = encode_frame(message)?;
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.outbound.send(frame).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            PeerError::ConnectionClosed
        })
    }

    /// Bytes queued but not yet handed to the transport.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    /// Next message from the counterpart; `None` once the connection closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }

    /// Non-blocking poll of the inbound queue, for callers that are busy
    /// sending but still need to notice a disconnect.
    pub fn try_recv(&mut self) -> Result<Option<WireMessage>, PeerError> {
        match self.inbound.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(PeerError::ConnectionClosed),
        }
    }
}

/// Transport-side ends of a [`PeerConnection`].
pub(crate) struct TransportHandles {
    pub(crate) outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) inbound_tx: mpsc::UnboundedSender<WireMessage>,
    pub(crate) buffered: Arc<AtomicUsize>,
}

pub(crate) fn connection_channel() -> (PeerConnection, TransportHandles) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let buffered = Arc::new(AtomicUsize::new(0));
    (
        PeerConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
            buffered: Arc::clone(&buffered),
        },
        TransportHandles {
            outbound_rx,
            inbound_tx,
            buffered,
        },
    )
}

/// Two connections wired directly to each other in process, already paired
/// (both sides see `PeerJoined` first, as they would through the relay).
/// Dropping either end closes the counterpart's inbound stream.
pub fn loopback_pair() -> (PeerConnection, PeerConnection) {
    let (conn_a, handles_a) = connection_channel();
    let (conn_b, handles_b) = connection_channel();

    let _ = handles_a
        .inbound_tx
        .send(WireMessage::Signal(SignalMessage::PeerJoined));
    let _ = handles_b
        .inbound_tx
        .send(WireMessage::Signal(SignalMessage::PeerJoined));

    pump(handles_a.outbound_rx, handles_b.inbound_tx, handles_a.buffered);
    pump(handles_b.outbound_rx, handles_a.inbound_tx, handles_b.buffered);

    (conn_a, conn_b)
}

fn pump(
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound_tx: mpsc::UnboundedSender<WireMessage>,
    buffered: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let len = frame.len();
            let decoded = decode_frame(&frame);
            buffered.fetch_sub(len, Ordering::SeqCst);
            match decoded {
                Ok(message) => {
                    if inbound_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("loopback dropped malformed frame: {}", err);
                }
            }
        }
    });
}
