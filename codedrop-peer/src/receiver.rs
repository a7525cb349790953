//! Receiver driver: accept metadata, signal readiness, accumulate chunks,
//! materialize the finished file at end of stream.

use bytes::Bytes;
use codedrop_core::{
    ControlMessage, CoreError, SignalMessage, TransferDescriptor, TransferSession, WireMessage,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::PeerConnection;
use crate::{PeerError, TransferEvent};

/// A completed transfer, ready for persistence.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub descriptor: TransferDescriptor,
    pub contents: Bytes,
}

/// Receive exactly one file over `conn`. A new metadata message restarts
/// accumulation from scratch; the connection closing before `eof` fails the
/// transfer rather than leaving the caller waiting forever.
pub async fn receive_file(
    conn: &mut PeerConnection,
    events: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<ReceivedFile, PeerError> {
    let mut session = TransferSession::receiver();
    session.connection_opened()?;

    loop {
        let Some(message) = conn.recv().await else {
            session.fail();
            return Err(PeerError::ConnectionClosed);
        };

        match message {
            WireMessage::Control(ControlMessage::Metadata(descriptor)) => {
                // Reset first, then signal readiness; stale chunks from an
                // earlier transfer must never leak into this one.
                session.metadata_received(descriptor.clone())?;
                let ready = session.ready_to_send()?;
                conn.send(&WireMessage::Control(ready))?;
                let _ = events.send(TransferEvent::Started { descriptor });
            }
            WireMessage::Chunk(chunk) => {
                let transferred = session.chunk_received(chunk)?;
                let total = session.descriptor().map(|d| d.size).unwrap_or(0);
                let _ = events.send(TransferEvent::Progress { transferred, total });
            }
            WireMessage::Control(ControlMessage::Eof) => {
                session.eof_received()?;
                break;
            }
            WireMessage::Control(ControlMessage::ReadyForData) => {
                session.fail();
                return Err(PeerError::Protocol(CoreError::UnexpectedMessage {
                    message: "ready-for-data",
                    state: session.state(),
                }));
            }
            WireMessage::Signal(SignalMessage::PeerJoined) => {
                let _ = events.send(TransferEvent::PeerConnected);
            }
            WireMessage::Signal(SignalMessage::PeerLeft) => {
                session.fail();
                return Err(PeerError::ConnectionClosed);
            }
            WireMessage::Signal(SignalMessage::Error { message }) => {
                session.fail();
                return Err(PeerError::Relay(message));
            }
            WireMessage::Signal(other) => {
                warn!("ignoring signal during transfer: {:?}", other);
            }
        }
    }

    let contents = session.finalize()?;
    let descriptor = session
        .descriptor()
        .cloned()
        .ok_or(PeerError::Protocol(CoreError::FinalizeBeforeEof))?;
    let _ = events.send(TransferEvent::Completed);
    info!("received {} ({} bytes)", descriptor.name, contents.len());
    Ok(ReceivedFile {
        descriptor,
        contents,
    })
}
