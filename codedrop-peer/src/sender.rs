//! Sender driver: metadata, readiness handshake, flow-controlled chunk
//! emission, end of stream.

use bytes::Bytes;
use codedrop_core::{
    CHUNK_SIZE, ChunkPlan, ControlMessage, CoreError, SignalMessage, TransferDescriptor,
    TransferSession, WireMessage,
};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::PeerConnection;
use crate::flow::FlowController;
use crate::{PeerError, TransferEvent};

/// Stream one file to the connected receiver. `source` is read one chunk at a
/// time, so the file is never held in memory whole. Returns once the receiver
/// has been sent `eof`; any transport or protocol failure abandons the
/// transfer without retry, and a receiver that disconnects mid-stream
/// surfaces as [`PeerError::ConnectionClosed`] rather than a silent success.
pub async fn send_file<S>(
    conn: &mut PeerConnection,
    descriptor: TransferDescriptor,
    source: &mut S,
    events: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<(), PeerError>
where
    S: AsyncRead + AsyncSeek + Unpin,
{
    let flow = FlowController::default();
    let mut session = TransferSession::sender(descriptor.clone());
    session.connection_opened()?;

    wait_for_peer(conn, &mut session).await?;
    let _ = events.send(TransferEvent::PeerConnected);

    let metadata = session.metadata_to_send()?;
    conn.send(&WireMessage::Control(metadata))?;

    wait_for_ready(conn, &mut session).await?;

    let total = descriptor.size;
    let mut read_buf = vec![0_u8; CHUNK_SIZE];
    for span in ChunkPlan::new(total) {
        check_for_disconnect(conn, &mut session)?;
        source.seek(SeekFrom::Start(span.offset)).await?;
        let chunk = &mut read_buf[..span.len];
        source.read_exact(chunk).await?;

        flow.send_chunk(conn, Bytes::copy_from_slice(chunk)).await?;
        session.chunk_sent(span.len)?;
        let _ = events.send(TransferEvent::Progress {
            transferred: session.bytes_transferred(),
            total,
        });
    }

    check_for_disconnect(conn, &mut session)?;
    let eof = session.eof_to_send()?;
    conn.send(&WireMessage::Control(eof))?;
    let _ = events.send(TransferEvent::Completed);
    info!("sent {} ({} bytes)", descriptor.name, total);
    Ok(())
}

/// Drain any messages queued while streaming. The receiver sends nothing
/// after `ready-for-data`, but the relay can interleave a disconnect
/// notification at any point; without this check the sender would stream the
/// rest of the file into a dead session.
fn check_for_disconnect(
    conn: &mut PeerConnection,
    session: &mut TransferSession,
) -> Result<(), PeerError> {
    loop {
        match conn.try_recv() {
            Ok(None) => return Ok(()),
            Ok(Some(WireMessage::Signal(SignalMessage::PeerLeft))) => {
                session.fail();
                return Err(PeerError::ConnectionClosed);
            }
            Ok(Some(WireMessage::Signal(SignalMessage::Error { message }))) => {
                session.fail();
                return Err(PeerError::Relay(message));
            }
            Ok(Some(other)) => {
                warn!("ignoring message while streaming: {:?}", other);
            }
            Err(err) => {
                session.fail();
                return Err(err);
            }
        }
    }
}

async fn wait_for_peer(
    conn: &mut PeerConnection,
    session: &mut TransferSession,
) -> Result<(), PeerError> {
    loop {
        match conn.recv().await {
            Some(WireMessage::Signal(SignalMessage::PeerJoined)) => return Ok(()),
            Some(WireMessage::Signal(SignalMessage::Error { message })) => {
                session.fail();
                return Err(PeerError::Relay(message));
            }
            Some(WireMessage::Signal(SignalMessage::PeerLeft)) | None => {
                session.fail();
                return Err(PeerError::ConnectionClosed);
            }
            Some(WireMessage::Signal(_)) => continue,
            Some(_) => {
                session.fail();
                return Err(PeerError::Protocol(CoreError::UnexpectedMessage {
                    message: "transfer data before pairing",
                    state: session.state(),
                }));
            }
        }
    }
}

/// Block until the receiver signals readiness. No chunk is emitted before
/// this resolves.
async fn wait_for_ready(
    conn: &mut PeerConnection,
    session: &mut TransferSession,
) -> Result<(), PeerError> {
    loop {
        match conn.recv().await {
            Some(WireMessage::Control(ControlMessage::ReadyForData)) => {
                session.ready_received()?;
                return Ok(());
            }
            Some(WireMessage::Signal(SignalMessage::Error { message })) => {
                session.fail();
                return Err(PeerError::Relay(message));
            }
            Some(WireMessage::Signal(SignalMessage::PeerLeft)) | None => {
                session.fail();
                return Err(PeerError::ConnectionClosed);
            }
            Some(WireMessage::Signal(_)) => continue,
            Some(_) => {
                session.fail();
                return Err(PeerError::Protocol(CoreError::UnexpectedMessage {
                    message: "message while awaiting readiness",
                    state: session.state(),
                }));
            }
        }
    }
}
