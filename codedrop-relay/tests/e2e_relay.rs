use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use codedrop_core::{
    ControlMessage, MAX_FRAME_BYTES, SignalMessage, TransferDescriptor, WireMessage, decode_frame,
    encode_frame,
};
use codedrop_peer::{PeerError, host_session, join_session, receive_file, send_file};
use codedrop_relay::{AppState, build_router};
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::mpsc, sync::oneshot, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

struct RawClient {
    write: WsWrite,
    read: WsRead,
}

#[tokio::test]
async fn file_transfer_end_to_end_with_case_insensitive_join() {
    let (address, shutdown_tx) = start_relay().await;

    let data: Vec<u8> = (0..40_000_u32).map(|i| (i % 199) as u8).collect();
    let total = data.len() as u64;

    let mut host_conn = host_session(&address, "WXYZ").await.expect("host session");
    let sender = tokio::spawn(async move {
        let (events, _keep) = mpsc::unbounded_channel();
        let descriptor = TransferDescriptor {
            name: "photo.png".to_owned(),
            size: total,
            file_type: "image/png".to_owned(),
            thumbnail: Some(vec![0xAA, 0xBB]),
        };
        let mut source = Cursor::new(data);
        send_file(&mut host_conn, descriptor, &mut source, &events).await
    });

    // The receiver types the code in lowercase; normalization happens first.
    let mut guest_conn = join_session(&address, "wxyz").await.expect("join session");
    let (events, _keep) = mpsc::unbounded_channel();
    let received = timeout(Duration::from_secs(5), receive_file(&mut guest_conn, &events))
        .await
        .expect("transfer within deadline")
        .expect("receive file");

    assert_eq!(received.contents.len() as u64, total);
    assert_eq!(received.descriptor.name, "photo.png");
    assert_eq!(received.descriptor.thumbnail, Some(vec![0xAA, 0xBB]));
    assert_eq!(received.contents[12345], (12345 % 199) as u8);

    sender.await.expect("sender task").expect("send file");
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn joining_an_unknown_code_is_rejected() {
    let (address, shutdown_tx) = start_relay().await;

    let mut conn = join_session(&address, "QQQQ").await.expect("connect");
    let (events, _keep) = mpsc::unbounded_channel();
    let err = timeout(Duration::from_secs(2), receive_file(&mut conn, &events))
        .await
        .expect("relay must answer quickly")
        .expect_err("join must fail");
    assert!(matches!(err, PeerError::Relay(_)));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn hosting_a_duplicate_code_is_rejected() {
    let (address, shutdown_tx) = start_relay().await;

    let _first = host_session(&address, "DDDD").await.expect("first host");
    let err = host_session(&address, "DDDD").await.expect_err("duplicate");
    assert!(matches!(err, PeerError::Relay(_)));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn a_second_receiver_is_rejected() {
    let (address, shutdown_tx) = start_relay().await;

    let _host = host_session(&address, "FULL").await.expect("host");
    let _first_guest = join_session(&address, "FULL").await.expect("first join");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut second_guest = join_session(&address, "FULL").await.expect("connect");
    let (events, _keep) = mpsc::unbounded_channel();
    let err = timeout(
        Duration::from_secs(2),
        receive_file(&mut second_guest, &events),
    )
    .await
    .expect("relay must answer quickly")
    .expect_err("second join must fail");
    assert!(matches!(err, PeerError::Relay(_)));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn malformed_and_oversized_frames_are_not_forwarded() {
    let (address, shutdown_tx) = start_relay().await;

    let mut host = raw_connect(&address, SignalMessage::Host { code: "MMMM".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut host, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::SessionHosted { .. }))
    ));

    let mut guest = raw_connect(&address, SignalMessage::Join { code: "MMMM".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));
    assert!(matches!(
        recv_wire(&mut host, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));

    host.write
        .send(Message::Binary(vec![0xFF, 0x00, 0xAB, 0xCD].into()))
        .await
        .expect("send malformed frame");
    host.write
        .send(Message::Binary(vec![0_u8; MAX_FRAME_BYTES + 1].into()))
        .await
        .expect("send oversized frame");

    assert!(
        recv_wire(&mut guest, Duration::from_millis(400)).await.is_none(),
        "guest received data from an invalid frame"
    );

    // The session must still be usable afterwards.
    let chunk = encode_frame(&WireMessage::Chunk(Bytes::from_static(b"still-alive")))
        .expect("encode chunk");
    host.write
        .send(Message::Binary(chunk.into()))
        .await
        .expect("send valid chunk");
    assert_eq!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Chunk(Bytes::from_static(b"still-alive")))
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn sender_fails_when_the_receiver_disconnects_mid_transfer() {
    let (address, shutdown_tx) = start_relay().await;

    let mut host_conn = host_session(&address, "GONE").await.expect("host session");
    // Larger than the send-buffer high-water mark, so the sender must pause
    // mid-stream and observe the relay's disconnect signal.
    let data = vec![7_u8; 24 * 1024 * 1024];
    let total = data.len() as u64;
    let sender = tokio::spawn(async move {
        let (events, _keep) = mpsc::unbounded_channel();
        let descriptor = TransferDescriptor {
            name: "doomed.bin".to_owned(),
            size: total,
            file_type: "application/octet-stream".to_owned(),
            thumbnail: None,
        };
        let mut source = Cursor::new(data);
        send_file(&mut host_conn, descriptor, &mut source, &events).await
    });

    let mut guest = raw_connect(&address, SignalMessage::Join { code: "GONE".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));
    loop {
        match recv_wire(&mut guest, Duration::from_secs(2)).await {
            Some(WireMessage::Control(ControlMessage::Metadata(_))) => break,
            Some(WireMessage::Signal(_)) => continue,
            other => panic!("expected metadata, got {:?}", other),
        }
    }

    // Ack readiness, then drop off the session entirely.
    let ready = encode_frame(&WireMessage::Control(ControlMessage::ReadyForData)).expect("encode");
    guest
        .write
        .send(Message::Binary(ready.into()))
        .await
        .expect("send ready");
    guest.write.send(Message::Close(None)).await.expect("close guest");

    let result = timeout(Duration::from_secs(10), sender)
        .await
        .expect("sender must notice the disconnect")
        .expect("sender task");
    assert!(
        matches!(result, Err(PeerError::ConnectionClosed)),
        "expected ConnectionClosed, got {:?}",
        result
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn counterpart_disconnect_is_signaled_as_peer_left() {
    let (address, shutdown_tx) = start_relay().await;

    let mut host = raw_connect(&address, SignalMessage::Host { code: "LEFT".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut host, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::SessionHosted { .. }))
    ));
    let mut guest = raw_connect(&address, SignalMessage::Join { code: "LEFT".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));
    assert!(matches!(
        recv_wire(&mut host, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));

    host.write.send(Message::Close(None)).await.expect("close host");

    assert_eq!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerLeft))
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn signal_frames_are_never_forwarded_between_peers() {
    let (address, shutdown_tx) = start_relay().await;

    let mut host = raw_connect(&address, SignalMessage::Host { code: "SSSS".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut host, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::SessionHosted { .. }))
    ));
    let mut guest = raw_connect(&address, SignalMessage::Join { code: "SSSS".to_owned() }).await;
    assert!(matches!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));
    assert!(matches!(
        recv_wire(&mut host, Duration::from_secs(2)).await,
        Some(WireMessage::Signal(SignalMessage::PeerJoined))
    ));

    let stray = encode_frame(&WireMessage::Signal(SignalMessage::PeerLeft)).expect("encode");
    host.write
        .send(Message::Binary(stray.into()))
        .await
        .expect("send stray signal");

    assert!(
        recv_wire(&mut guest, Duration::from_millis(400)).await.is_none(),
        "relay forwarded a signal frame"
    );

    // Control frames still pass.
    let eof = encode_frame(&WireMessage::Control(ControlMessage::Eof)).expect("encode eof");
    host.write.send(Message::Binary(eof.into())).await.expect("send eof");
    assert_eq!(
        recv_wire(&mut guest, Duration::from_secs(2)).await,
        Some(WireMessage::Control(ControlMessage::Eof))
    );

    let _ = shutdown_tx.send(());
}

async fn start_relay() -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral relay socket");
    let address = listener.local_addr().expect("relay local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(AppState::new())).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("ws://{}/ws", address), shutdown_tx)
}

async fn raw_connect(ws_url: &str, signal: SignalMessage) -> RawClient {
    let (ws_stream, _) = connect_async(ws_url).await.expect("connect websocket");
    let (mut write, read) = ws_stream.split();

    let frame = encode_frame(&WireMessage::Signal(signal)).expect("encode signal");
    write
        .send(Message::Binary(frame.into()))
        .await
        .expect("send signal");

    RawClient { write, read }
}

async fn recv_wire(client: &mut RawClient, wait: Duration) -> Option<WireMessage> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        let next = timeout(remaining, client.read.next()).await.ok()?;
        let message = next?.ok()?;
        match message {
            Message::Binary(bytes) => return decode_frame(&bytes).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}
