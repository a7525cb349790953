//! Sender and receiver drivers for a codedrop transfer: the peer connection
//! handle, the flow-controlled emission loop, and reassembly into a finished
//! file. Presentation concerns stay behind the [`TransferEvent`] channel.

pub mod connection;
pub mod flow;
pub mod receiver;
pub mod sender;
pub mod ws;

use codedrop_core::{CoreError, TransferDescriptor};
use thiserror::Error;

pub use connection::{PeerConnection, loopback_pair};
pub use flow::{DRAIN_POLL_INTERVAL, FlowController, SEND_BUFFER_HIGH_WATER};
pub use receiver::{ReceivedFile, receive_file};
pub use sender::send_file;
pub use ws::{host_session, join_session};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] CoreError),
    #[error("connection closed before the transfer completed")]
    ConnectionClosed,
    #[error("relay error: {0}")]
    Relay(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid relay url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Progress reporting towards whatever front end drives the transfer. Events
/// are advisory; a full channel or dropped consumer never stalls the
/// transfer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    PeerConnected,
    Started { descriptor: TransferDescriptor },
    Progress { transferred: u64, total: u64 },
    Completed,
}
