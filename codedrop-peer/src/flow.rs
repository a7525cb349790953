//! Sender-side backpressure against the connection's outgoing buffer.

use std::time::Duration;

use bytes::Bytes;
use codedrop_core::WireMessage;

use crate::PeerError;
use crate::connection::PeerConnection;

/// Buffered-byte threshold above which chunk emission pauses.
pub const SEND_BUFFER_HIGH_WATER: usize = 16 * 1024 * 1024;

/// How often a paused sender re-checks the buffer.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Throttles fragment emission so the transport's send queue stays bounded.
/// One threshold, checked before every send; suspension is cooperative and
/// local to the emission loop.
#[derive(Debug, Clone)]
pub struct FlowController {
    high_water: usize,
    poll_interval: Duration,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(SEND_BUFFER_HIGH_WATER, DRAIN_POLL_INTERVAL)
    }
}

impl FlowController {
    pub fn new(high_water: usize, poll_interval: Duration) -> Self {
        Self {
            high_water,
            poll_interval,
        }
    }

    /// Suspend until the outgoing buffer has drained to the high-water mark
    /// or below.
    pub async fn wait_for_capacity(&self, conn: &PeerConnection) {
        while conn.buffered_bytes() > self.high_water {
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Emit one fragment, waiting for buffer capacity first. A failed send
    /// aborts the transfer; there is no retry.
    pub async fn send_chunk(&self, conn: &PeerConnection, payload: Bytes) -> Result<(), PeerError> {
        self.wait_for_capacity(conn).await;
        conn.send(&WireMessage::Chunk(payload))
    }
}
