//! Wire framing shared by both peers and the relay.
//!
//! Every frame is `u32-le length | u8 message type | payload`, where the
//! length counts the type byte plus the payload. Signal and control payloads
//! are JSON; chunk payloads are the raw fragment bytes with no further
//! encoding so file data is never inflated in transit.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Upper bound on a single frame, relay-enforced. Large enough for a metadata
/// frame carrying a base64 preview image, far above any chunk frame.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Everything the receiver needs to know about the incoming file, sent once
/// per transfer before any chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub name: String,
    pub size: u64,
    #[serde(rename = "fileType")]
    pub file_type: String,
    /// Optional pre-rendered preview image, base64 on the wire.
    #[serde(with = "base64_bytes", default)]
    pub thumbnail: Option<Vec<u8>>,
}

/// Messages exchanged with the relay to establish a session. Never forwarded
/// between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Sender registers a session under a short code.
    Host { code: String },
    /// Receiver asks to be paired with the session hosted under `code`.
    Join { code: String },
    /// Relay ack: the session is registered and waiting for a peer.
    SessionHosted { code: String },
    PeerJoined,
    PeerLeft,
    Error { message: String },
}

/// Peer-to-peer transfer sequencing. The relay forwards these verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    Metadata(TransferDescriptor),
    ReadyForData,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Signal(SignalMessage),
    Control(ControlMessage),
    Chunk(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Signal = 0,
    Control = 1,
    Chunk = 2,
}

pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>, CoreError> {
    let (message_type, payload) = match message {
        WireMessage::Signal(signal) => (
            MessageType::Signal as u8,
            serde_json::to_vec(signal).map_err(|err| CoreError::Serialization(err.to_string()))?,
        ),
        WireMessage::Control(control) => (
            MessageType::Control as u8,
            serde_json::to_vec(control).map_err(|err| CoreError::Serialization(err.to_string()))?,
        ),
        WireMessage::Chunk(data) => (MessageType::Chunk as u8, data.to_vec()),
    };

    let frame_len = 1usize
        .checked_add(payload.len())
        .ok_or(CoreError::InvalidFrameLength)?;
    if frame_len + 4 > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge);
    }
    let frame_len_u32 = u32::try_from(frame_len).map_err(|_| CoreError::InvalidFrameLength)?;

    let mut out = BytesMut::with_capacity(4 + frame_len);
    out.put_u32_le(frame_len_u32);
    out.put_u8(message_type);
    out.extend_from_slice(&payload);
    Ok(out.to_vec())
}

pub fn decode_frame(frame: &[u8]) -> Result<WireMessage, CoreError> {
    if frame.len() < 5 {
        return Err(CoreError::InvalidFrameLength);
    }
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge);
    }

    let mut cursor = frame;
    let expected_len = cursor.get_u32_le() as usize;
    if expected_len + 4 != frame.len() {
        return Err(CoreError::InvalidFrameLength);
    }

    let message_type = cursor.get_u8();
    let payload = cursor;

    match message_type {
        x if x == MessageType::Signal as u8 => {
            let signal: SignalMessage = serde_json::from_slice(payload)
                .map_err(|err| CoreError::Serialization(err.to_string()))?;
            Ok(WireMessage::Signal(signal))
        }
        x if x == MessageType::Control as u8 => {
            let control: ControlMessage = serde_json::from_slice(payload)
                .map_err(|err| CoreError::Serialization(err.to_string()))?;
            Ok(WireMessage::Control(control))
        }
        x if x == MessageType::Chunk as u8 => {
            Ok(WireMessage::Chunk(Bytes::copy_from_slice(payload)))
        }
        other => Err(CoreError::UnsupportedMessageType(other)),
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| {
                STANDARD
                    .decode(text.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
