//! Protocol core for codedrop: wire framing, chunking, reassembly and the
//! per-transfer state machine. This crate is I/O-free; the relay and peer
//! crates drive it.

pub mod chunker;
pub mod reassembler;
pub mod session;
pub mod short_code;
pub mod wire;

use thiserror::Error;

pub use chunker::{CHUNK_SIZE, ChunkPlan, ChunkSpan};
pub use reassembler::Reassembler;
pub use session::{Role, TransferSession, TransferState};
pub use short_code::{
    SHORT_CODE_ALPHABET, SHORT_CODE_LEN, generate_short_code, normalize_short_code,
};
pub use wire::{
    ControlMessage, MAX_FRAME_BYTES, MessageType, SignalMessage, TransferDescriptor, WireMessage,
    decode_frame, encode_frame,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid frame length")]
    InvalidFrameLength,
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u8),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("short code must be exactly {SHORT_CODE_LEN} characters")]
    ShortCodeLength,
    #[error("short code contains unsupported character {0:?}")]
    ShortCodeCharacter(char),
    #[error("unexpected {message} in state {state:?}")]
    UnexpectedMessage {
        message: &'static str,
        state: TransferState,
    },
    #[error("received {received} bytes but the descriptor declared {expected}")]
    SizeMismatch { expected: u64, received: u64 },
    #[error("finalize called before end of stream")]
    FinalizeBeforeEof,
}
