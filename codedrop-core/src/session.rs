//! Per-transfer protocol state machine, shared by both roles.
//!
//! One `TransferSession` value is owned by whichever driver holds the
//! connection; it is never ambient state. Message sequencing for a single
//! file:
//!
//! ```text
//! sender                               receiver
//!   | metadata ------------------------> | (resets session state)
//!   | <----------------- ready-for-data |
//!   | chunk* --------------------------> |
//!   | eof -----------------------------> | (reassembly)
//! ```
//!
//! Any message outside this order fails the session; there is no retry or
//! resumption, a fresh metadata exchange starts over.

use bytes::Bytes;

use crate::reassembler::Reassembler;
use crate::wire::{ControlMessage, TransferDescriptor};
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    AwaitingPeer,
    MetadataSent,
    MetadataReceived,
    ReadyForData,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug)]
pub struct TransferSession {
    role: Role,
    state: TransferState,
    descriptor: Option<TransferDescriptor>,
    bytes_transferred: u64,
    reassembler: Option<Reassembler>,
}

impl TransferSession {
    pub fn sender(descriptor: TransferDescriptor) -> Self {
        Self {
            role: Role::Sender,
            state: TransferState::Idle,
            descriptor: Some(descriptor),
            bytes_transferred: 0,
            reassembler: None,
        }
    }

    pub fn receiver() -> Self {
        Self {
            role: Role::Receiver,
            state: TransferState::Idle,
            descriptor: None,
            bytes_transferred: 0,
            reassembler: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn descriptor(&self) -> Option<&TransferDescriptor> {
        self.descriptor.as_ref()
    }

    /// The logical connection is open; wait for the counterpart.
    pub fn connection_opened(&mut self) -> Result<(), CoreError> {
        self.expect_state("connection open", &[TransferState::Idle])?;
        self.state = TransferState::AwaitingPeer;
        Ok(())
    }

    /// Abandon the session in place after a transport error or disconnect.
    pub fn fail(&mut self) {
        self.state = TransferState::Failed;
    }

    // --- sender side ---

    /// The counterpart has joined: emit the metadata message.
    pub fn metadata_to_send(&mut self) -> Result<ControlMessage, CoreError> {
        self.expect_role(Role::Sender, "metadata")?;
        self.expect_state("metadata", &[TransferState::AwaitingPeer])?;
        let descriptor = self.descriptor.clone().ok_or(CoreError::UnexpectedMessage {
            message: "metadata without descriptor",
            state: self.state,
        })?;
        self.state = TransferState::MetadataSent;
        Ok(ControlMessage::Metadata(descriptor))
    }

    /// The receiver signalled readiness; chunk emission may begin. No chunk
    /// is ever sent before this transition.
    pub fn ready_received(&mut self) -> Result<(), CoreError> {
        self.expect_role(Role::Sender, "ready-for-data")?;
        self.expect_state("ready-for-data", &[TransferState::MetadataSent])?;
        self.state = TransferState::Streaming;
        Ok(())
    }

    /// Account for one emitted chunk.
    pub fn chunk_sent(&mut self, len: usize) -> Result<(), CoreError> {
        self.expect_role(Role::Sender, "chunk")?;
        self.expect_state("chunk", &[TransferState::Streaming])?;
        let declared = self.declared_size();
        let new_total = self.bytes_transferred + len as u64;
        if new_total > declared {
            self.state = TransferState::Failed;
            return Err(CoreError::SizeMismatch {
                expected: declared,
                received: new_total,
            });
        }
        self.bytes_transferred = new_total;
        Ok(())
    }

    /// Emit end of stream once every declared byte has been sent.
    pub fn eof_to_send(&mut self) -> Result<ControlMessage, CoreError> {
        self.expect_role(Role::Sender, "eof")?;
        self.expect_state("eof", &[TransferState::Streaming])?;
        let declared = self.declared_size();
        if self.bytes_transferred != declared {
            self.state = TransferState::Failed;
            return Err(CoreError::SizeMismatch {
                expected: declared,
                received: self.bytes_transferred,
            });
        }
        self.state = TransferState::Completed;
        Ok(ControlMessage::Eof)
    }

    // --- receiver side ---

    /// A metadata message always starts a fresh transfer: any partial state
    /// from a prior transfer on this connection is discarded before the
    /// receiver may signal readiness.
    pub fn metadata_received(
        &mut self,
        descriptor: TransferDescriptor,
    ) -> Result<(), CoreError> {
        self.expect_role(Role::Receiver, "metadata")?;
        self.reassembler = Some(Reassembler::new(descriptor.size));
        self.bytes_transferred = 0;
        self.descriptor = Some(descriptor);
        self.state = TransferState::MetadataReceived;
        Ok(())
    }

    /// Signal readiness for chunk data. Valid only once the session state has
    /// been reset by a metadata message.
    pub fn ready_to_send(&mut self) -> Result<ControlMessage, CoreError> {
        self.expect_role(Role::Receiver, "ready-for-data")?;
        self.expect_state("ready-for-data", &[TransferState::MetadataReceived])?;
        self.state = TransferState::ReadyForData;
        Ok(ControlMessage::ReadyForData)
    }

    /// Append one received chunk, returning the updated byte count.
    pub fn chunk_received(&mut self, chunk: Bytes) -> Result<u64, CoreError> {
        self.expect_role(Role::Receiver, "chunk")?;
        self.expect_state(
            "chunk",
            &[TransferState::ReadyForData, TransferState::Streaming],
        )?;
        let reassembler = self.reassembler_mut()?;
        if let Err(err) = reassembler.append(chunk) {
            self.state = TransferState::Failed;
            return Err(err);
        }
        self.state = TransferState::Streaming;
        self.bytes_transferred = self.reassembler_mut()?.received_len();
        Ok(self.bytes_transferred)
    }

    /// End of stream: verify the accumulated length and complete the session.
    pub fn eof_received(&mut self) -> Result<(), CoreError> {
        self.expect_role(Role::Receiver, "eof")?;
        self.expect_state(
            "eof",
            &[TransferState::ReadyForData, TransferState::Streaming],
        )?;
        let reassembler = self.reassembler_mut()?;
        if let Err(err) = reassembler.mark_eof() {
            self.state = TransferState::Failed;
            return Err(err);
        }
        self.state = TransferState::Completed;
        Ok(())
    }

    /// Materialize the received file. Valid only in `Completed`.
    pub fn finalize(&mut self) -> Result<Bytes, CoreError> {
        self.expect_role(Role::Receiver, "finalize")?;
        if self.state != TransferState::Completed {
            return Err(CoreError::FinalizeBeforeEof);
        }
        self.reassembler_mut()?.finalize()
    }

    fn declared_size(&self) -> u64 {
        self.descriptor.as_ref().map(|d| d.size).unwrap_or(0)
    }

    fn reassembler_mut(&mut self) -> Result<&mut Reassembler, CoreError> {
        let state = self.state;
        self.reassembler
            .as_mut()
            .ok_or(CoreError::UnexpectedMessage {
                message: "data before metadata",
                state,
            })
    }

    fn expect_role(&self, role: Role, message: &'static str) -> Result<(), CoreError> {
        if self.role != role {
            return Err(CoreError::UnexpectedMessage {
                message,
                state: self.state,
            });
        }
        Ok(())
    }

    fn expect_state(
        &self,
        message: &'static str,
        allowed: &[TransferState],
    ) -> Result<(), CoreError> {
        if !allowed.contains(&self.state) {
            return Err(CoreError::UnexpectedMessage {
                message,
                state: self.state,
            });
        }
        Ok(())
    }
}
