//! Receiver-side accumulation of chunks into the final byte sequence.

use bytes::{Bytes, BytesMut};

use crate::CoreError;

/// Collects chunks in arrival order and materializes the complete sequence
/// once end of stream is observed. The transport guarantees ordered, reliable
/// delivery, so no reordering or gap handling happens here.
#[derive(Debug)]
pub struct Reassembler {
    expected_len: u64,
    received_len: u64,
    chunks: Vec<Bytes>,
    eof_seen: bool,
    materialized: Option<Bytes>,
}

impl Reassembler {
    pub fn new(expected_len: u64) -> Self {
        Self {
            expected_len,
            received_len: 0,
            chunks: Vec::new(),
            eof_seen: false,
            materialized: None,
        }
    }

    pub fn received_len(&self) -> u64 {
        self.received_len
    }

    pub fn expected_len(&self) -> u64 {
        self.expected_len
    }

    /// Append one chunk. Rejects data past end of stream and data that would
    /// overrun the declared size.
    pub fn append(&mut self, chunk: Bytes) -> Result<(), CoreError> {
        if self.eof_seen {
            return Err(CoreError::UnexpectedMessage {
                message: "chunk after eof",
                state: crate::TransferState::Completed,
            });
        }
        let new_len = self.received_len + chunk.len() as u64;
        if new_len > self.expected_len {
            return Err(CoreError::SizeMismatch {
                expected: self.expected_len,
                received: new_len,
            });
        }
        self.received_len = new_len;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Record end of stream. Fails the session if the accumulated length does
    /// not match the descriptor's declared size.
    pub fn mark_eof(&mut self) -> Result<(), CoreError> {
        if self.received_len != self.expected_len {
            return Err(CoreError::SizeMismatch {
                expected: self.expected_len,
                received: self.received_len,
            });
        }
        self.eof_seen = true;
        Ok(())
    }

    /// Concatenate the accumulated chunks. Only valid after [`mark_eof`];
    /// the chunk list is released on first call and the result cached, so
    /// repeated calls return byte-identical output.
    ///
    /// [`mark_eof`]: Reassembler::mark_eof
    pub fn finalize(&mut self) -> Result<Bytes, CoreError> {
        if !self.eof_seen {
            return Err(CoreError::FinalizeBeforeEof);
        }
        if let Some(materialized) = &self.materialized {
            return Ok(materialized.clone());
        }

        let mut out = BytesMut::with_capacity(self.received_len as usize);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        let materialized = out.freeze();
        self.materialized = Some(materialized.clone());
        Ok(materialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_stream_finalizes_empty() {
        let mut reassembler = Reassembler::new(0);
        reassembler.mark_eof().unwrap();
        assert_eq!(reassembler.finalize().unwrap().len(), 0);
    }

    #[test]
    fn chunks_concatenate_in_arrival_order() {
        let mut reassembler = Reassembler::new(6);
        reassembler.append(Bytes::from_static(b"ab")).unwrap();
        reassembler.append(Bytes::from_static(b"cd")).unwrap();
        reassembler.append(Bytes::from_static(b"ef")).unwrap();
        assert_eq!(reassembler.received_len(), 6);
        reassembler.mark_eof().unwrap();
        assert_eq!(reassembler.finalize().unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut reassembler = Reassembler::new(4);
        reassembler.append(Bytes::from_static(b"wxyz")).unwrap();
        reassembler.mark_eof().unwrap();
        let first = reassembler.finalize().unwrap();
        let second = reassembler.finalize().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn finalize_before_eof_is_rejected() {
        let mut reassembler = Reassembler::new(2);
        reassembler.append(Bytes::from_static(b"ab")).unwrap();
        assert_eq!(reassembler.finalize(), Err(CoreError::FinalizeBeforeEof));
    }

    #[test]
    fn short_stream_at_eof_is_a_size_mismatch() {
        let mut reassembler = Reassembler::new(10);
        reassembler.append(Bytes::from_static(b"abc")).unwrap();
        assert_eq!(
            reassembler.mark_eof(),
            Err(CoreError::SizeMismatch {
                expected: 10,
                received: 3
            })
        );
    }

    #[test]
    fn overrun_is_rejected_on_append() {
        let mut reassembler = Reassembler::new(3);
        assert_eq!(
            reassembler.append(Bytes::from_static(b"abcd")),
            Err(CoreError::SizeMismatch {
                expected: 3,
                received: 4
            })
        );
        // The rejected chunk must not count towards progress.
        assert_eq!(reassembler.received_len(), 0);
    }
}
