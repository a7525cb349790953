//! Fixed-size chunking of a byte sequence with a known total length.
//!
//! The sender never materializes the whole file: a [`ChunkPlan`] yields the
//! spans to read one at a time, and the peer crate performs the actual reads.

/// Fragment size for file data. Every chunk is exactly this long except
/// possibly the last.
pub const CHUNK_SIZE: usize = 16384;

/// One fragment's position within the source byte sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub offset: u64,
    pub len: usize,
}

impl ChunkSpan {
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Lazy, finite sequence of [`ChunkSpan`]s covering `total_len` bytes,
/// restartable from an arbitrary offset.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    total_len: u64,
    chunk_size: usize,
    next_offset: u64,
}

impl ChunkPlan {
    pub fn new(total_len: u64) -> Self {
        Self::with_chunk_size(total_len, CHUNK_SIZE)
    }

    /// Panics if `chunk_size` is zero; that is a programmer error, not a
    /// recoverable condition.
    pub fn with_chunk_size(total_len: u64, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            total_len,
            chunk_size,
            next_offset: 0,
        }
    }

    /// Restart generation from `offset`. Panics if `offset` is past the end
    /// of the sequence.
    pub fn resume_from(mut self, offset: u64) -> Self {
        assert!(
            offset <= self.total_len,
            "resume offset {offset} past end of sequence ({})",
            self.total_len
        );
        self.next_offset = offset;
        self
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Number of chunks the full plan produces, counted from offset zero.
    pub fn chunk_count(&self) -> u64 {
        self.total_len.div_ceil(self.chunk_size as u64)
    }
}

impl Iterator for ChunkPlan {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.next_offset >= self.total_len {
            return None;
        }
        let remaining = self.total_len - self.next_offset;
        let len = remaining.min(self.chunk_size as u64) as usize;
        let span = ChunkSpan {
            offset: self.next_offset,
            len,
        };
        self.next_offset += len as u64;
        Some(span)
    }
}
