//! Request body assembly from streamed chunks.
//!
//! # Responsibilities
//! - Accumulate network chunks of arbitrary size into one contiguous buffer
//! - Grow capacity geometrically so copy cost stays amortized linear
//! - Expose the complete body only once the stream has terminated
//!
//! # Design Decisions
//! - Iterative growth loop: pathological chunk sequences cannot grow the
//!   call stack
//! - No size limit at this layer; the HTTP surface enforces
//!   `security.max_body_size` before a chunk reaches the buffer
//! - `finish()` hands out an immutable `Bytes` so downstream stages can
//!   share the body without copying

use bytes::Bytes;

/// Initial buffer capacity in bytes.
const INITIAL_CAPACITY: usize = 1024;

/// Growable accumulator for a streamed request body.
///
/// Chunks are appended in arrival order; the assembled body is the exact
/// concatenation of every chunk seen before `finish()`.
pub struct BodyBuffer {
    buf: Vec<u8>,
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append one chunk, doubling capacity until it fits.
    pub fn append(&mut self, chunk: &[u8]) {
        let mut capacity = self.buf.capacity().max(INITIAL_CAPACITY);
        while capacity - self.buf.len() < chunk.len() {
            capacity *= 2;
        }
        if capacity > self.buf.capacity() {
            self.buf.reserve_exact(capacity - self.buf.len());
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Terminal event: freeze the accumulated bytes into the complete body.
    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

impl Default for BodyBuffer {
    fn default() -> Self {
        Self::new()
    }
}
