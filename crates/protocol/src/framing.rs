//! Line framing for chat records.
//!
//! # Frame Format
//!
//! Each frame is a payload followed by a single `\n` delimiter byte:
//!
//! ```text
//! {"user":{"name":"B","id":"abc","password_hash":"0"},"message":"hello"}\n
//! ```
//!
//! The payload itself must never contain a raw delimiter; receivers frame by
//! reading up to and including the next `\n`. No length prefix and no length
//! limit.

use crate::error::{ProtocolError, Result};

/// Byte terminating every frame on the wire.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Encoder and decoder for delimiter-terminated frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a payload into a frame by appending the delimiter.
    ///
    /// Fails if the payload already contains a raw delimiter, since the
    /// receiver would split it into two frames.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if let Some(offset) = find_delimiter(payload) {
            return Err(ProtocolError::DelimiterInPayload { offset });
        }

        let mut output = Vec::with_capacity(payload.len() + 1);
        output.extend_from_slice(payload);
        output.push(FRAME_DELIMITER);
        Ok(output)
    }

    /// Try to decode one frame from the front of `data`.
    ///
    /// Returns the frame payload (without delimiter) and the number of bytes
    /// consumed (including the delimiter), or `None` if no complete frame is
    /// buffered yet.
    pub fn decode(&self, data: &[u8]) -> Option<(Vec<u8>, usize)> {
        let end = find_delimiter(data)?;
        Some((data[..end].to_vec(), end + 1))
    }

    /// Decode every complete frame in `data`.
    ///
    /// Returns the frames in order and the number of bytes consumed; any
    /// trailing partial frame is left unconsumed.
    pub fn decode_all(&self, data: &[u8]) -> (Vec<Vec<u8>>, usize) {
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some((frame, used)) = self.decode(&data[consumed..]) {
            frames.push(frame);
            consumed += used;
        }

        (frames, consumed)
    }
}

#[inline]
fn find_delimiter(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| b == FRAME_DELIMITER)
}
