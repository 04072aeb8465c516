//! Length-prefix frame codec for stream transports.
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Length (4B)│ payload (N B)            │
//! │ LE u32     │                          │
//! └────────────┴──────────────────────────┘
//! ```
//!
//! The decoder accumulates incoming bytes and yields complete frames.
//! A single socket read may return part of the header, part of the
//! payload, or several frames concatenated; `next_frame` is called in a
//! loop until it returns `Ok(None)`.

use crate::error::{ProtocolError, Result};

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

/// Streaming frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the stream.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame payload, if one is buffered.
    ///
    /// An oversized length prefix means the stream is out of sync; the
    /// buffer is dropped and an error returned so the caller can close
    /// the connection.  Zero-length frames are valid (empty replies).
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&self.buffer[..HEADER_SIZE]);
        let expected = u32::from_le_bytes(header) as usize;

        if expected > MAX_FRAME_SIZE {
            self.buffer.clear();
            return Err(ProtocolError::FrameTooLarge(expected).into());
        }

        let total = HEADER_SIZE + expected;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let payload = self.buffer[HEADER_SIZE..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(payload))
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Reset decoder state (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Append `[LE-u32 length][payload]` to `out`.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()).into());
    }

    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}
