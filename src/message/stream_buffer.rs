//! Growable byte buffer used between the transport and message layers.
//!
//! Writers append at the end, readers consume from a cursor at the front:
//!
//! ```text
//! ┌──────────────┬─────────────────────────┬────────────────┐
//! │ consumed     │ unread                  │ spare capacity │
//! └──────────────┴─────────────────────────┴────────────────┘
//!                ▲ read_pos                ▲ data.len()
//! ```

use std::io;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Append bytes at the write end.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Bytes not yet consumed by a reader.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Mark `count` unread bytes as consumed (clamped to what is left).
    pub fn consume(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all content and rewind the cursor.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Take the unread bytes out of the buffer.
    pub fn into_vec(mut self) -> Vec<u8> {
        if self.read_pos > 0 {
            self.data.drain(..self.read_pos);
        }
        self.data
    }
}

impl From<Vec<u8>> for StreamBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, read_pos: 0 }
    }
}

impl From<&[u8]> for StreamBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from(data.to_vec())
    }
}

impl io::Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let unread = self.unread();
        let count = unread.len().min(buf.len());
        buf[..count].copy_from_slice(&unread[..count]);
        self.consume(count);
        Ok(count)
    }
}
