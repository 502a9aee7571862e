use std::io;

use bytes::{Bytes, BytesMut};

use super::{find_crlf, Buffer, CRLF};

/// A [`Buffer`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    data: BytesMut,
    /// How far into `data` we already searched for a CRLF.
    scanned: usize,
}

impl MemoryBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Buffer for MemoryBuffer {
    fn reset(&mut self) -> io::Result<()> {
        self.data.clear();
        self.scanned = 0;
        Ok(())
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        // Back up one byte in case the CR arrived in the previous append.
        let from = self.scanned.saturating_sub(1);
        match find_crlf(&self.data[from..]) {
            Some(pos) => {
                let mut line = self.data.split_to(from + pos + CRLF.len());
                line.truncate(from + pos);
                self.scanned = 0;
                Ok(Some(line.freeze()))
            }
            None => {
                self.scanned = self.data.len();
                Ok(None)
            }
        }
    }

    fn read(&mut self, n: usize) -> io::Result<Option<Bytes>> {
        if self.data.len() < n {
            return Ok(None);
        }
        self.scanned = self.scanned.saturating_sub(n);
        Ok(Some(self.data.split_to(n).freeze()))
    }
}
