use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;

use super::{find_crlf, Buffer, CRLF};

const SCAN_BLOCK: usize = 4 * 1024;

/// A [`Buffer`] that spools received bytes to a temporary file.
///
/// The file is created on construction and unlinked when the buffer is
/// dropped, whether or not earlier writes succeeded.
#[derive(Debug)]
pub struct SpoolBuffer {
    file: NamedTempFile,
    /// Bytes appended since the last reset.
    written: u64,
    /// Bytes consumed since the last reset.
    cursor: u64,
    /// Offset up to which the unread region is known to hold no CRLF.
    scanned: u64,
}

impl SpoolBuffer {
    /// Create a spool file in `dir`, or in the system temporary directory.
    pub fn new(dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tick-h1-");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        log::debug!("spooling response bytes to {}", file.path().display());

        Ok(Self {
            file,
            written: 0,
            cursor: 0,
            scanned: 0,
        })
    }

    /// Location of the spool file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn file(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<BytesMut> {
        let mut out = BytesMut::zeroed(len);
        let file = self.file();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut out)?;
        Ok(out)
    }
}

impl Buffer for SpoolBuffer {
    fn reset(&mut self) -> io::Result<()> {
        self.written = 0;
        self.cursor = 0;
        self.scanned = 0;
        let file = self.file();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn size(&self) -> usize {
        (self.written - self.cursor) as usize
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let offset = self.written;
        let file = self.file();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        // Back up one byte in case the CR was the last byte of the previous scan.
        let mut from = self.scanned.saturating_sub(1).max(self.cursor);
        while from < self.written {
            let len = SCAN_BLOCK.min((self.written - from) as usize);
            let block = self.read_at(from, len)?;
            if let Some(pos) = find_crlf(&block) {
                let line_len = (from - self.cursor) as usize + pos;
                let line = self.read_at(self.cursor, line_len)?;
                self.cursor += (line_len + CRLF.len()) as u64;
                self.scanned = self.cursor;
                return Ok(Some(line.freeze()));
            }
            if from + len as u64 == self.written {
                break;
            }
            // Overlap blocks by one byte so a CRLF straddling them is found.
            from += len as u64 - 1;
        }
        self.scanned = self.written;
        Ok(None)
    }

    fn read(&mut self, n: usize) -> io::Result<Option<Bytes>> {
        if self.size() < n {
            return Ok(None);
        }
        let run = self.read_at(self.cursor, n)?;
        self.cursor += n as u64;
        self.scanned = self.scanned.max(self.cursor);
        Ok(Some(run.freeze()))
    }
}
