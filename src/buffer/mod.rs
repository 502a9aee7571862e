//! Receive buffers.
//!
//! A buffer accumulates raw socket bytes at its tail and hands out complete
//! lines and exactly-sized runs from its head. Partial units are never
//! consumed: a read that cannot be satisfied yet returns `None` and leaves the
//! buffer untouched.

use std::fmt;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;

mod memory;
mod spool;

pub use memory::MemoryBuffer;
pub use spool::SpoolBuffer;

const CRLF: &[u8] = b"\r\n";

/// An append-only byte accumulator with a read cursor.
///
/// `size` always equals the bytes appended minus the bytes consumed since the
/// last `reset`.
pub trait Buffer: fmt::Debug + Send {
    /// Discard all buffered data.
    fn reset(&mut self) -> io::Result<()>;

    /// Number of unread bytes.
    fn size(&self) -> usize;

    /// Add bytes to the tail.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Take the bytes before the first CRLF and advance past the CRLF.
    ///
    /// Returns `None` when no CRLF has been buffered yet.
    fn read_line(&mut self) -> io::Result<Option<Bytes>>;

    /// Take exactly `n` bytes.
    ///
    /// Returns `None` when fewer than `n` bytes are buffered.
    fn read(&mut self, n: usize) -> io::Result<Option<Bytes>>;
}

/// Which [`Buffer`] backend a socket receives into.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BufferKind {
    /// Keep received bytes in process memory.
    #[default]
    Memory,
    /// Spool received bytes to a temporary file, in `dir` or the system
    /// temporary directory.
    Spooled {
        /// Directory for the spool file.
        dir: Option<PathBuf>,
    },
}

impl BufferKind {
    /// Create an empty buffer of this kind.
    pub fn build(&self) -> io::Result<Box<dyn Buffer>> {
        Ok(match self {
            BufferKind::Memory => Box::new(MemoryBuffer::new()),
            BufferKind::Spooled { dir } => Box::new(SpoolBuffer::new(dir.as_deref())?),
        })
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).position(|w| w == CRLF)
}
