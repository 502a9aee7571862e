use std::fmt;
use std::io;

use http_types::Response;
use thiserror::Error;

/// The phase of a request whose deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the connection to become writable.
    Connect,
    /// Waiting for the first response bytes after the request was written.
    Write,
    /// Waiting for more response bytes while decoding the response.
    Read,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connect => f.write_str("connect"),
            Phase::Write => f.write_str("write"),
            Phase::Read => f.write_str("read"),
        }
    }
}

/// Errors raised while driving a request.
///
/// None of these are retried internally. Once a [`Client`](crate::Client)
/// returns one from `tick`, it must be reset before it accepts a new request.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection could not be established.
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),

    /// The readiness poll itself failed.
    #[error("socket poll failed: {0}")]
    Poll(#[source] io::Error),

    /// Writing the request failed.
    #[error("failed to send data: {0}")]
    Write(#[source] io::Error),

    /// Fewer bytes were written than the request payload holds.
    #[error("the size sent ({written}) does not match the size of payload ({expected})")]
    ShortWrite {
        /// Bytes accepted by the socket.
        written: usize,
        /// Bytes in the serialized request.
        expected: usize,
    },

    /// Reading from the socket failed.
    #[error("failed to read data: {0}")]
    Read(#[source] io::Error),

    /// A phase deadline expired.
    #[error("{0} timed out")]
    Timeout(Phase),

    /// The status line does not match `HTTP/<d>.<d> <code> <reason>`.
    #[error("the status line ({0:?}) does not match the pattern")]
    StatusLine(String),

    /// A header line could not be parsed.
    #[error("malformed header line: {0:?}")]
    Header(String),

    /// The `Content-Length` header is not a byte count.
    #[error("invalid content-length: {0:?}")]
    ContentLength(String),

    /// The chunked body framing is broken.
    #[error("malformed chunked body: {0}")]
    Chunk(String),

    /// A line exceeded its maximum length before a CRLF arrived.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The receive buffer's backing store failed.
    #[error("buffer i/o failed: {0}")]
    Buffer(#[source] io::Error),

    /// The response could not be converted into `http_types` values.
    #[error("{0}")]
    Http(http_types::Error),

    /// The response was parsed successfully and carries a 4xx status.
    #[error("client error: {}", .0.status())]
    ClientStatus(Response),

    /// The response was parsed successfully and carries a 5xx status.
    #[error("server error: {}", .0.status())]
    ServerStatus(Response),

    /// The response was requested before the exchange completed.
    #[error("the response is not complete")]
    NotDone,

    /// The client failed earlier and has to be reset.
    #[error("the client failed and must be reset")]
    Failed,
}

impl Error {
    /// Returns `true` if a phase deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// The response carried by a 4xx or 5xx outcome.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::ClientStatus(res) | Error::ServerStatus(res) => Some(res),
            _ => None,
        }
    }

    /// Take the response carried by a 4xx or 5xx outcome.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Error::ClientStatus(res) | Error::ServerStatus(res) => Some(res),
            _ => None,
        }
    }
}

impl From<http_types::Error> for Error {
    fn from(err: http_types::Error) -> Self {
        Error::Http(err)
    }
}

/// A `Result` alias with [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
