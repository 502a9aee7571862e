//! Non-blocking connections.
//!
//! A [`Socket`] owns one TCP (optionally TLS) stream in non-blocking mode and
//! the [`Buffer`] its bytes are received into. Every operation returns
//! immediately: readiness is checked with a poll bounded by the configured
//! interval, and reads that cannot be satisfied yet report `None` so the
//! caller can come back on a later tick.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_types::Url;
use rustix::event::{PollFd, PollFlags};
use rustix::io::Errno;
use socket2::{Domain, Protocol, Type};

use crate::buffer::Buffer;
use crate::config::ClientConfig;
use crate::{Error, Result};

pub(crate) mod tls;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Plain TCP or TLS over TCP.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

/// Where a socket connects to.
///
/// Two requests may share a socket only if their endpoints are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Whether the connection is wrapped in TLS.
    pub tls: bool,
    /// Host from the URL, used for DNS, SNI and certificate checks.
    pub host: String,
    /// Port from the URL, or the scheme's default.
    pub port: u16,
    /// Address to connect to instead of resolving `host`.
    pub remote: Option<IpAddr>,
}

impl Endpoint {
    /// Derive the endpoint for `url`. Only `http` and `https` are supported.
    pub fn from_url(url: &Url, remote: Option<IpAddr>) -> Result<Self> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            scheme => {
                return Err(Error::Connect(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported scheme {:?}", scheme),
                )))
            }
        };
        let host = url.host_str().ok_or_else(|| {
            Error::Connect(io::Error::new(
                io::ErrorKind::InvalidInput,
                "missing hostname",
            ))
        })?;
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        Ok(Self {
            tls,
            host: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
            port,
            remote,
        })
    }

    fn resolve(&self) -> Result<SocketAddr> {
        if let Some(ip) = self.remote {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(Error::Connect)?
            .next()
            .ok_or_else(|| {
                Error::Connect(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}:{}", self.host, self.port),
                ))
            })
    }
}

/// What a single OS read produced.
enum Fill {
    Data,
    Pending,
    Eof,
}

/// One non-blocking connection and its receive buffer.
pub struct Socket {
    stream: Stream,
    buffer: Box<dyn Buffer>,
    ready_to_read: bool,
    ready_to_write: bool,
    poll_interval: Duration,
    scratch: Box<[u8]>,
    received: u64,
    eof: bool,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("tls", &matches!(self.stream, Stream::Tls(_)))
            .field("buffer", &self.buffer)
            .field("ready_to_read", &self.ready_to_read)
            .field("ready_to_write", &self.ready_to_write)
            .field("received", &self.received)
            .field("eof", &self.eof)
            .finish()
    }
}

impl Socket {
    /// Start a non-blocking connect to `endpoint`.
    ///
    /// The connection is usually still in progress when this returns;
    /// [`is_ready_to_write`](Socket::is_ready_to_write) reports when it is
    /// established. `tls` must be given for TLS endpoints.
    pub fn connect(
        endpoint: &Endpoint,
        config: &ClientConfig,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        let addr = endpoint.resolve()?;
        log::debug!(
            "connecting to {} ({}:{}, tls: {})",
            addr,
            endpoint.host,
            endpoint.port,
            endpoint.tls
        );

        let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::Connect)?;
        socket.set_nonblocking(true).map_err(Error::Connect)?;
        if let Some(local) = config.local_address {
            socket
                .bind(&SocketAddr::new(local, 0).into())
                .map_err(Error::Connect)?;
        }
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(err) if connect_in_progress(&err) => {}
            Err(err) => return Err(Error::Connect(err)),
        }

        let tcp: TcpStream = socket.into();
        let _ = tcp.set_nodelay(true);

        let stream = match (endpoint.tls, tls) {
            (false, _) => Stream::Plain(tcp),
            (true, Some(tls)) => {
                let server_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
                    .map_err(|err| {
                        Error::Connect(io::Error::new(io::ErrorKind::InvalidInput, err))
                    })?;
                let conn = rustls::ClientConnection::new(tls, server_name)
                    .map_err(|err| Error::Connect(io::Error::new(io::ErrorKind::Other, err)))?;
                Stream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp)))
            }
            (true, None) => {
                return Err(Error::Connect(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "tls endpoint without tls configuration",
                )))
            }
        };

        Ok(Self {
            stream,
            buffer: config.buffer.build().map_err(Error::Buffer)?,
            ready_to_read: false,
            ready_to_write: false,
            poll_interval: config.poll_interval,
            scratch: vec![0; config.read_length.max(1)].into_boxed_slice(),
            received: 0,
            eof: false,
        })
    }

    fn tcp(&self) -> &TcpStream {
        match &self.stream {
            Stream::Plain(s) => s,
            Stream::Tls(s) => &s.sock,
        }
    }

    /// Total bytes received from the OS over the socket's lifetime.
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Whether the peer closed its side of the connection.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    fn poll(&self, flags: PollFlags) -> Result<bool> {
        let timeout = self.poll_interval.as_millis().min(i32::MAX as u128) as i32;
        let mut fds = [PollFd::new(self.tcp(), flags)];
        match rustix::event::poll(&mut fds, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(!fds[0].revents().is_empty()),
            Err(errno) if errno == Errno::INTR => Ok(false),
            Err(errno) => Err(Error::Poll(errno.into())),
        }
    }

    /// Whether the connection is established and accepts writes.
    ///
    /// For TLS this also drives the handshake. Once `true`, the result is
    /// cached and no further polls are made.
    pub fn is_ready_to_write(&mut self) -> Result<bool> {
        if self.ready_to_write {
            return Ok(true);
        }
        if !self.poll(PollFlags::OUT)? {
            return Ok(false);
        }
        // A failed non-blocking connect shows up as writable with SO_ERROR set.
        if let Some(err) = self.tcp().take_error().map_err(Error::Connect)? {
            return Err(Error::Connect(err));
        }
        if !self.handshake()? {
            return Ok(false);
        }

        self.ready_to_write = true;
        Ok(true)
    }

    /// Whether the connection has bytes to read.
    ///
    /// Once `true`, the result is cached and no further polls are made.
    pub fn is_ready_to_read(&mut self) -> Result<bool> {
        if self.ready_to_read {
            return Ok(true);
        }
        if self.buffer.size() > 0 || self.poll(PollFlags::IN)? {
            self.ready_to_read = true;
        }
        Ok(self.ready_to_read)
    }

    fn handshake(&mut self) -> Result<bool> {
        if let Stream::Tls(tls) = &mut self.stream {
            while tls.conn.is_handshaking() {
                match tls.conn.complete_io(&mut tls.sock) {
                    Ok(_) => {}
                    Err(err) if would_block(&err) => return Ok(false),
                    Err(err) => return Err(Error::Connect(err)),
                }
            }
        }
        Ok(true)
    }

    /// Write `payload` in one go.
    ///
    /// Starts a new request cycle by discarding any buffered bytes. Returns
    /// `Ok(false)` if the socket is not writable yet. A write that does not
    /// take the whole payload is an error, not resumed.
    pub fn send(&mut self, payload: &[u8]) -> Result<bool> {
        self.buffer.reset().map_err(Error::Buffer)?;

        if !self.is_ready_to_write()? {
            return Ok(false);
        }

        let written = match &mut self.stream {
            Stream::Plain(s) => s.write(payload),
            Stream::Tls(tls) => send_tls(&mut tls.conn, &mut tls.sock, payload),
        };
        let written = match written {
            Ok(n) => n,
            Err(err) if would_block(&err) => 0,
            Err(err) => return Err(Error::Write(err)),
        };
        if written != payload.len() {
            return Err(Error::ShortWrite {
                written,
                expected: payload.len(),
            });
        }

        log::trace!("wrote {} bytes", written);
        Ok(true)
    }

    fn fill(&mut self) -> Result<Fill> {
        if self.eof {
            return Ok(Fill::Eof);
        }
        let result = match &mut self.stream {
            Stream::Plain(s) => s.read(&mut self.scratch),
            Stream::Tls(tls) => {
                flush_tls(&mut tls.conn, &mut tls.sock).and_then(|()| tls.read(&mut self.scratch))
            }
        };
        match result {
            Ok(0) => {
                self.eof = true;
                Ok(Fill::Eof)
            }
            Ok(n) => {
                self.buffer
                    .append(&self.scratch[..n])
                    .map_err(Error::Buffer)?;
                self.received += n as u64;
                Ok(Fill::Data)
            }
            Err(err) if would_block(&err) => Ok(Fill::Pending),
            // Peers commonly close TLS without a close_notify.
            Err(err)
                if err.kind() == io::ErrorKind::UnexpectedEof
                    && matches!(self.stream, Stream::Tls(_)) =>
            {
                self.eof = true;
                Ok(Fill::Eof)
            }
            Err(err) => Err(Error::Read(err)),
        }
    }

    /// Read one line, without its CRLF.
    ///
    /// Returns `Ok(None)` until a whole line has been received. Fails if more
    /// than `max_len` bytes arrive without a CRLF, or if the peer closes the
    /// connection mid-line.
    pub fn read_line(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        loop {
            if let Some(line) = self.buffer.read_line().map_err(Error::Buffer)? {
                return Ok(Some(line));
            }
            if self.buffer.size() > max_len {
                return Err(Error::LineTooLong(max_len));
            }
            if !self.is_ready_to_read()? {
                return Ok(None);
            }
            match self.fill()? {
                Fill::Data => {}
                Fill::Pending => return Ok(None),
                Fill::Eof => return Err(Error::Read(closed_early())),
            }
        }
    }

    /// Read exactly `n` bytes.
    ///
    /// Returns `Ok(None)` until `n` bytes have been received. Fails if the
    /// peer closes the connection first.
    pub fn read_specific_size(&mut self, n: usize) -> Result<Option<Bytes>> {
        loop {
            if let Some(run) = self.buffer.read(n).map_err(Error::Buffer)? {
                return Ok(Some(run));
            }
            if !self.is_ready_to_read()? {
                return Ok(None);
            }
            match self.fill()? {
                Fill::Data => {}
                Fill::Pending => return Ok(None),
                Fill::Eof => return Err(Error::Read(closed_early())),
            }
        }
    }

    /// Read everything until the peer closes the connection.
    ///
    /// Returns `Ok(None)` while the connection is open, and all received
    /// bytes once the end of the stream was seen.
    pub fn read_to_end(&mut self) -> Result<Option<Bytes>> {
        loop {
            if !self.eof && !self.is_ready_to_read()? {
                return Ok(None);
            }
            match self.fill()? {
                Fill::Data => {}
                Fill::Pending => return Ok(None),
                Fill::Eof => {
                    let size = self.buffer.size();
                    return self.buffer.read(size).map_err(Error::Buffer);
                }
            }
        }
    }
}

/// Encrypt and push `payload` to `sock` until the socket stops accepting
/// records.
///
/// Returns the plaintext bytes whose records were written out completely.
/// Plaintext is only handed to the connection once everything queued before
/// it has left, so nothing counted as written is still buffered.
fn send_tls<S: Write>(
    conn: &mut rustls::ClientConnection,
    sock: &mut S,
    payload: &[u8],
) -> io::Result<usize> {
    let mut written = 0;
    while written < payload.len() {
        flush_tls(conn, sock)?;
        if conn.wants_write() {
            break;
        }
        let accepted = conn.writer().write(&payload[written..])?;
        flush_tls(conn, sock)?;
        if accepted == 0 || conn.wants_write() {
            break;
        }
        written += accepted;
    }
    Ok(written)
}

/// Push buffered TLS records to the socket, as far as it accepts them.
fn flush_tls<S: Write>(conn: &mut rustls::ClientConnection, sock: &mut S) -> io::Result<()> {
    while conn.wants_write() {
        match conn.write_tls(sock) {
            Ok(_) => {}
            Err(err) if would_block(&err) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == Some(Errno::INPROGRESS.raw_os_error())
}

fn closed_early() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before the message was complete",
    )
}
