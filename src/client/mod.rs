//! Drive HTTP/1.1 exchanges on the client.
//!
//! A [`Client`] runs one request at a time through a fixed sequence of
//! states. [`Client::send`] arms it, and every call to [`Client::tick`]
//! advances as far as the socket allows without blocking:
//!
//! ```txt
//! Idle -> WaitWrite -> Writing -> WaitRead -> ReadStatusLine -> ReadHeaders -> DecideBody
//!
//! DecideBody -> ReadBodyFixed ----------------------------------------------> Done
//!            -> ReadBodyChunkedSize <-> ReadBodyChunkedData
//!               ReadBodyChunkedSize -> ReadBodyChunkedTrailer --------------> Done
//!            -> ReadBodyUntilClose -----------------------------------------> Done
//!            -> Done
//! ```
//!
//! Many clients can share one thread by ticking each of them in turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_types::{Method, Request, Response};
use log::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::Phase;
use crate::headers::HeaderSet;
use crate::socket::{tls, Endpoint, Socket};
use crate::{Error, Result};

mod decode;
mod encode;

pub use decode::{
    framing, parse_chunk_size, parse_header_line, parse_status_line, Framing, RawStatus,
    ReasonPhrase, StatusLine,
};
pub use encode::encode;

/// Longest status line accepted, in bytes.
const MAX_STATUS_LINE: usize = 512;

/// Where a [`Client`] is in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No request armed.
    Idle,
    /// Waiting for a new connection to become writable.
    WaitWrite,
    /// Ready to write the request.
    Writing,
    /// Waiting for the response to start.
    WaitRead,
    /// Reading the status line.
    ReadStatusLine,
    /// Reading header lines.
    ReadHeaders,
    /// Choosing how the body is delimited.
    DecideBody,
    /// Reading a `Content-Length` body.
    ReadBodyFixed,
    /// Reading a chunk-size line.
    ReadBodyChunkedSize,
    /// Reading chunk data and its CRLF.
    ReadBodyChunkedData,
    /// Reading trailer lines after the last chunk.
    ReadBodyChunkedTrailer,
    /// Reading until the peer closes the connection.
    ReadBodyUntilClose,
    /// The response is complete.
    Done,
    /// The exchange failed. Only [`Client::reset`] leaves this state.
    Failed,
}

/// A non-blocking HTTP/1.1 client for one request at a time.
///
/// Owns at most one connection, which is kept across requests to the same
/// endpoint unless the server asked to close it.
///
/// # Example
///
/// ```no_run
/// use tick_h1::{Client, ClientConfig};
/// use http_types::{Method, Request, Url};
///
/// # fn main() -> tick_h1::Result<()> {
/// let mut client = Client::new(ClientConfig::default());
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// client.send(Request::new(Method::Get, url))?;
/// while !client.tick()? {
///     // service other clients here
/// }
/// let res = client.response()?;
/// println!("{}", res.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    tls: Option<Arc<rustls::ClientConfig>>,
    socket: Option<Socket>,
    endpoint: Option<Endpoint>,
    state: State,
    /// When the current phase times out.
    deadline: Instant,
    /// `Socket::bytes_received` when the deadline was last restarted.
    received: u64,
    /// Whether the connection survives the current response.
    keep_alive: bool,

    method: Method,
    payload: Vec<u8>,

    status_line: Option<StatusLine>,
    headers: HeaderSet,
    trailers: HeaderSet,
    body: Vec<Bytes>,
    /// Bytes left in the current fixed-length body or chunk.
    remaining: usize,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    /// Create an idle client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            tls: None,
            socket: None,
            endpoint: None,
            state: State::Idle,
            deadline: Instant::now(),
            received: 0,
            keep_alive: false,
            method: Method::Get,
            payload: Vec::new(),
            status_line: None,
            headers: HeaderSet::new(),
            trailers: HeaderSet::new(),
            body: Vec::new(),
            remaining: 0,
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the response is complete.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Whether a connection is currently held.
    pub fn has_connection(&self) -> bool {
        self.socket.is_some()
    }

    /// The status code, once the status line has been read.
    pub fn status(&self) -> Option<u16> {
        self.status_line.as_ref().map(|s| s.status)
    }

    /// The headers read so far.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// Trailer fields of a chunked response.
    pub fn trailers(&self) -> &HeaderSet {
        &self.trailers
    }

    /// Arm the client with `req`.
    ///
    /// Returns `Ok(false)` without doing anything unless the client is idle
    /// or done. A live connection to the same endpoint is reused; otherwise a
    /// new non-blocking connect is started.
    pub fn send(&mut self, req: Request) -> Result<bool> {
        if !matches!(self.state, State::Idle | State::Done) {
            warn!("request rejected, client is in state {:?}", self.state);
            return Ok(false);
        }

        if !self.keep_alive && self.socket.take().is_some() {
            debug!("discarding connection closed by the previous response");
        }
        self.clear();

        let endpoint = match Endpoint::from_url(req.url(), self.config.remote_address) {
            Ok(endpoint) => endpoint,
            Err(err) => return Err(self.fail(err)),
        };
        self.method = req.method();
        self.payload = match encode(req) {
            Ok(payload) => payload,
            Err(err) => return Err(self.fail(err.into())),
        };

        let reusable = match &self.socket {
            Some(socket) => self.endpoint.as_ref() == Some(&endpoint) && !socket.is_eof(),
            None => false,
        };
        if reusable {
            debug!("reusing connection to {}:{}", endpoint.host, endpoint.port);
            self.state = State::Writing;
            return Ok(true);
        }

        self.socket = None;
        match self.connect(&endpoint) {
            Ok(socket) => self.socket = Some(socket),
            Err(err) => return Err(self.fail(err)),
        }
        self.endpoint = Some(endpoint);
        self.enter(State::WaitWrite, self.config.connect_timeout);
        Ok(true)
    }

    fn connect(&mut self, endpoint: &Endpoint) -> Result<Socket> {
        let tls = if endpoint.tls {
            Some(self.tls_config()?)
        } else {
            None
        };
        Socket::connect(endpoint, &self.config, tls)
    }

    fn tls_config(&mut self) -> Result<Arc<rustls::ClientConfig>> {
        if let Some(config) = &self.tls {
            return Ok(config.clone());
        }
        let config = tls::client_config(self.config.tls).map_err(Error::Connect)?;
        self.tls = Some(config.clone());
        Ok(config)
    }

    /// Advance the exchange as far as possible without blocking.
    ///
    /// Returns `Ok(true)` once the response is complete and `Ok(false)` when
    /// the next step has to wait for the socket. Any error leaves the client
    /// in [`State::Failed`] with its connection closed.
    pub fn tick(&mut self) -> Result<bool> {
        match self.advance() {
            Ok(done) => Ok(done),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.state {
                State::Idle => return Ok(false),
                State::Done => return Ok(true),
                State::Failed => return Err(Error::Failed),

                State::WaitWrite => {
                    if !self.socket()?.is_ready_to_write()? {
                        return self.wait(Phase::Connect);
                    }
                    self.state = State::Writing;
                }

                State::Writing => {
                    let payload = std::mem::take(&mut self.payload);
                    let sent = self.socket()?.send(&payload);
                    self.payload = payload;
                    if !sent? {
                        self.enter(State::WaitWrite, self.config.connect_timeout);
                        continue;
                    }
                    self.payload.clear();
                    self.enter(State::WaitRead, self.config.connect_timeout);
                }

                State::WaitRead => {
                    if !self.socket()?.is_ready_to_read()? {
                        return self.wait(Phase::Write);
                    }
                    self.enter(State::ReadStatusLine, self.config.read_timeout);
                }

                State::ReadStatusLine => {
                    let line = match self.socket()?.read_line(MAX_STATUS_LINE)? {
                        Some(line) => line,
                        None => return self.stall(),
                    };
                    trace!("< {}", String::from_utf8_lossy(&line));
                    self.status_line = Some(parse_status_line(&line)?);
                    self.enter(State::ReadHeaders, self.config.read_timeout);
                }

                State::ReadHeaders => {
                    let max = self.config.read_length;
                    let line = match self.socket()?.read_line(max)? {
                        Some(line) => line,
                        None => return self.stall(),
                    };
                    self.restart();
                    if line.is_empty() {
                        self.state = State::DecideBody;
                        continue;
                    }
                    trace!("< {}", String::from_utf8_lossy(&line));
                    if decode::is_continuation(&line) {
                        let more = String::from_utf8_lossy(&line);
                        if !self.headers.continue_last(more.trim()) {
                            return Err(Error::Header(more.into_owned()));
                        }
                        continue;
                    }
                    let (name, value) = parse_header_line(&line)?;
                    self.headers.append(name, value);
                }

                State::DecideBody => self.decide_body()?,

                State::ReadBodyFixed => {
                    let remaining = self.remaining;
                    let body = match self.socket()?.read_specific_size(remaining)? {
                        Some(body) => body,
                        None => return self.stall(),
                    };
                    self.body.push(body);
                    self.remaining = 0;
                    self.finish();
                }

                State::ReadBodyChunkedSize => {
                    let max = self.config.read_length;
                    let line = match self.socket()?.read_line(max)? {
                        Some(line) => line,
                        None => return self.stall(),
                    };
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.enter(State::ReadBodyChunkedTrailer, self.config.read_timeout);
                        continue;
                    }
                    self.remaining = usize::try_from(size)
                        .map_err(|_| Error::Chunk(format!("chunk of {} bytes", size)))?;
                    self.enter(State::ReadBodyChunkedData, self.config.read_timeout);
                }

                State::ReadBodyChunkedData => {
                    let wanted = self.remaining + 2;
                    let mut chunk = match self.socket()?.read_specific_size(wanted)? {
                        Some(chunk) => chunk,
                        None => return self.stall(),
                    };
                    let crlf = chunk.split_off(self.remaining);
                    if &crlf[..] != b"\r\n" {
                        return Err(Error::Chunk("chunk data not followed by CRLF".into()));
                    }
                    self.body.push(chunk);
                    self.remaining = 0;
                    self.enter(State::ReadBodyChunkedSize, self.config.read_timeout);
                }

                State::ReadBodyChunkedTrailer => {
                    let max = self.config.read_length;
                    let line = match self.socket()?.read_line(max)? {
                        Some(line) => line,
                        None => return self.stall(),
                    };
                    self.restart();
                    if line.is_empty() {
                        self.finish();
                        continue;
                    }
                    let (name, value) = parse_header_line(&line)?;
                    self.trailers.append(name, value);
                }

                State::ReadBodyUntilClose => {
                    let body = match self.socket()?.read_to_end()? {
                        Some(body) => body,
                        None => return self.stall(),
                    };
                    self.body.push(body);
                    self.finish();
                }
            }
        }
    }

    fn decide_body(&mut self) -> Result<()> {
        let status = self.status().unwrap_or_default();
        match framing(self.method, status, &self.headers)? {
            Framing::Fixed(len) => {
                self.remaining = usize::try_from(len)
                    .map_err(|_| Error::ContentLength(len.to_string()))?;
                self.enter(State::ReadBodyFixed, self.config.read_timeout);
            }
            Framing::Chunked => {
                self.enter(State::ReadBodyChunkedSize, self.config.read_timeout);
            }
            Framing::UntilClose => {
                self.enter(State::ReadBodyUntilClose, self.config.read_timeout);
            }
            Framing::Empty => self.finish(),
        }
        Ok(())
    }

    fn socket(&mut self) -> Result<&mut Socket> {
        self.socket.as_mut().ok_or(Error::Failed)
    }

    fn bytes_received(&self) -> u64 {
        self.socket.as_ref().map_or(0, Socket::bytes_received)
    }

    /// Switch to `state` with a fresh deadline.
    fn enter(&mut self, state: State, timeout: Duration) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
        self.deadline = Instant::now() + timeout;
        self.received = self.bytes_received();
    }

    /// Restart the read deadline after progress within a state.
    fn restart(&mut self) {
        self.deadline = Instant::now() + self.config.read_timeout;
        self.received = self.bytes_received();
    }

    /// Not ready yet: fail if the phase deadline has passed.
    fn wait(&self, phase: Phase) -> Result<bool> {
        if Instant::now() > self.deadline {
            return Err(Error::Timeout(phase));
        }
        Ok(false)
    }

    /// A read came up short: restart the deadline if any bytes arrived,
    /// otherwise fail once it has passed.
    fn stall(&mut self) -> Result<bool> {
        if self.bytes_received() != self.received {
            self.restart();
            return Ok(false);
        }
        self.wait(Phase::Read)
    }

    fn finish(&mut self) {
        let version = self.status_line.as_ref().map_or("1.1", |s| s.version.as_str());
        let keep_alive = decode::keeps_alive(version, &self.headers)
            && !self.socket.as_ref().map_or(true, Socket::is_eof);
        self.keep_alive = keep_alive;
        debug!("{:?} -> {:?}", self.state, State::Done);
        self.state = State::Done;
    }

    fn fail(&mut self, err: Error) -> Error {
        debug!("{:?} -> {:?}: {}", self.state, State::Failed, err);
        self.state = State::Failed;
        self.socket = None;
        self.endpoint = None;
        self.keep_alive = false;
        err
    }

    /// Build the response once the exchange is [`State::Done`].
    ///
    /// A 4xx status is returned as [`Error::ClientStatus`] and a 5xx status as
    /// [`Error::ServerStatus`], both carrying the complete response. The
    /// connection is closed here if the server asked for it.
    pub fn response(&mut self) -> Result<Response> {
        if self.state != State::Done {
            return Err(Error::NotDone);
        }
        let status_line = self.status_line.as_ref().ok_or(Error::NotDone)?;

        let len = self.body.iter().map(Bytes::len).sum();
        let mut body = Vec::with_capacity(len);
        for fragment in &self.body {
            body.extend_from_slice(fragment);
        }
        let res = decode::build_response(status_line, &self.headers, body)?;

        if !self.keep_alive && self.socket.take().is_some() {
            debug!("closing connection after response");
        }

        match status_line.status / 100 {
            4 => Err(Error::ClientStatus(res)),
            5 => Err(Error::ServerStatus(res)),
            _ => Ok(res),
        }
    }

    /// Drop the connection and all response state, returning to
    /// [`State::Idle`].
    pub fn reset(&mut self) {
        self.socket = None;
        self.endpoint = None;
        self.keep_alive = false;
        self.state = State::Idle;
        self.clear();
    }

    fn clear(&mut self) {
        self.payload.clear();
        self.status_line = None;
        self.headers.clear();
        self.trailers.clear();
        self.body.clear();
        self.remaining = 0;
    }
}
