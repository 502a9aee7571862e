//! Client configuration.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::buffer::BufferKind;

/// Bound of a single OS read, in bytes.
pub const DEFAULT_READ_LENGTH: usize = 8 * 1024;

/// Certificate checks applied to `https` connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the peer's certificate chain at all. When `false` every
    /// certificate is accepted and the other two toggles are moot.
    pub verify_peer: bool,
    /// Require the certificate to be valid for the URL host.
    pub verify_host: bool,
    /// Accept certificates not issued by a known root, such as self-signed ones.
    pub allow_self_signed: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            verify_host: true,
            allow_self_signed: false,
        }
    }
}

impl TlsOptions {
    /// Accept any certificate.
    pub fn insecure() -> Self {
        Self {
            verify_peer: false,
            verify_host: false,
            allow_self_signed: true,
        }
    }
}

/// Configure a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for the socket to become writable after connecting, and for
    /// it to become readable after the request was written. Defaults to 20s.
    pub connect_timeout: Duration,
    /// Deadline for each read phase, restarted whenever bytes arrive.
    /// Defaults to 120s.
    pub read_timeout: Duration,
    /// How long a readiness poll may wait. Defaults to zero.
    pub poll_interval: Duration,
    /// Bound of a single OS read. Also the longest header line accepted.
    pub read_length: usize,
    /// Receive buffer backend.
    pub buffer: BufferKind,
    /// Source address to bind outgoing connections to.
    pub local_address: Option<IpAddr>,
    /// Connect here instead of resolving the URL host.
    pub remote_address: Option<IpAddr>,
    /// Certificate checks for `https`.
    pub tls: TlsOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(120),
            poll_interval: Duration::ZERO,
            read_length: DEFAULT_READ_LENGTH,
            buffer: BufferKind::Memory,
            local_address: None,
            remote_address: None,
            tls: TlsOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set how long a readiness poll may wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the bound of a single OS read.
    pub fn with_read_length(mut self, len: usize) -> Self {
        self.read_length = len.max(1);
        self
    }

    /// Spool responses to a temporary file in `dir`, or the system temporary
    /// directory if `None`.
    pub fn with_spooled_buffer(mut self, dir: Option<PathBuf>) -> Self {
        self.buffer = BufferKind::Spooled { dir };
        self
    }

    /// Keep responses in memory.
    pub fn with_memory_buffer(mut self) -> Self {
        self.buffer = BufferKind::Memory;
        self
    }

    /// Bind outgoing connections to `addr`.
    pub fn with_local_address(mut self, addr: IpAddr) -> Self {
        self.local_address = Some(addr);
        self
    }

    /// Connect to `addr` instead of resolving the URL host.
    pub fn with_remote_address(mut self, addr: IpAddr) -> Self {
        self.remote_address = Some(addr);
        self
    }

    /// Set the certificate checks for `https`.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }
}
