//! Non-blocking, tick-driven HTTP 1.1 client.
//!
//! Requests are driven without an async runtime and without a thread per
//! connection. A [`Client`] owns one non-blocking [`Socket`], and each call to
//! [`Client::tick`] advances the exchange as far as the socket allows before
//! handing control back. Many clients can be multiplexed on one thread by
//! ticking them in turn.
//!
//! ```txt
//!   encode                     decode
//!        \                     /
//!        -> request  -> Socket ->  status line, headers, body
//! Client                  |
//!                       Buffer (memory or spooled to disk)
//! ```
//!
//! Requests and responses are `http_types` values.
//!
//! # Example
//!
//! ```no_run
//! use tick_h1::{Client, ClientConfig};
//! use http_types::{Method, Request, Url};
//!
//! # fn main() -> tick_h1::Result<()> {
//! let mut clients: Vec<Client> = (0..4)
//!     .map(|_| Client::new(ClientConfig::default()))
//!     .collect();
//! for client in &mut clients {
//!     let url = Url::parse("http://127.0.0.1:8080/").unwrap();
//!     client.send(Request::new(Method::Get, url))?;
//! }
//! while !clients.iter().all(Client::is_done) {
//!     for client in &mut clients {
//!         client.tick()?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code, future_incompatible, rust_2018_idioms)]
#![deny(missing_debug_implementations, nonstandard_style)]
#![warn(missing_docs, unreachable_pub)]

pub mod buffer;
pub mod client;
mod config;
mod error;
mod headers;
pub mod socket;

pub use buffer::{Buffer, BufferKind};
pub use client::{Client, RawStatus, ReasonPhrase, State};
pub use config::{ClientConfig, TlsOptions, DEFAULT_READ_LENGTH};
pub use error::{Error, Phase, Result};
pub use headers::HeaderSet;
pub use socket::{Endpoint, Socket};
