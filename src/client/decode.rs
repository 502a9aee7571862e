use std::str::FromStr;

use http_types::headers::{HeaderName, HeaderValue, CONTENT_TYPE};
use http_types::{Body, Method, Response, StatusCode, Version};
use regex::Regex;

use crate::headers::HeaderSet;
use crate::{Error, Result};

lazy_static::lazy_static! {
    static ref STATUS_LINE: Regex =
        Regex::new(r"^HTTP/([0-9]\.[0-9])[ \t]+([0-9]{3})[ \t]+(.+)$").expect("status line pattern");
}

/// The reason phrase of a response's status line.
///
/// Attached to every [`Response`] built by the client as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// The numeric status code exactly as the server sent it.
///
/// Attached to every [`Response`] built by the client as an extension. It
/// differs from [`Response::status`] only for codes `http_types` has no variant
/// for, which are mapped to the generic code of their class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus(pub u16);

/// A parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Protocol version, such as `1.1`.
    pub version: String,
    /// Numeric status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
}

/// Parse `HTTP/<d>.<d> <code> <reason>`.
#[doc(hidden)]
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine> {
    let lossy = || String::from_utf8_lossy(line).into_owned();
    let text = std::str::from_utf8(line).map_err(|_| Error::StatusLine(lossy()))?;
    let caps = STATUS_LINE
        .captures(text)
        .ok_or_else(|| Error::StatusLine(lossy()))?;
    let status = caps[2].parse().map_err(|_| Error::StatusLine(lossy()))?;

    Ok(StatusLine {
        version: caps[1].to_owned(),
        status,
        reason: caps[3].to_owned(),
    })
}

/// Split a header line on its first colon. Name and value are trimmed.
#[doc(hidden)]
pub fn parse_header_line(line: &[u8]) -> Result<(String, String)> {
    let lossy = || String::from_utf8_lossy(line).into_owned();
    let text = std::str::from_utf8(line).map_err(|_| Error::Header(lossy()))?;
    let (name, value) = text.split_once(':').ok_or_else(|| Error::Header(lossy()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Header(lossy()));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

/// Whether a header line continues the previous one (obsolete line folding).
pub(crate) fn is_continuation(line: &[u8]) -> bool {
    matches!(line.first(), Some(b' ') | Some(b'\t'))
}

/// Parse a chunk-size line (without CRLF), ignoring chunk extensions.
#[doc(hidden)]
pub fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    if line.is_empty() {
        return Err(Error::Chunk("empty chunk size line".into()));
    }
    let mut framed = Vec::with_capacity(line.len() + 2);
    framed.extend_from_slice(line);
    framed.extend_from_slice(b"\r\n");
    match httparse::parse_chunk_size(&framed) {
        Ok(httparse::Status::Complete((_, size))) => Ok(size),
        _ => Err(Error::Chunk(format!(
            "invalid chunk size {:?}",
            String::from_utf8_lossy(line)
        ))),
    }
}

/// How the body of a response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` bytes follow.
    Fixed(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// The body runs until the peer closes the connection.
    UntilClose,
    /// There is no body.
    Empty,
}

/// Decide the body framing of a response.
///
/// Responses to `HEAD` and `1xx`, `204` and `304` responses never carry a
/// body. Otherwise `Content-Length` wins over `Transfer-Encoding: chunked`,
/// which wins over `Connection: close`.
#[doc(hidden)]
pub fn framing(method: Method, status: u16, headers: &HeaderSet) -> Result<Framing> {
    if method == Method::Head || (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(Framing::Empty);
    }
    if let Some(len) = headers.get("Content-Length") {
        let len = len
            .parse::<u64>()
            .map_err(|_| Error::ContentLength(len.to_owned()))?;
        return Ok(Framing::Fixed(len));
    }
    if headers.is("Transfer-Encoding", "chunked") {
        return Ok(Framing::Chunked);
    }
    if headers.is("Connection", "close") {
        return Ok(Framing::UntilClose);
    }
    Ok(Framing::Empty)
}

/// Whether the connection may carry another request after this response.
pub(crate) fn keeps_alive(version: &str, headers: &HeaderSet) -> bool {
    if headers.is("Connection", "close") {
        return false;
    }
    version != "1.0" || headers.is("Connection", "keep-alive")
}

fn version(version: &str) -> Option<Version> {
    match version {
        "0.9" => Some(Version::Http0_9),
        "1.0" => Some(Version::Http1_0),
        "1.1" => Some(Version::Http1_1),
        "2.0" => Some(Version::Http2_0),
        "3.0" => Some(Version::Http3_0),
        _ => None,
    }
}

/// The `http_types` status for `code`, falling back to the generic code of
/// its class when there is no exact variant.
fn status_code(code: u16) -> StatusCode {
    if let Ok(status) = StatusCode::try_from(code) {
        return status;
    }
    match code / 100 {
        1 => StatusCode::Continue,
        3 => StatusCode::MultipleChoice,
        4 => StatusCode::BadRequest,
        5 => StatusCode::InternalServerError,
        _ => StatusCode::Ok,
    }
}

/// Assemble the `http_types` response.
///
/// Fields `http_types` cannot represent, such as values with non-ASCII bytes,
/// are left out of the response headers. The complete [`HeaderSet`] and the
/// [`RawStatus`] travel along as extensions.
pub(crate) fn build_response(
    status: &StatusLine,
    headers: &HeaderSet,
    body: Vec<u8>,
) -> Result<Response> {
    let mut res = Response::new(status_code(status.status));
    for (name, value) in headers.iter() {
        match (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => res.append_header(name, value),
            _ => log::warn!("header {:?} not representable, kept in the raw set only", name),
        }
    }
    res.set_version(version(&status.version));

    let had_content_type = headers.contains("Content-Type");
    res.set_body(Body::from_bytes(body));
    if !had_content_type {
        res.remove_header(CONTENT_TYPE);
    }

    res.ext_mut().insert(ReasonPhrase(status.reason.clone()));
    res.ext_mut().insert(RawStatus(status.status));
    res.ext_mut().insert(headers.clone());
    Ok(res)
}
