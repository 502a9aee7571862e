use futures_lite::future;
use http_types::headers::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http_types::mime::BYTE_STREAM;
use http_types::{format_err, Method, Request};

/// Serialize a request into its HTTP/1.1 wire form.
///
/// Multi-valued headers are joined with a tab. A `host` header is added when
/// the request has none, and a `content-length` header when a `POST` or `PUT`
/// carries a non-empty body and does not declare its length itself. The
/// `application/octet-stream` content type `http_types` gives every empty body
/// is not sent.
#[doc(hidden)]
pub fn encode(mut req: Request) -> http_types::Result<Vec<u8>> {
    let body = future::block_on(req.body_bytes())?;
    let mut buf: Vec<u8> = Vec::with_capacity(256 + body.len());

    let url = req.url();
    let mut target = match url.path() {
        "" => "/".to_owned(),
        path => path.to_owned(),
    };
    if let Some(query) = url.query() {
        if !query.is_empty() {
            target.push('?');
            target.push_str(query);
        }
    }

    let val = format!("{} {} HTTP/1.1\r\n", req.method(), target);
    log::trace!("> {}", val.trim_end());
    buf.extend_from_slice(val.as_bytes());

    if req.header(HOST).is_none() {
        let host = url.host_str();
        let host = host.ok_or_else(|| format_err!("Missing hostname"))?;
        let val = match url.port() {
            Some(port) => format!("host: {}:{}\r\n", host, port),
            None => format!("host: {}\r\n", host),
        };
        log::trace!("> {}", val.trim_end());
        buf.extend_from_slice(val.as_bytes());
    }

    let byte_stream = BYTE_STREAM.to_string();
    for (header, values) in req.iter() {
        let joined: Vec<&str> = values.iter().map(|v| v.as_str()).collect();
        if *header == CONTENT_TYPE && body.is_empty() && joined == [byte_stream.as_str()] {
            continue;
        }
        let val = format!("{}: {}\r\n", header, joined.join("\t"));
        log::trace!("> {}", val.trim_end());
        buf.extend_from_slice(val.as_bytes());
    }

    let sends_length = matches!(req.method(), Method::Post | Method::Put);
    if sends_length && !body.is_empty() && req.header(CONTENT_LENGTH).is_none() {
        let val = format!("content-length: {}\r\n", body.len());
        log::trace!("> {}", val.trim_end());
        buf.extend_from_slice(val.as_bytes());
    }

    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&body);
    Ok(buf)
}
