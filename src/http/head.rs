//! HTTP/1 message heads
//!
//! Request and response heads parsed with `httparse`. Header names keep their
//! original casing and order so they can be forwarded unmodified.

use super::BodyKind;
use crate::error::ProxyError;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum number of headers accepted in one head
pub const MAX_HEADERS: usize = 100;

/// Bytes reserved in the read buffer before each read
const READ_RESERVE: usize = 8192;

/// A single header as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Name with original casing
    pub name: String,
    /// Raw value bytes
    pub value: Vec<u8>,
}

impl Header {
    /// Create a new header
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Values of every header called `name`, compared case-insensitively
fn values<'a>(headers: &'a [Header], name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
    headers
        .iter()
        .filter(move |h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_slice())
}

/// First value of header `name`; the result borrows only from `headers`
fn first_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_slice())
}

/// Strip ASCII whitespace from both ends
fn trim(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Whether any comma-separated element of header `name` equals `token`
fn has_token(headers: &[Header], name: &str, token: &str) -> bool {
    values(headers, name).any(|value| {
        value
            .split(|b| *b == b',')
            .any(|item| trim(item).eq_ignore_ascii_case(token.as_bytes()))
    })
}

/// Transfer-Encoding ends with `chunked`
fn is_chunked(headers: &[Header]) -> bool {
    values(headers, "transfer-encoding")
        .flat_map(|value| value.split(|b| *b == b','))
        .map(trim)
        .filter(|item| !item.is_empty())
        .last()
        .map(|item| item.eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false)
}

/// Parsed Content-Length; conflicting or malformed values are errors
fn content_length(headers: &[Header]) -> Result<Option<u64>, String> {
    let mut length = None;
    for value in values(headers, "content-length") {
        let parsed = std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| "invalid Content-Length".to_string())?;
        match length {
            Some(existing) if existing != parsed => {
                return Err("conflicting Content-Length values".to_string())
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn copy_headers(parsed: &[httparse::Header<'_>]) -> Vec<Header> {
    parsed
        .iter()
        .map(|h| Header::new(h.name, h.value))
        .collect()
}

/// Parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method
    pub method: String,
    /// Request target exactly as sent
    pub target: String,
    /// Minor HTTP version (0 or 1)
    pub version: u8,
    /// Headers in original order
    pub headers: Vec<Header>,
}

impl RequestHead {
    /// Parse a request head from the start of `buf`
    ///
    /// Returns the head and its length in bytes, or `None` if more bytes are
    /// needed.
    pub fn parse(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, ProxyError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => {
                let head = RequestHead {
                    method: req.method.unwrap_or_default().to_string(),
                    target: req.path.unwrap_or_default().to_string(),
                    version: req.version.unwrap_or(1),
                    headers: copy_headers(req.headers),
                };
                Ok(Some((head, len)))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(ProxyError::ClientProtocol(format!(
                "Failed to parse HTTP request: {}",
                e
            ))),
        }
    }

    /// Whether this is a CONNECT request
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// First value of header `name`
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        first_value(&self.headers, name)
    }

    /// Whether the client asked for the connection to be closed afterwards
    pub fn wants_close(&self) -> bool {
        let close = has_token(&self.headers, "connection", "close")
            || has_token(&self.headers, "proxy-connection", "close");
        let keep_alive = has_token(&self.headers, "connection", "keep-alive")
            || has_token(&self.headers, "proxy-connection", "keep-alive");
        close || (self.version == 0 && !keep_alive)
    }

    /// Framing of the request body
    pub fn body_kind(&self) -> Result<BodyKind, ProxyError> {
        if is_chunked(&self.headers) {
            return Ok(BodyKind::Chunked);
        }
        match content_length(&self.headers).map_err(ProxyError::ClientProtocol)? {
            Some(0) | None => Ok(BodyKind::Empty),
            Some(len) => Ok(BodyKind::Length(len)),
        }
    }

    /// Serialize the head for the origin, with `path` as origin-form target
    ///
    /// Headers are written as received. A `Host` header is added first if the
    /// client did not send one.
    pub fn encode(&self, path: &str, host: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(path.as_bytes());
        out.extend_from_slice(format!(" HTTP/1.{}\r\n", self.version).as_bytes());

        if self.header("host").is_none() {
            out.extend_from_slice(b"Host: ");
            out.extend_from_slice(host.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        for header in &self.headers {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(&header.value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Parsed response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Minor HTTP version (0 or 1)
    pub version: u8,
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in original order
    pub headers: Vec<Header>,
    /// The head exactly as received, including the final blank line
    pub raw: Bytes,
}

impl ResponseHead {
    /// Parse a response head from the start of `buf`
    pub fn parse(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, ProxyError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut headers);

        match res.parse(buf) {
            Ok(httparse::Status::Complete(len)) => {
                let head = ResponseHead {
                    version: res.version.unwrap_or(1),
                    status: res.code.unwrap_or_default(),
                    reason: res.reason.unwrap_or_default().to_string(),
                    headers: copy_headers(res.headers),
                    raw: Bytes::copy_from_slice(&buf[..len]),
                };
                Ok(Some((head, len)))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(ProxyError::UpstreamProtocol(format!(
                "Failed to parse HTTP response: {}",
                e
            ))),
        }
    }

    /// First value of header `name`
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        first_value(&self.headers, name)
    }

    /// Informational response followed by another head (1xx except 101)
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }

    /// Protocol switch; the connection leaves HTTP afterwards
    pub fn is_upgrade(&self) -> bool {
        self.status == 101
    }

    /// Whether the origin keeps the connection open after this response
    pub fn keeps_alive(&self) -> bool {
        if has_token(&self.headers, "connection", "close") {
            return false;
        }
        self.version >= 1 || has_token(&self.headers, "connection", "keep-alive")
    }

    /// Framing of the response body for a request made with `method`
    pub fn body_kind(&self, method: &str) -> Result<BodyKind, ProxyError> {
        if method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
        {
            return Ok(BodyKind::Empty);
        }
        if is_chunked(&self.headers) {
            return Ok(BodyKind::Chunked);
        }
        match content_length(&self.headers).map_err(ProxyError::UpstreamProtocol)? {
            Some(0) => Ok(BodyKind::Empty),
            Some(len) => Ok(BodyKind::Length(len)),
            None => Ok(BodyKind::CloseDelimited),
        }
    }
}

/// Read more bytes into `buf`, failing with `TimedOut` after `idle`
pub(crate) async fn read_more<R>(reader: &mut R, buf: &mut BytesMut, idle: Duration) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if buf.capacity() - buf.len() < READ_RESERVE {
        buf.reserve(READ_RESERVE);
    }
    match tokio::time::timeout(idle, reader.read_buf(buf)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
    }
}

/// Read a request head from a client
///
/// Returns `None` if the client closed the connection before sending
/// anything. Bytes after the head stay in `buf`.
pub async fn read_request_head<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_size: usize,
    idle: Duration,
) -> Result<Option<RequestHead>, ProxyError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if !buf.is_empty() {
            if let Some((head, len)) = RequestHead::parse(buf)? {
                if len > max_size {
                    return Err(ProxyError::ClientProtocol(format!(
                        "request head exceeds {} bytes",
                        max_size
                    )));
                }
                buf.advance(len);
                return Ok(Some(head));
            }
        }
        if buf.len() >= max_size {
            return Err(ProxyError::ClientProtocol(format!(
                "request head exceeds {} bytes",
                max_size
            )));
        }

        let n = read_more(reader, buf, idle)
            .await
            .map_err(ProxyError::ClientIo)?;
        if n == 0 {
            if buf.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(None);
            }
            return Err(ProxyError::ClientIo(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "client closed connection mid-request",
            )));
        }
    }
}

/// Read a response head from an origin
pub async fn read_response_head<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_size: usize,
    idle: Duration,
) -> Result<ResponseHead, ProxyError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if !buf.is_empty() {
            if let Some((head, len)) = ResponseHead::parse(buf)? {
                if len > max_size {
                    return Err(ProxyError::UpstreamProtocol(format!(
                        "response head exceeds {} bytes",
                        max_size
                    )));
                }
                buf.advance(len);
                return Ok(head);
            }
        }
        if buf.len() >= max_size {
            return Err(ProxyError::UpstreamProtocol(format!(
                "response head exceeds {} bytes",
                max_size
            )));
        }

        let n = read_more(reader, buf, idle)
            .await
            .map_err(ProxyError::UpstreamTransport)?;
        if n == 0 {
            return Err(ProxyError::UpstreamTransport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "origin closed connection before sending a response",
            )));
        }
    }
}
