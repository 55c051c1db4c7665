//! Plaintext HTTP/1 messages that show up on a captured stream.
//!
//! The sniffer does not decode HTTP/1; it only recognises a request or response
//! head so the reader can step over the whole message (head and body) and carry
//! on with whatever follows.

use std::fmt;

use crate::error::{FrameError, Result};

/// Prefixes that start an HTTP/1 request, compared case-insensitively.
/// `DELET` is enough to tell `DELETE` apart from a frame header.
const REQUEST_PREFIXES: [&[u8]; 5] = [b"GET", b"POST", b"PUT", b"DELET", b"HEAD"];
const RESPONSE_PREFIX: &[u8] = b"HTTP";

/// Longest chunk-size line accepted in a chunked body.
const MAX_CHUNK_LINE: usize = 1024;

fn starts_with_ignore_case(buf: &[u8], prefix: &[u8]) -> bool {
    buf.len() >= prefix.len() && buf[..prefix.len()].eq_ignore_ascii_case(prefix)
}

pub fn looks_like_request(prefix: &[u8]) -> bool {
    REQUEST_PREFIXES.iter().any(|p| starts_with_ignore_case(prefix, p))
}

pub fn looks_like_response(prefix: &[u8]) -> bool {
    starts_with_ignore_case(prefix, RESPONSE_PREFIX)
}

/// Whether the bytes at a frame boundary start an HTTP/1 message instead.
pub fn starts_message(prefix: &[u8]) -> bool {
    looks_like_request(prefix) || looks_like_response(prefix)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Http1Start {
    Request { method: String, target: String },
    Response { status: u16 },
}

/// Summary of a skipped HTTP/1 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http1Message {
    pub start: Http1Start,
    pub header_count: usize,
    /// Body bytes drained after the head.
    pub body_len: u64,
}

impl fmt::Display for Http1Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            Http1Start::Request { method, target } => write!(f, "{} {}", method, target)?,
            Http1Start::Response { status } => write!(f, "HTTP/1 {}", status)?,
        }
        write!(f, " ({} header(s), {} body byte(s))", self.header_count, self.body_len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
    /// Response without framing: the body runs until the connection closes.
    UntilClose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Head {
    /// Bytes up to and including the blank line.
    pub len: usize,
    pub start: Http1Start,
    pub header_count: usize,
    pub body: BodyKind,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn malformed(msg: impl Into<String>) -> FrameError {
    FrameError::MalformedHttp1(msg.into())
}

/// Parse a message head at the start of `buf`.
///
/// `Ok(None)` means more bytes are needed.
pub(crate) fn parse_head(buf: &[u8], max_head: usize) -> Result<Option<Head>> {
    let window = &buf[..buf.len().min(max_head)];
    let end = match find(window, b"\r\n\r\n") {
        Some(pos) => pos,
        None if buf.len() >= max_head => {
            return Err(malformed(format!("head exceeds {} bytes", max_head)));
        }
        None => return Ok(None),
    };

    let text = String::from_utf8_lossy(&buf[..end]);
    let mut lines = text.split("\r\n");
    let start_line = lines.next().unwrap_or_default();
    let mut parts = start_line.splitn(3, ' ');
    let first = parts.next().unwrap_or_default();
    let second = parts.next().ok_or_else(|| malformed(format!("bad start line {:?}", start_line)))?;

    let start = if looks_like_response(first.as_bytes()) {
        let status = second
            .parse::<u16>()
            .map_err(|_| malformed(format!("bad status {:?}", second)))?;
        Http1Start::Response { status }
    } else {
        Http1Start::Request {
            method: first.to_ascii_uppercase(),
            target: second.to_owned(),
        }
    };

    let mut header_count = 0;
    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("bad header line {:?}", line)))?;
        let value = value.trim();
        header_count += 1;
        if name.eq_ignore_ascii_case("content-length") {
            let len = value
                .parse::<u64>()
                .map_err(|_| malformed(format!("bad content-length {:?}", value)))?;
            content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value
                .rsplit(',')
                .next()
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        }
    }

    let body = match (&start, chunked, content_length) {
        (_, true, _) => BodyKind::Chunked,
        (_, false, Some(0)) => BodyKind::Empty,
        (_, false, Some(len)) => BodyKind::Length(len),
        (Http1Start::Request { .. }, false, None) => BodyKind::Empty,
        (Http1Start::Response { status }, false, None) => {
            if *status < 200 || *status == 204 || *status == 304 {
                BodyKind::Empty
            } else {
                BodyKind::UntilClose
            }
        }
    };

    Ok(Some(Head {
        len: end + 4,
        start,
        header_count,
        body,
    }))
}

/// Parse a chunk-size line. Returns `(line length including CRLF, chunk size)`.
pub(crate) fn parse_chunk_line(buf: &[u8]) -> Result<Option<(usize, u64)>> {
    let window = &buf[..buf.len().min(MAX_CHUNK_LINE)];
    let end = match find(window, b"\r\n") {
        Some(pos) => pos,
        None if buf.len() >= MAX_CHUNK_LINE => return Err(malformed("chunk size line too long")),
        None => return Ok(None),
    };
    let line = String::from_utf8_lossy(&buf[..end]);
    let size = line.split(';').next().unwrap_or_default().trim();
    let size = u64::from_str_radix(size, 16).map_err(|_| malformed(format!("bad chunk size {:?}", size)))?;
    Ok(Some((end + 2, size)))
}

/// Length of the trailer section after the last chunk, including its blank line.
pub(crate) fn parse_trailers(buf: &[u8], max_head: usize) -> Result<Option<usize>> {
    if buf.starts_with(b"\r\n") {
        return Ok(Some(2));
    }
    let window = &buf[..buf.len().min(max_head)];
    match find(window, b"\r\n\r\n") {
        Some(pos) => Ok(Some(pos + 4)),
        None if buf.len() >= max_head => Err(malformed("trailers too long")),
        None => Ok(None),
    }
}
