//! gRPC message envelopes inside HTTP/2 DATA frames.
//!
//! Every message is prefixed with one compression-flag byte and a 4-byte
//! big-endian length. The declared length is a hard boundary: a payload holding
//! fewer body bytes than declared is an error, never a partial message. Several
//! envelopes packed into one DATA frame are extracted one after another.
//!
//! Messages split across DATA frames are not reassembled.

use std::fmt;

use bytes::Bytes;

/// Compression flag plus big-endian length.
pub const ENVELOPE_HEADER_LEN: usize = 5;

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// One message body lifted out of its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub compressed: bool,
    pub body: Bytes,
}

impl RawMessage {
    /// Encode a body into an envelope, the way a gRPC peer would send it.
    pub fn encode(compressed: bool, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + body.len());
        out.push(u8::from(compressed));
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    /// Fewer than 5 bytes left for the envelope header.
    TruncatedPrefix { available: usize },
    /// The body is shorter than the declared length.
    Incomplete { declared: usize, available: usize },
    InvalidCompressedFlag(u8),
    MessageTooLarge { declared: usize, max: usize },
}

impl ExtractError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TruncatedPrefix { .. } => "truncated_prefix",
            Self::Incomplete { .. } => "incomplete",
            Self::InvalidCompressedFlag(_) => "invalid_compressed_flag",
            Self::MessageTooLarge { .. } => "message_too_large",
        }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedPrefix { available } => {
                write!(f, "gRPC envelope header needs 5 bytes, {} available", available)
            }
            Self::Incomplete { declared, available } => write!(
                f,
                "gRPC message declares {} bytes, only {} in this frame",
                declared, available
            ),
            Self::InvalidCompressedFlag(flag) => write!(f, "Invalid gRPC compression flag {}", flag),
            Self::MessageTooLarge { declared, max } => {
                write!(f, "gRPC message of {} bytes exceeds the limit of {}", declared, max)
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract the envelope at the start of `payload`.
///
/// Returns the message and the number of bytes it occupied. A compressed message
/// is returned with whatever body bytes are present, since it is never decoded.
pub fn extract(payload: &Bytes, max_message_len: usize) -> Result<(RawMessage, usize), ExtractError> {
    let flag = match payload.first() {
        Some(flag) => *flag,
        None => return Err(ExtractError::TruncatedPrefix { available: 0 }),
    };
    if flag > 1 {
        return Err(ExtractError::InvalidCompressedFlag(flag));
    }
    let compressed = flag == 1;

    if payload.len() < ENVELOPE_HEADER_LEN {
        if compressed {
            let message = RawMessage { compressed, body: Bytes::new() };
            return Ok((message, payload.len()));
        }
        return Err(ExtractError::TruncatedPrefix { available: payload.len() });
    }

    let declared = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]) as usize;
    if declared > max_message_len {
        return Err(ExtractError::MessageTooLarge { declared, max: max_message_len });
    }

    let available = payload.len() - ENVELOPE_HEADER_LEN;
    if available < declared {
        if compressed {
            let message = RawMessage { compressed, body: payload.slice(ENVELOPE_HEADER_LEN..) };
            return Ok((message, payload.len()));
        }
        return Err(ExtractError::Incomplete { declared, available });
    }

    let end = ENVELOPE_HEADER_LEN + declared;
    let body = payload.slice(ENVELOPE_HEADER_LEN..end);
    Ok((RawMessage { compressed, body }, end))
}

/// Iterator over the envelopes of one DATA payload.
///
/// Stops after the first error.
#[derive(Debug, Clone)]
pub struct Envelopes {
    payload: Bytes,
    offset: usize,
    max_message_len: usize,
    done: bool,
}

impl Envelopes {
    pub fn new(payload: Bytes) -> Self {
        Self::with_limit(payload, DEFAULT_MAX_MESSAGE_LEN)
    }

    pub fn with_limit(payload: Bytes, max_message_len: usize) -> Self {
        Self {
            payload,
            offset: 0,
            max_message_len,
            done: false,
        }
    }
}

impl Iterator for Envelopes {
    type Item = Result<RawMessage, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.payload.len() {
            return None;
        }
        let rest = self.payload.slice(self.offset..);
        match extract(&rest, self.max_message_len) {
            Ok((message, used)) => {
                self.offset += used;
                Some(Ok(message))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for Envelopes {}
