use std::fmt;
use std::io;

use crate::frame::FrameKind;

/// Errors raised while reading one half-connection.
///
/// Everything except [`FrameError::Io`] concerns a single frame: the reader has
/// already moved past it and the next call to `next()` continues with the
/// following frame.
#[derive(Debug)]
pub enum FrameError {
    Io(io::Error),
    FrameTooLarge { length: u32, max: u32 },
    InvalidPadding { stream_id: u32, kind: FrameKind },
    MissingStreamId { kind: FrameKind },
    /// A header block was open and a different frame arrived.
    ExpectedContinuation { stream_id: u32, got: FrameKind, got_stream: u32 },
    UnexpectedContinuation { stream_id: u32 },
    HeaderListTooLarge { stream_id: u32, size: usize, max: usize },
    Hpack { stream_id: u32, reason: String },
    MalformedHttp1(String),
}

impl FrameError {
    /// Whether the byte stream itself is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Io(_))
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::FrameTooLarge { length, max } => {
                write!(f, "Frame of {} bytes exceeds the limit of {}", length, max)
            }
            Self::InvalidPadding { stream_id, kind } => {
                write!(f, "{} frame on stream {} is shorter than its padding and fixed fields", kind, stream_id)
            }
            Self::MissingStreamId { kind } => write!(f, "{} frame on stream 0", kind),
            Self::ExpectedContinuation { stream_id, got, got_stream } => write!(
                f,
                "Expected CONTINUATION for stream {}, got {} on stream {}",
                stream_id, got, got_stream
            ),
            Self::UnexpectedContinuation { stream_id } => {
                write!(f, "CONTINUATION on stream {} without an open header block", stream_id)
            }
            Self::HeaderListTooLarge { stream_id, size, max } => write!(
                f,
                "Header list of {} bytes on stream {} exceeds the limit of {}",
                size, stream_id, max
            ),
            Self::Hpack { stream_id, reason } => {
                write!(f, "HPACK decoding failed on stream {}: {}", stream_id, reason)
            }
            Self::MalformedHttp1(err) => write!(f, "Malformed HTTP/1 message: {}", err),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
