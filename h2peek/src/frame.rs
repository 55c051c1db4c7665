//! HTTP/2 frame layout (RFC 7540 section 4) and the frames surfaced to workers.

use std::fmt;

use bytes::Bytes;

use crate::http1::Http1Message;

/// Client connection preface, sent once before the first frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest payload length the 24-bit length field can express.
pub const MAX_FRAME_LEN: u32 = (1 << 24) - 1;

/// Frame flags used by the reader.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameKind {
    fn from(v: u8) -> Self {
        match v {
            0x0 => FrameKind::Data,
            0x1 => FrameKind::Headers,
            0x2 => FrameKind::Priority,
            0x3 => FrameKind::RstStream,
            0x4 => FrameKind::Settings,
            0x5 => FrameKind::PushPromise,
            0x6 => FrameKind::Ping,
            0x7 => FrameKind::GoAway,
            0x8 => FrameKind::WindowUpdate,
            0x9 => FrameKind::Continuation,
            other => FrameKind::Unknown(other),
        }
    }
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Data => "DATA",
            FrameKind::Headers => "HEADERS",
            FrameKind::Priority => "PRIORITY",
            FrameKind::RstStream => "RST_STREAM",
            FrameKind::Settings => "SETTINGS",
            FrameKind::PushPromise => "PUSH_PROMISE",
            FrameKind::Ping => "PING",
            FrameKind::GoAway => "GOAWAY",
            FrameKind::WindowUpdate => "WINDOW_UPDATE",
            FrameKind::Continuation => "CONTINUATION",
            FrameKind::Unknown(_) => "UNKNOWN",
        }
    }

    /// Frames that only make sense on a non-zero stream.
    pub fn requires_stream(&self) -> bool {
        matches!(
            self,
            FrameKind::Data | FrameKind::Headers | FrameKind::Continuation | FrameKind::PushPromise
        )
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Unknown(code) => write!(f, "UNKNOWN(0x{:02x})", code),
            kind => f.write_str(kind.as_str()),
        }
    }
}

/// The 9-byte header in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: FrameKind,
    pub flags: u8,
    /// Stream identifier with the reserved bit cleared.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a frame header. Returns `None` if fewer than 9 bytes are given.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let raw: &[u8; FRAME_HEADER_LEN] = buf.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
        Some(Self::decode(raw))
    }

    pub fn decode(raw: &[u8; FRAME_HEADER_LEN]) -> Self {
        let length = u32::from_be_bytes([0, raw[0], raw[1], raw[2]]);
        let stream_id = u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]) & 0x7FFF_FFFF;
        Self {
            length,
            kind: FrameKind::from(raw[3]),
            flags: raw[4],
            stream_id,
        }
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    pub fn end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }

    /// Serialize back to the wire layout.
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_LEN] {
        let len = self.length.to_be_bytes();
        let id = (self.stream_id & 0x7FFF_FFFF).to_be_bytes();
        let kind = match self.kind {
            FrameKind::Data => 0x0,
            FrameKind::Headers => 0x1,
            FrameKind::Priority => 0x2,
            FrameKind::RstStream => 0x3,
            FrameKind::Settings => 0x4,
            FrameKind::PushPromise => 0x5,
            FrameKind::Ping => 0x6,
            FrameKind::GoAway => 0x7,
            FrameKind::WindowUpdate => 0x8,
            FrameKind::Continuation => 0x9,
            FrameKind::Unknown(code) => code,
        };
        [len[1], len[2], len[3], kind, self.flags, id[0], id[1], id[2], id[3]]
    }
}

/// A decoded header field. Non-UTF-8 bytes are replaced lossily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// What the reader hands to the worker, one per complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete header block (HEADERS plus any CONTINUATION frames).
    Headers {
        stream_id: u32,
        fields: Vec<HeaderField>,
        end_stream: bool,
    },
    /// DATA payload with padding removed.
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
    },
    /// Any frame the sniffer does not interpret.
    Other { kind: FrameKind, stream_id: u32 },
    /// A plaintext HTTP/1 message found in-band and skipped.
    Http1(Http1Message),
}

impl Frame {
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Frame::Headers { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::Other { stream_id, .. } => Some(*stream_id),
            Frame::Http1(_) => None,
        }
    }
}

/// Raw frame builders for tests, here and in the crates above.
#[cfg(any(test, feature = "test-util"))]
pub mod build {
    use super::*;

    pub use fluke_hpack::Encoder;

    pub fn frame(kind: FrameKind, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            length: payload.len() as u32,
            kind,
            flags,
            stream_id,
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    /// A HEADERS frame with END_HEADERS set, encoded against `encoder`'s table.
    pub fn headers(encoder: &mut Encoder, stream_id: u32, fields: &[(&str, &str)]) -> Vec<u8> {
        let block = encoder.encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));
        frame(FrameKind::Headers, flags::END_HEADERS, stream_id, &block)
    }

    pub fn data(stream_id: u32, payload: &[u8], end_stream: bool) -> Vec<u8> {
        let flags = if end_stream { flags::END_STREAM } else { 0 };
        frame(FrameKind::Data, flags, stream_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let raw = [0x00, 0x00, 0x0d, 0x00, 0x01, 0x80, 0x00, 0x00, 0x03];
        let header = FrameHeader::parse(&raw).unwrap();
        assert_eq!(header.length, 13);
        assert_eq!(header.kind, FrameKind::Data);
        assert!(header.end_stream());
        assert!(!header.end_headers());
        // Reserved bit is masked off.
        assert_eq!(header.stream_id, 3);
    }

    #[test]
    fn test_parse_short_header() {
        assert!(FrameHeader::parse(&[0, 0, 1, 0]).is_none());
    }

    #[test]
    fn test_header_roundtrip_keeps_unknown_kind() {
        let header = FrameHeader {
            length: MAX_FRAME_LEN,
            kind: FrameKind::Unknown(0xfa),
            flags: 0x0,
            stream_id: 7,
        };
        assert_eq!(FrameHeader::parse(&header.to_bytes()), Some(header));
        assert_eq!(header.kind.to_string(), "UNKNOWN(0xfa)");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(FrameKind::from(0x9).as_str(), "CONTINUATION");
        assert_eq!(FrameKind::Headers.to_string(), "HEADERS");
        assert!(FrameKind::Data.requires_stream());
        assert!(!FrameKind::Settings.requires_stream());
    }

    #[test]
    fn test_pseudo_header() {
        assert!(HeaderField::new(":path", "/a.B/C").is_pseudo());
        assert!(!HeaderField::new("content-type", "application/grpc").is_pseudo());
    }
}
