//! Frame reader for one captured half-connection.
//!
//! The reader owns its byte buffer and its HPACK decoder. HPACK state is per
//! direction, so every header block is decoded (including PUSH_PROMISE blocks the
//! sniffer has no use for) to keep the dynamic table in step with the sender.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use sniffer_core::{debug_log, debug_trace, debug_warn};

use crate::error::{FrameError, Result};
use crate::frame::{CONNECTION_PREFACE, FRAME_HEADER_LEN, Frame, FrameHeader, FrameKind, HeaderField, flags};
use crate::http1::{self, BodyKind, Http1Message};
use crate::settings::ReaderSettings;

const READ_CHUNK: usize = 8 * 1024;

/// Per-field overhead in the RFC 7541 header list size accounting.
const HEADER_FIELD_OVERHEAD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Headers { end_stream: bool },
    PushPromise,
}

/// A header block waiting for CONTINUATION frames.
struct PendingBlock {
    kind: BlockKind,
    stream_id: u32,
    block: BytesMut,
}

pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    hpack: fluke_hpack::Decoder<'static>,
    settings: ReaderSettings,
    pending: Option<PendingBlock>,
    idle_expired: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(io: R) -> Self {
        Self::with_settings(io, ReaderSettings::default())
    }

    pub fn with_settings(io: R, settings: ReaderSettings) -> Self {
        let mut hpack = fluke_hpack::Decoder::new();
        hpack.set_max_table_size(settings.header_table_size);
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
            hpack,
            settings,
            pending: None,
            idle_expired: false,
        }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Bytes read from the stream but not consumed yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the last end of stream came from the idle timeout.
    pub fn idle_expired(&self) -> bool {
        self.idle_expired
    }

    pub fn into_inner(self) -> R {
        self.io
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` is the end of the stream. An `Err` that is not
    /// [fatal](FrameError::is_fatal) describes one skipped frame; keep calling.
    pub async fn next(&mut self) -> Result<Option<Frame>> {
        loop {
            if !self.fill(FRAME_HEADER_LEN).await? {
                return Ok(self.finish());
            }

            if http1::starts_message(&self.buf[..FRAME_HEADER_LEN]) {
                if let Some(stream_id) = self.pending.take().map(|block| block.stream_id) {
                    debug_warn!("dropping open header block for stream {}", stream_id);
                }
                return match self.skip_http1().await? {
                    Some(message) => Ok(Some(Frame::Http1(message))),
                    None => Ok(self.finish()),
                };
            }

            if self.buf.starts_with(b"PRI") {
                if !self.fill(CONNECTION_PREFACE.len()).await? {
                    return Ok(self.finish());
                }
                if self.buf.starts_with(CONNECTION_PREFACE) {
                    debug_log!("connection preface skipped");
                    self.buf.advance(CONNECTION_PREFACE.len());
                    continue;
                }
            }

            let mut raw = [0u8; FRAME_HEADER_LEN];
            raw.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
            let header = FrameHeader::decode(&raw);
            debug_trace!(
                "frame {} stream {} len {} flags 0x{:02x}",
                header.kind, header.stream_id, header.length, header.flags
            );

            if header.length > self.settings.max_frame_size {
                self.buf.advance(FRAME_HEADER_LEN);
                self.discard(u64::from(header.length)).await?;
                return Err(FrameError::FrameTooLarge {
                    length: header.length,
                    max: self.settings.max_frame_size,
                });
            }

            let total = FRAME_HEADER_LEN + header.length as usize;
            if !self.fill(total).await? {
                return Ok(self.finish());
            }
            self.buf.advance(FRAME_HEADER_LEN);
            let payload = self.buf.split_to(header.length as usize).freeze();

            if let Some(frame) = self.on_frame(header, payload)? {
                return Ok(Some(frame));
            }
        }
    }

    fn on_frame(&mut self, header: FrameHeader, payload: Bytes) -> Result<Option<Frame>> {
        if let Some(pending) = &self.pending {
            if header.kind != FrameKind::Continuation || header.stream_id != pending.stream_id {
                let stream_id = pending.stream_id;
                self.pending = None;
                return Err(FrameError::ExpectedContinuation {
                    stream_id,
                    got: header.kind,
                    got_stream: header.stream_id,
                });
            }
        }

        if header.kind.requires_stream() && header.stream_id == 0 {
            return Err(FrameError::MissingStreamId { kind: header.kind });
        }

        match header.kind {
            FrameKind::Data => Ok(Some(Frame::Data {
                stream_id: header.stream_id,
                payload: strip_padding(&header, payload)?,
                end_stream: header.end_stream(),
            })),
            FrameKind::Headers => {
                let mut fragment = strip_padding(&header, payload)?;
                if header.has_flag(flags::PRIORITY) {
                    // Stream dependency (4 bytes) and weight (1 byte).
                    if fragment.len() < 5 {
                        return Err(FrameError::InvalidPadding {
                            stream_id: header.stream_id,
                            kind: header.kind,
                        });
                    }
                    fragment.advance(5);
                }
                let kind = BlockKind::Headers { end_stream: header.end_stream() };
                self.open_block(kind, &header, fragment)
            }
            FrameKind::PushPromise => {
                let mut fragment = strip_padding(&header, payload)?;
                if fragment.len() < 4 {
                    return Err(FrameError::InvalidPadding {
                        stream_id: header.stream_id,
                        kind: header.kind,
                    });
                }
                // Promised stream id.
                fragment.advance(4);
                self.open_block(BlockKind::PushPromise, &header, fragment)
            }
            FrameKind::Continuation => {
                let mut pending = self
                    .pending
                    .take()
                    .ok_or(FrameError::UnexpectedContinuation { stream_id: header.stream_id })?;
                pending.block.extend_from_slice(&payload);
                self.check_block_size(&pending)?;
                if header.end_headers() {
                    self.complete(pending).map(Some)
                } else {
                    self.pending = Some(pending);
                    Ok(None)
                }
            }
            kind => Ok(Some(Frame::Other {
                kind,
                stream_id: header.stream_id,
            })),
        }
    }

    fn open_block(&mut self, kind: BlockKind, header: &FrameHeader, fragment: Bytes) -> Result<Option<Frame>> {
        let pending = PendingBlock {
            kind,
            stream_id: header.stream_id,
            block: BytesMut::from(&fragment[..]),
        };
        if header.end_headers() {
            return self.complete(pending).map(Some);
        }
        self.check_block_size(&pending)?;
        self.pending = Some(pending);
        Ok(None)
    }

    fn check_block_size(&self, pending: &PendingBlock) -> Result<()> {
        if pending.block.len() > self.settings.max_header_list_size {
            return Err(FrameError::HeaderListTooLarge {
                stream_id: pending.stream_id,
                size: pending.block.len(),
                max: self.settings.max_header_list_size,
            });
        }
        Ok(())
    }

    fn complete(&mut self, pending: PendingBlock) -> Result<Frame> {
        let stream_id = pending.stream_id;
        let decoded = self.hpack.decode(&pending.block).map_err(|err| FrameError::Hpack {
            stream_id,
            reason: format!("{:?}", err),
        })?;

        let size: usize = decoded
            .iter()
            .map(|(name, value)| name.len() + value.len() + HEADER_FIELD_OVERHEAD)
            .sum();
        if size > self.settings.max_header_list_size {
            return Err(FrameError::HeaderListTooLarge {
                stream_id,
                size,
                max: self.settings.max_header_list_size,
            });
        }

        match pending.kind {
            BlockKind::Headers { end_stream } => {
                let fields = decoded
                    .into_iter()
                    .map(|(name, value)| HeaderField {
                        name: String::from_utf8_lossy(&name).into_owned(),
                        value: String::from_utf8_lossy(&value).into_owned(),
                    })
                    .collect();
                Ok(Frame::Headers { stream_id, fields, end_stream })
            }
            BlockKind::PushPromise => Ok(Frame::Other {
                kind: FrameKind::PushPromise,
                stream_id,
            }),
        }
    }

    /// Step over one HTTP/1 message. `Ok(None)` if the stream ends inside its head.
    async fn skip_http1(&mut self) -> Result<Option<Http1Message>> {
        let max_head = self.settings.max_http1_head;
        let head = loop {
            match http1::parse_head(&self.buf, max_head) {
                Ok(Some(head)) => break head,
                Ok(None) => {
                    if !self.read_more().await? {
                        return Ok(None);
                    }
                }
                Err(err) => {
                    // No way to find the end of this message; resync on fresh bytes.
                    self.buf.clear();
                    return Err(err);
                }
            }
        };
        self.buf.advance(head.len);

        let body_len = match head.body {
            BodyKind::Empty => 0,
            BodyKind::Length(len) => self.discard(len).await?,
            BodyKind::Chunked => self.discard_chunked().await?,
            BodyKind::UntilClose => self.discard(u64::MAX).await?,
        };

        Ok(Some(Http1Message {
            start: head.start,
            header_count: head.header_count,
            body_len,
        }))
    }

    async fn discard_chunked(&mut self) -> Result<u64> {
        let mut drained = 0u64;
        loop {
            let (line_len, size) = match http1::parse_chunk_line(&self.buf) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    if !self.read_more().await? {
                        return Ok(drained);
                    }
                    continue;
                }
                Err(err) => {
                    self.buf.clear();
                    return Err(err);
                }
            };
            self.buf.advance(line_len);

            if size == 0 {
                loop {
                    match http1::parse_trailers(&self.buf, self.settings.max_http1_head) {
                        Ok(Some(len)) => {
                            self.buf.advance(len);
                            return Ok(drained);
                        }
                        Ok(None) => {
                            if !self.read_more().await? {
                                return Ok(drained);
                            }
                        }
                        Err(err) => {
                            self.buf.clear();
                            return Err(err);
                        }
                    }
                }
            }

            // Chunk data plus its trailing CRLF.
            let span = size.saturating_add(2);
            let skipped = self.discard(span).await?;
            drained += skipped.min(size);
            if skipped < span {
                return Ok(drained);
            }
        }
    }

    /// Drop up to `len` bytes. Returns how many were dropped before end of stream.
    async fn discard(&mut self, len: u64) -> Result<u64> {
        let mut remaining = len;
        loop {
            let take = remaining.min(self.buf.len() as u64);
            self.buf.advance(take as usize);
            remaining -= take;
            if remaining == 0 || !self.read_more().await? {
                return Ok(len - remaining);
            }
        }
    }

    /// Make sure at least `n` bytes are buffered. `false` on end of stream.
    async fn fill(&mut self, n: usize) -> Result<bool> {
        while self.buf.len() < n {
            if !self.read_more().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// One read from the stream. `false` on end of stream or idle timeout.
    async fn read_more(&mut self) -> Result<bool> {
        self.buf.reserve(READ_CHUNK);
        let read = match self.settings.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, self.io.read_buf(&mut self.buf)).await {
                Ok(read) => read?,
                Err(_) => {
                    debug_log!("no bytes for {:?}, treating the stream as flushed", idle);
                    self.idle_expired = true;
                    0
                }
            },
            None => self.io.read_buf(&mut self.buf).await?,
        };
        Ok(read > 0)
    }

    fn finish(&mut self) -> Option<Frame> {
        if !self.buf.is_empty() {
            debug_log!("dropping {} trailing byte(s) at end of stream", self.buf.len());
            self.buf.clear();
        }
        self.pending = None;
        None
    }
}

fn strip_padding(header: &FrameHeader, payload: Bytes) -> Result<Bytes> {
    if !header.has_flag(flags::PADDED) {
        return Ok(payload);
    }
    let invalid = || FrameError::InvalidPadding {
        stream_id: header.stream_id,
        kind: header.kind,
    };
    let pad = *payload.first().ok_or_else(invalid)? as usize;
    if 1 + pad > payload.len() {
        return Err(invalid());
    }
    Ok(payload.slice(1..payload.len() - pad))
}

/// Drain a reader, keeping the frames and the non-fatal errors met on the way.
pub async fn collect_frames<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> (Vec<Frame>, Vec<FrameError>) {
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    loop {
        match reader.next().await {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(err) if err.is_fatal() => {
                errors.push(err);
                break;
            }
            Err(err) => errors.push(err),
        }
    }
    (frames, errors)
}
