//! In-memory byte pipe between TCP reassembly and a half-connection worker.
//!
//! The reassembly collaborator owns a [`HalfConnectionFeed`] per flow direction and
//! pushes ordered, deduplicated payload bytes into it. The worker reads the matching
//! [`HalfConnectionStream`] through `AsyncRead`. Closing or dropping the feed is the
//! end-of-stream signal (connection closed or flushed as idle).
//!
//! The pipe is bounded: once `capacity` bytes are buffered and unread, `push` waits
//! for the worker to catch up. This is the per-half-connection memory bound.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{self, AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};

use super::error::{ConnectionError, Result};
use super::flow::FlowKey;

/// Create a connected feed/stream pair for one half-connection.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sniffer_core::connection::Result<()> {
/// use sniffer_core::connection::{half_connection, FlowKey};
/// use tokio::io::AsyncReadExt;
///
/// let flow = FlowKey::new("127.0.0.1:40000".parse().unwrap(), "127.0.0.1:50051".parse().unwrap());
/// let (mut feed, mut stream) = half_connection(flow, 1024);
///
/// feed.push(b"PRI * HTTP/2.0").await?;
/// feed.close().await?;
///
/// let mut seen = Vec::new();
/// stream.read_to_end(&mut seen).await?;
/// assert_eq!(seen, b"PRI * HTTP/2.0");
/// # Ok(())
/// # }
/// ```
pub fn half_connection(flow: FlowKey, capacity: usize) -> (HalfConnectionFeed, HalfConnectionStream) {
    let (tx, rx) = io::duplex(capacity.max(1));
    (
        HalfConnectionFeed { flow, inner: Some(tx), pushed: 0 },
        HalfConnectionStream { flow, inner: rx },
    )
}

/// Write end, held by the reassembly collaborator.
#[derive(Debug)]
pub struct HalfConnectionFeed {
    flow: FlowKey,
    inner: Option<DuplexStream>,
    pushed: u64,
}

impl HalfConnectionFeed {
    pub fn flow(&self) -> FlowKey {
        self.flow
    }

    /// Total bytes pushed so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Append reassembled bytes. Waits while the pipe is full.
    pub async fn push(&mut self, bytes: &[u8]) -> Result<()> {
        let flow = self.flow;
        let tx = self.inner.as_mut().ok_or(ConnectionError::ConnectionClosed(flow))?;
        match tx.write_all(bytes).await {
            Ok(()) => {
                self.pushed += bytes.len() as u64;
                Ok(())
            }
            // The read half was dropped: the worker has already exited.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                self.inner = None;
                Err(ConnectionError::ConnectionClosed(flow))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Same as [`push`](Self::push) for an owned buffer.
    pub async fn push_bytes(&mut self, bytes: Bytes) -> Result<()> {
        self.push(&bytes).await
    }

    /// Signal end of stream. Further pushes fail with `ConnectionClosed`.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut tx) = self.inner.take() {
            // A worker that already exited leaves nothing to notify.
            match tx.shutdown().await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Read end, consumed by the half-connection worker.
#[derive(Debug)]
pub struct HalfConnectionStream {
    flow: FlowKey,
    inner: DuplexStream,
}

impl HalfConnectionStream {
    pub fn flow(&self) -> FlowKey {
        self.flow
    }
}

impl AsyncRead for HalfConnectionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
