//! One worker per captured half-connection.
//!
//! The worker drives an [`h2peek::FrameReader`] over the half-connection's bytes,
//! records `:path` and `:status` in the shared [`StreamDirectory`], and feeds the
//! messages found in DATA frames to the [`Dispatcher`]. The directory entries of
//! both directions are evicted when the worker ends, however it ends.

use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncRead;

use h2peek::{Frame, FrameReader, HeaderField, ReaderSettings};
use sniffer_core::{debug_log, EvictionGuard, FlowKey, Side, StreamDirectory};

use crate::dispatch::Dispatcher;
use crate::message::{Envelopes, DEFAULT_MAX_MESSAGE_LEN};

/// Counters returned when a worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub frames: u64,
    pub headers: u64,
    pub messages: u64,
    pub frame_errors: u64,
    pub message_errors: u64,
    pub http1_messages: u64,
    /// The reader stopped because the idle timeout elapsed.
    pub idle_flushed: bool,
}

impl fmt::Display for WorkerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frame(s), {} header block(s), {} message(s), {} frame error(s), {} message error(s), {} HTTP/1 message(s)",
            self.frames, self.headers, self.messages, self.frame_errors, self.message_errors, self.http1_messages
        )?;
        if self.idle_flushed {
            f.write_str(", idle flush")?;
        }
        Ok(())
    }
}

pub struct HalfConnectionWorker<R> {
    flow: FlowKey,
    reader: FrameReader<R>,
    directory: Arc<StreamDirectory>,
    dispatcher: Dispatcher,
    max_message_len: usize,
}

impl<R: AsyncRead + Unpin> HalfConnectionWorker<R> {
    pub fn new(flow: FlowKey, io: R, directory: Arc<StreamDirectory>, dispatcher: Dispatcher) -> Self {
        Self::with_settings(flow, io, directory, dispatcher, ReaderSettings::default())
    }

    pub fn with_settings(
        flow: FlowKey,
        io: R,
        directory: Arc<StreamDirectory>,
        dispatcher: Dispatcher,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            flow,
            reader: FrameReader::with_settings(io, settings),
            directory,
            dispatcher,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Largest gRPC message accepted from one envelope.
    pub fn max_message_len(mut self, max: usize) -> Self {
        self.max_message_len = max;
        self
    }

    pub fn flow(&self) -> FlowKey {
        self.flow
    }

    /// Read until the half-connection ends.
    ///
    /// Frame errors are logged and skipped. Only an I/O error on the byte stream
    /// stops the worker early.
    pub async fn run(mut self) -> WorkerSummary {
        let _eviction = EvictionGuard::new(self.directory.clone(), self.flow);
        let mut summary = WorkerSummary::default();
        debug_log!("worker started for {}", self.flow);

        loop {
            match self.reader.next().await {
                Ok(Some(frame)) => {
                    summary.frames += 1;
                    self.on_frame(frame, &mut summary);
                }
                Ok(None) => break,
                Err(err) if err.is_fatal() => {
                    tracing::warn!(flow = %self.flow, error = %err, "half-connection read failed");
                    summary.frame_errors += 1;
                    break;
                }
                Err(err) => {
                    tracing::warn!(flow = %self.flow, error = %err, "skipping malformed frame");
                    summary.frame_errors += 1;
                }
            }
        }

        summary.idle_flushed = self.reader.idle_expired();
        debug_log!("worker for {} finished: {}", self.flow, summary);
        summary
    }

    fn on_frame(&self, frame: Frame, summary: &mut WorkerSummary) {
        match frame {
            Frame::Headers { stream_id, fields, .. } => {
                summary.headers += 1;
                self.on_headers(stream_id, &fields);
            }
            Frame::Data { stream_id, payload, .. } => {
                if payload.is_empty() {
                    return;
                }
                let resolution = self.directory.resolve(self.flow, stream_id);
                for envelope in Envelopes::with_limit(payload, self.max_message_len) {
                    match envelope {
                        Ok(raw) => {
                            summary.messages += 1;
                            self.dispatcher.dispatch(self.flow, stream_id, &resolution, raw);
                        }
                        Err(err) => {
                            summary.message_errors += 1;
                            tracing::warn!(
                                flow = %self.flow,
                                stream_id,
                                path = %resolution.path_str(),
                                error = %err,
                                "dropping gRPC message"
                            );
                        }
                    }
                }
            }
            Frame::Http1(message) => {
                summary.http1_messages += 1;
                tracing::info!(flow = %self.flow, "skipped HTTP/1 message: {}", message);
            }
            Frame::Other { .. } => {}
        }
    }

    fn on_headers(&self, stream_id: u32, fields: &[HeaderField]) {
        for field in fields {
            match field.name.as_str() {
                ":path" => {
                    self.directory.record_path(self.flow, stream_id, &field.value);
                    self.directory.mark_side(self.flow, stream_id, Side::Request);
                }
                ":status" => {
                    self.directory.mark_side(self.flow, stream_id, Side::Response);
                }
                _ => {}
            }
        }
    }
}

impl<R> fmt::Debug for HalfConnectionWorker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalfConnectionWorker")
            .field("flow", &self.flow)
            .field("max_message_len", &self.max_message_len)
            .finish_non_exhaustive()
    }
}
